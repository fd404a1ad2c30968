//! Component registry
//!
//! Components are created from a static channel declaration list at
//! activation and dropped at deactivation; channels never migrate between
//! components. The registry also owns the single global process-image
//! pass that promotes every staged channel value at the cycle boundary.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use errors::{EdgeError, EdgeResult};

use crate::channel::{AccessMode, Channel, ChannelAddress, Doc};
use crate::value::ChannelType;

/// Well-known channel id: the exceptional-state enable signal
pub const EXCEPTIONAL_STATE_ENABLE_SIGNAL: &str = "ExceptionalStateEnableSignal";
/// Well-known channel id: the exceptional-state target value
pub const EXCEPTIONAL_STATE_VALUE: &str = "ExceptionalStateValue";

/// One channel declaration in a component's static list
#[derive(Debug, Clone)]
pub struct ChannelDecl {
    pub id: String,
    pub doc: Doc,
}

impl ChannelDecl {
    pub fn new(id: impl Into<String>, doc: Doc) -> Self {
        Self { id: id.into(), doc }
    }
}

/// Declarations for the cross-cutting exceptional-state channels. Any
/// device driver that honors external overrides appends these to its own
/// channel list.
pub fn exceptional_state_decls() -> Vec<ChannelDecl> {
    vec![
        ChannelDecl::new(
            EXCEPTIONAL_STATE_ENABLE_SIGNAL,
            Doc::of(ChannelType::Bool)
                .access_mode(AccessMode::ReadWrite)
                .description("Time-limited external override enable signal"),
        ),
        ChannelDecl::new(
            EXCEPTIONAL_STATE_VALUE,
            Doc::of(ChannelType::Int)
                .access_mode(AccessMode::ReadWrite)
                .description("Target value to apply while the override is active"),
        ),
    ]
}

/// A component instance: an id plus the channels created from its
/// declaration list
#[derive(Debug)]
pub struct Component {
    id: String,
    channels: HashMap<String, Arc<Channel>>,
}

impl Component {
    fn from_decls(id: &str, decls: Vec<ChannelDecl>) -> EdgeResult<Self> {
        let mut channels = HashMap::with_capacity(decls.len());
        for decl in decls {
            let address = ChannelAddress::new(id, decl.id.clone());
            if channels
                .insert(decl.id.clone(), Channel::new(address, decl.doc))
                .is_some()
            {
                return Err(EdgeError::config(format!(
                    "duplicate channel declaration {}/{}",
                    id, decl.id
                )));
            }
        }
        Ok(Self {
            id: id.to_string(),
            channels,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn channel(&self, channel_id: &str) -> EdgeResult<Arc<Channel>> {
        self.channels
            .get(channel_id)
            .cloned()
            .ok_or_else(|| EdgeError::ChannelNotFound(format!("{}/{channel_id}", self.id)))
    }

    pub fn channels(&self) -> impl Iterator<Item = &Arc<Channel>> {
        self.channels.values()
    }
}

/// Explicit id → component map owned by the application. No implicit
/// service discovery: wiring happens at construction time.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    components: DashMap<String, Arc<Component>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a component from its declaration list. Activating an id that
    /// is already active is a configuration error.
    pub fn activate(&self, id: &str, decls: Vec<ChannelDecl>) -> EdgeResult<Arc<Component>> {
        if self.components.contains_key(id) {
            return Err(EdgeError::config(format!("component {id} already active")));
        }
        let component = Arc::new(Component::from_decls(id, decls)?);
        self.components.insert(id.to_string(), component.clone());
        info!(component = id, "component activated");
        Ok(component)
    }

    /// Drop a component and its channels
    pub fn deactivate(&self, id: &str) -> EdgeResult<()> {
        self.components
            .remove(id)
            .map(|_| info!(component = id, "component deactivated"))
            .ok_or_else(|| EdgeError::ComponentNotFound(id.to_string()))
    }

    pub fn get(&self, id: &str) -> EdgeResult<Arc<Component>> {
        self.components
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EdgeError::ComponentNotFound(id.to_string()))
    }

    /// Resolve `component_id/channel_id`
    pub fn channel(&self, address: &ChannelAddress) -> EdgeResult<Arc<Channel>> {
        self.get(&address.component_id)?.channel(&address.channel_id)
    }

    /// The global promotion pass: every channel's staged value becomes the
    /// visible value. Returns the number of channels promoted.
    pub fn process_image(&self) -> usize {
        let mut promoted = 0;
        for entry in self.components.iter() {
            for channel in entry.value().channels() {
                channel.next_process_image();
                promoted += 1;
            }
        }
        debug!(channels = promoted, "process image promoted");
        promoted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ChannelValue;

    fn meter_decls() -> Vec<ChannelDecl> {
        vec![
            ChannelDecl::new("Power", Doc::of(ChannelType::Float)),
            ChannelDecl::new(
                "SetLimit",
                Doc::of(ChannelType::Float).access_mode(AccessMode::ReadWrite),
            ),
        ]
    }

    #[test]
    fn test_activate_and_lookup() {
        let registry = ComponentRegistry::new();
        registry.activate("meter0", meter_decls()).unwrap();

        let ch = registry
            .channel(&ChannelAddress::new("meter0", "Power"))
            .unwrap();
        assert_eq!(ch.channel_type(), ChannelType::Float);

        assert!(matches!(
            registry.channel(&ChannelAddress::new("meter0", "Nope")),
            Err(EdgeError::ChannelNotFound(_))
        ));
        assert!(matches!(
            registry.get("meter1"),
            Err(EdgeError::ComponentNotFound(_))
        ));
    }

    #[test]
    fn test_double_activation_fails() {
        let registry = ComponentRegistry::new();
        registry.activate("meter0", meter_decls()).unwrap();
        assert!(registry.activate("meter0", meter_decls()).unwrap_err().is_fatal());
    }

    #[test]
    fn test_deactivate_removes_channels() {
        let registry = ComponentRegistry::new();
        registry.activate("meter0", meter_decls()).unwrap();
        registry.deactivate("meter0").unwrap();
        assert!(registry.get("meter0").is_err());
        assert!(registry.deactivate("meter0").is_err());
    }

    #[test]
    fn test_process_image_promotes_all() {
        let registry = ComponentRegistry::new();
        let comp = registry.activate("meter0", meter_decls()).unwrap();

        let power = comp.channel("Power").unwrap();
        power.set_next_value(Some(ChannelValue::Float(230.0)));
        assert_eq!(power.value(), None);

        assert_eq!(registry.process_image(), 2);
        assert_eq!(power.value(), Some(ChannelValue::Float(230.0)));
    }

    #[test]
    fn test_exceptional_state_decls() {
        let registry = ComponentRegistry::new();
        let mut decls = meter_decls();
        decls.extend(exceptional_state_decls());
        let comp = registry.activate("heater0", decls).unwrap();

        let enable = comp.channel(EXCEPTIONAL_STATE_ENABLE_SIGNAL).unwrap();
        enable.set_next_write_value(ChannelValue::Bool(true)).unwrap();
        assert_eq!(enable.get_next_write_value(), Some(ChannelValue::Bool(true)));
    }
}
