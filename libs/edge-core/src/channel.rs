//! Channel: typed, access-controlled state cell with process-image
//! semantics
//!
//! Three slots live behind one mutex: `value` (committed, visible to
//! everyone), `next_value` (staged by the owning bridge during the current
//! cycle) and `next_write_value` (a write requested by a consumer, pending
//! consumption by the owner). `value` changes only when
//! [`Channel::next_process_image`] promotes the staged slot at the cycle
//! boundary, so concurrent readers never observe a half-updated cycle.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use errors::{EdgeError, EdgeResult};

use crate::value::{ChannelType, ChannelValue, Unit};

/// Channel access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadOnly => "read-only",
            Self::ReadWrite => "read-write",
        }
    }
}

/// Channel identity: owning component id + channel id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelAddress {
    pub component_id: String,
    pub channel_id: String,
}

impl ChannelAddress {
    pub fn new(component_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            component_id: component_id.into(),
            channel_id: channel_id.into(),
        }
    }
}

impl std::fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.component_id, self.channel_id)
    }
}

/// Channel metadata, fixed at declaration time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Doc {
    pub channel_type: ChannelType,
    pub access_mode: AccessMode,
    pub unit: Unit,
    pub description: String,
    /// Mirror consumer writes straight into `next_value`. Used by virtual
    /// components that have no backing device, so the read view follows
    /// the write view without a bridge in between.
    pub mirror_write: bool,
}

impl Doc {
    pub fn of(channel_type: ChannelType) -> Self {
        Self {
            channel_type,
            access_mode: AccessMode::ReadOnly,
            unit: Unit::None,
            description: String::new(),
            mirror_write: false,
        }
    }

    #[must_use]
    pub fn access_mode(mut self, access_mode: AccessMode) -> Self {
        self.access_mode = access_mode;
        self
    }

    #[must_use]
    pub fn unit(mut self, unit: Unit) -> Self {
        self.unit = unit;
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn mirror_write_to_next_value(mut self) -> Self {
        self.mirror_write = true;
        self
    }
}

#[derive(Debug, Default)]
struct Slots {
    value: Option<ChannelValue>,
    next_value: Option<ChannelValue>,
    next_write_value: Option<ChannelValue>,
}

/// A single channel cell. Cheap to share (`Arc<Channel>`); all slot access
/// goes through one short-lived mutex.
#[derive(Debug)]
pub struct Channel {
    address: ChannelAddress,
    doc: Doc,
    slots: Mutex<Slots>,
}

impl Channel {
    pub fn new(address: ChannelAddress, doc: Doc) -> Arc<Self> {
        Arc::new(Self {
            address,
            doc,
            slots: Mutex::new(Slots::default()),
        })
    }

    pub fn address(&self) -> &ChannelAddress {
        &self.address
    }

    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    pub fn channel_type(&self) -> ChannelType {
        self.doc.channel_type
    }

    pub fn unit(&self) -> Unit {
        self.doc.unit
    }

    /// Last promoted value. `None` while the channel is undefined.
    pub fn value(&self) -> Option<ChannelValue> {
        self.slots.lock().value.clone()
    }

    /// Stage the next value. Owner-only by convention; visible to readers
    /// only after the next process-image pass. Passing `None` stages the
    /// undefined state (e.g. an unresolved record position).
    ///
    /// A type-mismatched value degrades to a logged no-op rather than an
    /// error, since channel producers are frequently generic.
    pub fn set_next_value(&self, value: Option<ChannelValue>) {
        match value {
            None => self.slots.lock().next_value = None,
            Some(v) => match v.coerce_to(self.doc.channel_type) {
                Some(coerced) => self.slots.lock().next_value = Some(coerced),
                None => {
                    warn!(
                        channel = %self.address,
                        expected = ?self.doc.channel_type,
                        got = ?v.channel_type(),
                        "ignoring type-mismatched next value"
                    );
                },
            },
        }
    }

    /// Currently staged next value
    pub fn next_value(&self) -> Option<ChannelValue> {
        self.slots.lock().next_value.clone()
    }

    /// Promote `next_value` into `value`. Called once per global cycle by
    /// the registry pass; test harnesses may call it directly.
    pub fn next_process_image(&self) {
        let mut slots = self.slots.lock();
        slots.value = slots.next_value.clone();
    }

    /// Request a write. Any consumer may call this; the owning bridge
    /// consumes the request via [`Channel::get_next_write_value_and_reset`].
    pub fn set_next_write_value(&self, value: ChannelValue) -> EdgeResult<()> {
        if self.doc.access_mode != AccessMode::ReadWrite {
            return Err(EdgeError::InvalidAccessMode {
                channel: self.address.to_string(),
                mode: self.doc.access_mode.as_str().to_string(),
            });
        }
        let Some(coerced) = value.coerce_to(self.doc.channel_type) else {
            warn!(
                channel = %self.address,
                expected = ?self.doc.channel_type,
                got = ?value.channel_type(),
                "ignoring type-mismatched write request"
            );
            return Ok(());
        };
        let mut slots = self.slots.lock();
        if self.doc.mirror_write {
            slots.next_value = Some(coerced.clone());
        }
        slots.next_write_value = Some(coerced);
        Ok(())
    }

    /// Pending write request, left in place
    pub fn get_next_write_value(&self) -> Option<ChannelValue> {
        self.slots.lock().next_write_value.clone()
    }

    /// Pending write request, consumed atomically. Two calls without an
    /// intervening write return present-then-absent, which is what caps a
    /// staged value at one physical write.
    pub fn get_next_write_value_and_reset(&self) -> Option<ChannelValue> {
        self.slots.lock().next_write_value.take()
    }
}
