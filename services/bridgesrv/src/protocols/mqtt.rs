//! MQTT bridge: telemetry publication and asynchronous commands
//!
//! Publish tasks push channel values to their topics each cycle; subscribe
//! tasks drain their topic queue and feed command envelopes into a
//! per-command-type store. The newest command per type wins. Stored
//! commands are applied to the target component's channels on every cycle
//! until they expire, after a legit check against the channel type, so a
//! command survives the cycles between its arrival and its expiration.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use edge_core::{ChannelValue, CommandWrapper, Component, INFINITE_EXPIRATION};
use errors::{EdgeError, EdgeResult};

use crate::core::bridge::ProtocolExecutor;
use crate::core::convert::render_text;
use crate::core::task::{Task, TaskAddress};

/// MQTT delivery guarantee
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl Default for QoS {
    fn default() -> Self {
        Self::AtLeastOnce
    }
}

/// Topic-side configuration of one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttTaskConfig {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    /// Wrap published values in a JSON envelope carrying the publish time
    pub embed_timestamp: bool,
}

impl MqttTaskConfig {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            qos: QoS::default(),
            retain: false,
            embed_timestamp: false,
        }
    }

    #[must_use]
    pub fn qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    #[must_use]
    pub fn retain(mut self) -> Self {
        self.retain = true;
        self
    }

    #[must_use]
    pub fn embed_timestamp(mut self) -> Self {
        self.embed_timestamp = true;
        self
    }
}

/// One received message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: String,
}

/// Broker operations a driver must provide. `poll` drains the messages
/// received on a subscribed topic since the previous poll.
#[async_trait]
pub trait MqttTransport: Send + Sync {
    async fn publish(&mut self, topic: &str, payload: &str, qos: QoS, retain: bool)
        -> EdgeResult<()>;

    async fn poll(&mut self, topic: &str) -> EdgeResult<Vec<MqttMessage>>;
}

/// Wire format of a command message
#[derive(Debug, Deserialize)]
struct CommandPayload {
    command: String,
    value: String,
    #[serde(default = "default_expiration")]
    expiration: String,
}

fn default_expiration() -> String {
    INFINITE_EXPIRATION.to_string()
}

/// In-memory broker stub for tests and simulated deployments
#[derive(Debug, Default)]
pub struct SimulatedMqttTransport {
    queues: HashMap<String, Vec<MqttMessage>>,
    published: Vec<(String, String)>,
}

impl SimulatedMqttTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an inbound message for the next poll of `topic`
    pub fn inject(&mut self, topic: impl Into<String>, payload: impl Into<String>) {
        let topic = topic.into();
        let payload = payload.into();
        self.queues
            .entry(topic.clone())
            .or_default()
            .push(MqttMessage { topic, payload });
    }

    pub fn published(&self) -> &[(String, String)] {
        &self.published
    }
}

#[async_trait]
impl MqttTransport for SimulatedMqttTransport {
    async fn publish(
        &mut self,
        topic: &str,
        payload: &str,
        _qos: QoS,
        _retain: bool,
    ) -> EdgeResult<()> {
        self.published.push((topic.to_string(), payload.to_string()));
        Ok(())
    }

    async fn poll(&mut self, topic: &str) -> EdgeResult<Vec<MqttMessage>> {
        Ok(self.queues.remove(topic).unwrap_or_default())
    }
}

/// Maps publish/subscribe tasks onto an MQTT transport and keeps the
/// command store
pub struct MqttExecutor {
    transport: Mutex<Box<dyn MqttTransport>>,
    commands: parking_lot::Mutex<HashMap<String, CommandWrapper>>,
}

impl MqttExecutor {
    pub fn new(transport: Box<dyn MqttTransport>) -> Self {
        Self {
            transport: Mutex::new(transport),
            commands: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn config<'a>(&self, task: &'a Task) -> EdgeResult<&'a MqttTaskConfig> {
        match &task.address {
            TaskAddress::Mqtt(config) => Ok(config),
            other => Err(EdgeError::addressing(format!(
                "MQTT executor got a non-MQTT task address: {other:?}"
            ))),
        }
    }

    fn store_command(&self, payload: &str) {
        let parsed: CommandPayload = match serde_json::from_str(payload) {
            Ok(p) => p,
            Err(e) => {
                warn!(%payload, error = %e, "discarding malformed command payload");
                return;
            },
        };
        match CommandWrapper::new(parsed.value, &parsed.expiration) {
            Ok(wrapper) => {
                debug!(command = %parsed.command, "command received");
                self.commands.lock().insert(parsed.command, wrapper);
            },
            Err(e) => {
                warn!(command = %parsed.command, error = %e, "discarding command");
            },
        }
    }

    /// Pending (non-expired) command for a command type, if any
    pub fn command(&self, command_type: &str) -> Option<CommandWrapper> {
        let commands = self.commands.lock();
        commands
            .get(command_type)
            .filter(|c| !c.is_expired(Utc::now()))
            .cloned()
    }

    /// Apply every stored command whose name matches a channel of
    /// `component`. Expired commands are dropped; payloads that fail the
    /// legit check for the channel type are skipped. Returns the number of
    /// writes staged.
    pub fn react_to_commands(&self, component: &Component) -> usize {
        let now = Utc::now();
        let mut commands = self.commands.lock();
        commands.retain(|command_type, wrapper| {
            if wrapper.is_expired(now) {
                debug!(command = %command_type, "command expired");
                return false;
            }
            true
        });

        let mut applied = 0;
        for (command_type, wrapper) in commands.iter() {
            let Ok(channel) = component.channel(command_type) else {
                continue;
            };
            let Some(value) = wrapper.typed_value(channel.channel_type()) else {
                warn!(
                    command = %command_type,
                    value = %wrapper.value(),
                    "command value fails legit check for target channel"
                );
                continue;
            };
            match channel.set_next_write_value(value) {
                Ok(()) => applied += 1,
                Err(e) => warn!(command = %command_type, error = %e, "command not applied"),
            }
        }
        applied
    }
}

#[async_trait]
impl ProtocolExecutor for MqttExecutor {
    fn protocol(&self) -> &'static str {
        "mqtt"
    }

    /// A subscribe poll. New messages feed the command store and stage the
    /// newest payload on the channel; a quiet topic keeps the previously
    /// staged value instead of going undefined.
    async fn execute_read(&self, task: &mut Task) -> EdgeResult<Option<ChannelValue>> {
        let topic = self.config(task)?.topic.clone();
        let messages = self.transport.lock().await.poll(&topic).await?;

        for message in &messages {
            self.store_command(&message.payload);
        }
        Ok(messages
            .last()
            .map(|m| ChannelValue::Text(m.payload.clone()))
            .or_else(|| task.channel.next_value()))
    }

    async fn execute_write(&self, task: &mut Task, value: ChannelValue) -> EdgeResult<()> {
        let config = self.config(task)?.clone();
        let payload = if config.embed_timestamp {
            json!({
                "value": render_text(&value),
                "time": Utc::now().to_rfc3339(),
            })
            .to_string()
        } else {
            render_text(&value)
        };
        self.transport
            .lock()
            .await
            .publish(&config.topic, &payload, config.qos, config.retain)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Duration as ChronoDuration;

    use std::sync::Arc;

    use edge_core::{
        AccessMode, Channel, ChannelAddress, ChannelDecl, ChannelType, Component,
        ComponentRegistry, Doc,
    };

    use crate::core::task::{Priority, TaskDirection};

    fn subscribe_task(topic: &str) -> Task {
        let channel = Channel::new(
            ChannelAddress::new("cloud0", "LastMessage"),
            Doc::of(ChannelType::Text),
        );
        Task::new(
            channel,
            TaskAddress::Mqtt(MqttTaskConfig::new(topic)),
            TaskDirection::Read,
            Priority::Urgent,
            Duration::ZERO,
        )
    }

    fn command_component() -> Arc<Component> {
        let registry = ComponentRegistry::new();
        registry
            .activate(
                "ess0",
                vec![ChannelDecl::new(
                    "SetActivePower",
                    Doc::of(ChannelType::Int).access_mode(AccessMode::ReadWrite),
                )],
            )
            .unwrap()
    }

    #[tokio::test]
    async fn test_command_stored_and_applied() {
        let mut sim = SimulatedMqttTransport::new();
        sim.inject(
            "edge/commands",
            r#"{"command":"SetActivePower","value":"5000","expiration":"INFINITE"}"#,
        );
        let exec = MqttExecutor::new(Box::new(sim));
        let mut task = subscribe_task("edge/commands");

        exec.execute_read(&mut task).await.unwrap();

        let component = command_component();
        assert_eq!(exec.react_to_commands(&component), 1);
        let channel = component.channel("SetActivePower").unwrap();
        assert_eq!(
            channel.get_next_write_value_and_reset(),
            Some(ChannelValue::Int(5000))
        );
    }

    #[tokio::test]
    async fn test_newer_command_replaces_older() {
        let mut sim = SimulatedMqttTransport::new();
        sim.inject(
            "edge/commands",
            r#"{"command":"SetActivePower","value":"1000"}"#,
        );
        sim.inject(
            "edge/commands",
            r#"{"command":"SetActivePower","value":"2000"}"#,
        );
        let exec = MqttExecutor::new(Box::new(sim));
        let mut task = subscribe_task("edge/commands");

        exec.execute_read(&mut task).await.unwrap();
        assert_eq!(
            exec.command("SetActivePower").map(|c| c.value().to_string()),
            Some("2000".to_string())
        );
    }

    #[tokio::test]
    async fn test_expired_command_dropped_not_applied() {
        let past = (Utc::now() - ChronoDuration::seconds(5)).to_rfc3339();
        let mut sim = SimulatedMqttTransport::new();
        sim.inject(
            "edge/commands",
            format!(r#"{{"command":"SetActivePower","value":"5000","expiration":"{past}"}}"#),
        );
        let exec = MqttExecutor::new(Box::new(sim));
        let mut task = subscribe_task("edge/commands");

        exec.execute_read(&mut task).await.unwrap();

        let component = command_component();
        assert_eq!(exec.react_to_commands(&component), 0);
        assert_eq!(
            component
                .channel("SetActivePower")
                .unwrap()
                .get_next_write_value(),
            None
        );
    }

    #[tokio::test]
    async fn test_illegit_command_skipped() {
        let mut sim = SimulatedMqttTransport::new();
        sim.inject(
            "edge/commands",
            r#"{"command":"SetActivePower","value":"lots"}"#,
        );
        let exec = MqttExecutor::new(Box::new(sim));
        let mut task = subscribe_task("edge/commands");

        exec.execute_read(&mut task).await.unwrap();
        assert_eq!(exec.react_to_commands(&command_component()), 0);
    }

    #[tokio::test]
    async fn test_quiet_topic_keeps_staged_value() {
        let exec = MqttExecutor::new(Box::new(SimulatedMqttTransport::new()));
        let mut task = subscribe_task("edge/commands");
        task.channel
            .set_next_value(Some(ChannelValue::Text("previous".into())));

        let value = exec.execute_read(&mut task).await.unwrap();
        assert_eq!(value, Some(ChannelValue::Text("previous".into())));
    }

    /// Delegating transport that keeps the simulated broker inspectable
    /// after the executor boxes it
    struct SharedTransport(Arc<Mutex<SimulatedMqttTransport>>);

    #[async_trait]
    impl MqttTransport for SharedTransport {
        async fn publish(
            &mut self,
            topic: &str,
            payload: &str,
            qos: QoS,
            retain: bool,
        ) -> EdgeResult<()> {
            self.0.lock().await.publish(topic, payload, qos, retain).await
        }

        async fn poll(&mut self, topic: &str) -> EdgeResult<Vec<MqttMessage>> {
            self.0.lock().await.poll(topic).await
        }
    }

    #[tokio::test]
    async fn test_publish_with_timestamp_envelope() {
        let broker = Arc::new(Mutex::new(SimulatedMqttTransport::new()));
        let exec = MqttExecutor::new(Box::new(SharedTransport(Arc::clone(&broker))));
        let channel = Channel::new(
            ChannelAddress::new("meter0", "Power"),
            Doc::of(ChannelType::Float),
        );
        let mut task = Task::new(
            channel,
            TaskAddress::Mqtt(MqttTaskConfig::new("edge/meter0/power").embed_timestamp()),
            TaskDirection::Write,
            Priority::High,
            Duration::ZERO,
        );

        exec.execute_write(&mut task, ChannelValue::Float(21.5))
            .await
            .unwrap();

        let broker = broker.lock().await;
        let (topic, payload) = &broker.published()[0];
        assert_eq!(topic, "edge/meter0/power");
        let envelope: serde_json::Value = serde_json::from_str(payload).unwrap();
        assert_eq!(envelope["value"], "21.5");
        assert!(envelope["time"].as_str().is_some());
    }
}
