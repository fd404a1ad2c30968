//! Command envelope for asynchronously received commands
//!
//! Message-bus bridges receive commands out of band; each one is wrapped
//! with its expiration and kept per logical command type until it expires
//! or a newer command replaces it. An expired wrapper is treated as
//! absent, never applied-then-reverted.

use chrono::{DateTime, Utc};

use errors::{EdgeError, EdgeResult};

use crate::value::{ChannelType, ChannelValue};

/// Literal expiration token meaning "never expires"
pub const INFINITE_EXPIRATION: &str = "INFINITE";

/// Expiration marker of a received command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandExpiration {
    Infinite,
    At(DateTime<Utc>),
}

impl CommandExpiration {
    /// Parse the wire representation: the literal `INFINITE`, an RFC 3339
    /// timestamp, or unix seconds.
    pub fn parse(s: &str) -> EdgeResult<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case(INFINITE_EXPIRATION) {
            return Ok(Self::Infinite);
        }
        if let Ok(ts) = s.parse::<i64>() {
            return DateTime::<Utc>::from_timestamp(ts, 0)
                .map(Self::At)
                .ok_or_else(|| EdgeError::conversion(format!("expiration out of range: {s}")));
        }
        DateTime::parse_from_rfc3339(s)
            .map(|dt| Self::At(dt.with_timezone(&Utc)))
            .map_err(|e| EdgeError::conversion(format!("invalid expiration {s:?}: {e}")))
    }
}

/// A received command value plus its expiration
#[derive(Debug, Clone, PartialEq)]
pub struct CommandWrapper {
    value: String,
    expiration: CommandExpiration,
}

impl CommandWrapper {
    pub fn new(value: impl Into<String>, expiration: &str) -> EdgeResult<Self> {
        Ok(Self {
            value: value.into(),
            expiration: CommandExpiration::parse(expiration)?,
        })
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expiration(&self) -> CommandExpiration {
        self.expiration
    }

    pub fn is_infinite(&self) -> bool {
        self.expiration == CommandExpiration::Infinite
    }

    /// Expired commands are treated as absent by the receiving task
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expiration {
            CommandExpiration::Infinite => false,
            CommandExpiration::At(t) => now > t,
        }
    }

    /// "Legit" check: the payload parses into the target channel's type.
    /// Run before dispatch so malformed commands never reach a channel.
    pub fn value_legit_for(&self, target: ChannelType) -> bool {
        self.typed_value(target).is_some()
    }

    /// The payload parsed into the target channel's type
    pub fn typed_value(&self, target: ChannelType) -> Option<ChannelValue> {
        let v = self.value.trim();
        match target {
            ChannelType::Bool => match v.to_ascii_lowercase().as_str() {
                "true" | "1" | "on" => Some(ChannelValue::Bool(true)),
                "false" | "0" | "off" => Some(ChannelValue::Bool(false)),
                _ => None,
            },
            ChannelType::Int => v.parse::<i64>().ok().map(ChannelValue::Int),
            ChannelType::Float => v.parse::<f64>().ok().map(ChannelValue::Float),
            ChannelType::Text => Some(ChannelValue::Text(v.to_string())),
        }
    }
}
