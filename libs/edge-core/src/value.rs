//! Typed channel values and physical units

use serde::{Deserialize, Serialize};

/// Declared type of a channel.
///
/// Enumerations are declared as `Int` channels carrying the ordinal; the
/// mapping to names lives with the declaring component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelType {
    Bool,
    Int,
    Float,
    Text,
}

/// A value held by a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChannelValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ChannelValue {
    /// The type this value carries natively
    pub fn channel_type(&self) -> ChannelType {
        match self {
            Self::Bool(_) => ChannelType::Bool,
            Self::Int(_) => ChannelType::Int,
            Self::Float(_) => ChannelType::Float,
            Self::Text(_) => ChannelType::Text,
        }
    }

    /// Coerce into the declared channel type.
    ///
    /// Numeric cross-assignment (int to float channels and back) is
    /// accepted so generic consumers keep working; everything else is a
    /// mismatch and returns `None`. Callers treat `None` as "log and
    /// ignore", not as a hard failure.
    pub fn coerce_to(&self, target: ChannelType) -> Option<ChannelValue> {
        match (self, target) {
            (Self::Bool(b), ChannelType::Bool) => Some(Self::Bool(*b)),
            (Self::Int(i), ChannelType::Int) => Some(Self::Int(*i)),
            (Self::Float(f), ChannelType::Float) => Some(Self::Float(*f)),
            (Self::Text(s), ChannelType::Text) => Some(Self::Text(s.clone())),
            (Self::Int(i), ChannelType::Float) => Some(Self::Float(*i as f64)),
            (Self::Float(f), ChannelType::Int) => Some(Self::Int(f.round() as i64)),
            (Self::Bool(b), ChannelType::Int) => Some(Self::Int(i64::from(*b))),
            (Self::Int(i), ChannelType::Bool) => Some(Self::Bool(*i != 0)),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) => Some(f.round() as i64),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChannelValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Physical unit attached to a channel declaration or reported by a
/// metering record. The dynamic record resolver matches on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Unit {
    #[default]
    None,
    DegreeCelsius,
    Watt,
    KilowattHour,
    CubicMeter,
    CubicMeterPerHour,
    Bar,
    Percent,
    Hour,
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "",
            Self::DegreeCelsius => "°C",
            Self::Watt => "W",
            Self::KilowattHour => "kWh",
            Self::CubicMeter => "m³",
            Self::CubicMeterPerHour => "m³/h",
            Self::Bar => "bar",
            Self::Percent => "%",
            Self::Hour => "h",
        };
        write!(f, "{s}")
    }
}
