//! Pure value conversion helpers shared by the protocol executors
//!
//! Conversions are side-effect free. Failures here are conversion errors,
//! distinct from transport errors: the scheduler never retries them,
//! because they will fail the same way on every attempt.

use edge_core::{ChannelType, ChannelValue};
use errors::{EdgeError, EdgeResult};

/// Raw wire value → engineering value with a scale factor applied
pub fn scale_raw(raw: f64, scale: f64) -> f64 {
    raw * scale
}

/// Engineering value → raw wire value, inverting the scale factor
pub fn unscale(value: f64, scale: f64) -> EdgeResult<f64> {
    if scale == 0.0 {
        return Err(EdgeError::conversion("scale factor must not be zero"));
    }
    Ok(value / scale)
}

/// Numeric payload of a channel value, for codecs that only move numbers
pub fn value_as_f64(value: &ChannelValue) -> EdgeResult<f64> {
    value
        .as_f64()
        .or_else(|| value.as_i64().map(|i| i as f64))
        .ok_or_else(|| {
            EdgeError::conversion(format!(
                "cannot represent {:?} value as a number",
                value.channel_type()
            ))
        })
}

/// Parse a textual wire payload into the declared channel type
pub fn parse_text(payload: &str, target: ChannelType) -> EdgeResult<ChannelValue> {
    let trimmed = payload.trim();
    let parsed = match target {
        ChannelType::Bool => match trimmed.to_ascii_lowercase().as_str() {
            "true" | "1" | "on" => Some(ChannelValue::Bool(true)),
            "false" | "0" | "off" => Some(ChannelValue::Bool(false)),
            _ => None,
        },
        ChannelType::Int => trimmed.parse::<i64>().ok().map(ChannelValue::Int),
        ChannelType::Float => trimmed.parse::<f64>().ok().map(ChannelValue::Float),
        ChannelType::Text => Some(ChannelValue::Text(trimmed.to_string())),
    };
    parsed.ok_or_else(|| {
        EdgeError::conversion(format!("payload {trimmed:?} is not a valid {target:?}"))
    })
}

/// Render a channel value as a wire payload
pub fn render_text(value: &ChannelValue) -> String {
    value.to_string()
}
