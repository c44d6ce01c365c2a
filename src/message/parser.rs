//! Message parser for agent frames

use crate::error::{GatewayError, Result};
use crate::types::messages::InboundMessage;

/// Largest text frame accepted from an agent
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Parse a JSON value into a typed [`InboundMessage`]
///
/// # Arguments
/// * `data` - Raw JSON value received from an agent
///
/// # Errors
/// Returns `GatewayError::MessageParse` if the value lacks `type` or `agentId`
/// or a known field has the wrong shape
pub fn parse_message(data: serde_json::Value) -> Result<InboundMessage> {
    serde_json::from_value(data.clone()).map_err(|e| {
        GatewayError::message_parse(format!("Failed to parse message: {e}"), Some(data))
    })
}

/// Parse a text frame as received on the agent socket
///
/// # Errors
/// Returns `GatewayError::MessageParse` if the frame is oversized, is not JSON,
/// or does not match the wire schema
pub fn parse_frame(frame: &str) -> Result<InboundMessage> {
    if frame.len() > MAX_FRAME_BYTES {
        return Err(GatewayError::message_parse(
            format!(
                "Frame of {} bytes exceeds maximum of {MAX_FRAME_BYTES} bytes",
                frame.len()
            ),
            None,
        ));
    }
    let value: serde_json::Value = serde_json::from_str(frame)
        .map_err(|e| GatewayError::message_parse(format!("Frame is not JSON: {e}"), None))?;
    parse_message(value)
}
