//! Message validation rules.

use playhub_core::error::AppError;
use playhub_core::result::AppResult;

use super::types::ClientMessage;

/// Maximum allowed inbound frame size in bytes.
pub const MAX_FRAME_SIZE: usize = 65_536;

/// Parse and validate one inbound frame.
pub fn parse_inbound(raw: &str) -> AppResult<ClientMessage> {
    if raw.len() > MAX_FRAME_SIZE {
        return Err(AppError::validation(format!(
            "Message exceeds maximum size of {MAX_FRAME_SIZE} bytes"
        )));
    }
    if raw.trim().is_empty() {
        return Err(AppError::validation("Empty message"));
    }
    serde_json::from_str(raw)
        .map_err(|e| AppError::validation(format!("Failed to parse message: {e}")))
}

/// Validates channel name format.
pub fn validate_channel_name(channel: &str) -> AppResult<()> {
    if channel.is_empty() || channel.len() > 256 {
        return Err(AppError::validation("Invalid channel name length"));
    }

    if !channel
        .chars()
        .all(|c| c.is_alphanumeric() || c == ':' || c == '-' || c == '_' || c == '.')
    {
        return Err(AppError::validation(
            "Channel name contains invalid characters",
        ));
    }

    Ok(())
}

/// Validates chat text: non-blank and at most `max_len` characters.
pub fn validate_chat_text(text: &str, max_len: usize) -> AppResult<()> {
    if text.trim().is_empty() {
        return Err(AppError::validation("Message text is empty"));
    }
    if text.chars().count() > max_len {
        return Err(AppError::validation(format!(
            "Message text exceeds {max_len} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_garbage_and_unknown_types() {
        assert!(parse_inbound("").is_err());
        assert!(parse_inbound("{not json").is_err());
        assert!(parse_inbound(r#"{"type":"teleport"}"#).is_err());
        assert!(parse_inbound(r#"{"type":"ping","timestamp":5}"#).is_ok());
    }

    #[test]
    fn test_channel_and_text_rules() {
        assert!(validate_channel_name("room:lobby").is_ok());
        assert!(validate_channel_name("room lobby").is_err());
        assert!(validate_chat_text("  ", 10).is_err());
        assert!(validate_chat_text("hello", 4).is_err());
        assert!(validate_chat_text("héllo", 5).is_ok());
    }
}
