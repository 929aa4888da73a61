use crate::error::ApiError;

/// Maximum text length for TTS and chat requests, in characters
const MAX_TEXT_LENGTH: usize = 10_000;
const MIN_SPEED: f32 = 0.25;
const MAX_SPEED: f32 = 4.0;
const MAX_CONVERSATION_ID_LENGTH: usize = 128;

/// Validate TTS request
pub fn validate_tts_request(text: &str, speed: Option<f32>) -> Result<(), ApiError> {
    validate_text(text, "Text")?;
    validate_speed(speed)
}

pub fn validate_speed(speed: Option<f32>) -> Result<(), ApiError> {
    if let Some(speed) = speed {
        if !speed.is_finite() || !(MIN_SPEED..=MAX_SPEED).contains(&speed) {
            return Err(ApiError::InvalidInput(format!(
                "Speed must be between {MIN_SPEED} and {MAX_SPEED}"
            )));
        }
    }
    Ok(())
}

/// Validate chat request
pub fn validate_chat_request(message: &str, conversation_id: Option<&str>) -> Result<(), ApiError> {
    validate_text(message, "Message")?;
    if let Some(id) = conversation_id {
        validate_conversation_id(id)?;
    }
    Ok(())
}

/// Conversation ids are alphanumeric plus `-` and `_`.
pub fn validate_conversation_id(id: &str) -> Result<(), ApiError> {
    if id.is_empty() || id.len() > MAX_CONVERSATION_ID_LENGTH {
        return Err(ApiError::InvalidInput(format!(
            "Conversation id must be 1 to {MAX_CONVERSATION_ID_LENGTH} characters"
        )));
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(ApiError::InvalidInput(
            "Conversation id may only contain letters, digits, '-' and '_'".to_string(),
        ));
    }
    Ok(())
}

fn validate_text(text: &str, what: &str) -> Result<(), ApiError> {
    if text.trim().is_empty() {
        return Err(ApiError::InvalidInput(format!("{what} cannot be empty")));
    }
    if text.chars().count() > MAX_TEXT_LENGTH {
        return Err(ApiError::InvalidInput(format!(
            "{what} too long (max {MAX_TEXT_LENGTH} characters)"
        )));
    }
    Ok(())
}
