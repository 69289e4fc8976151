use crate::error::ProtocolError;

/// Validate request text against the configured length limit
pub fn validate_text(text: &str, max_len: usize) -> Result<(), ProtocolError> {
    if text.trim().is_empty() {
        return Err(ProtocolError::InvalidInput("Text cannot be empty".to_string()));
    }
    let len = text.chars().count();
    if len > max_len {
        return Err(ProtocolError::InvalidInput(format!(
            "Text too long ({len} characters, max {max_len})"
        )));
    }
    Ok(())
}

/// Validate language code format (e.g. en, zh-cn, en_US)
pub fn validate_language(language: &str) -> Result<(), ProtocolError> {
    if is_valid_language_code(language) {
        Ok(())
    } else {
        Err(ProtocolError::InvalidInput(format!(
            "Invalid language code format: {language}. Expected ll, ll-cc or ll_CC (e.g. en, zh-cn, en_US)"
        )))
    }
}

/// Validate an uploaded reference voice blob
pub fn validate_voice_reference(bytes: &[u8], max_bytes: usize) -> Result<(), ProtocolError> {
    if bytes.is_empty() {
        return Err(ProtocolError::InvalidInput(
            "Voice reference cannot be empty".to_string(),
        ));
    }
    if bytes.len() > max_bytes {
        return Err(ProtocolError::InvalidInput(format!(
            "Voice reference too large ({} bytes, max {max_bytes})",
            bytes.len()
        )));
    }
    Ok(())
}

fn is_valid_language_code(code: &str) -> bool {
    // Two lowercase letters, optionally followed by '-' or '_' and a two-letter region
    let mut parts = code.splitn(2, ['-', '_']);
    let lang = parts.next().unwrap_or_default();
    let lang_ok = lang.len() == 2 && lang.chars().all(|c| c.is_ascii_lowercase());
    match parts.next() {
        None => lang_ok,
        Some(region) => {
            lang_ok && region.len() == 2 && region.chars().all(|c| c.is_ascii_alphabetic())
        }
    }
}
