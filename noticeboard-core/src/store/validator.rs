//! Content sanitization for incoming messages

use super::errors::ValidationError;

/// Largest accepted message body, in UTF-8 bytes (100 KiB)
pub const MAX_CONTENT_BYTES: usize = 100 * 1024;

/// Clean user supplied text before it is signed and stored
///
/// Drops every character below U+0020 except `\n`, enforces the size limit
/// on what remains, then trims surrounding whitespace. Applying it twice
/// yields the same text.
pub fn sanitize(content: &str) -> Result<String, ValidationError> {
    if content.is_empty() {
        return Err(ValidationError::Empty);
    }

    let stripped: String = content
        .chars()
        .filter(|&c| c >= ' ' || c == '\n')
        .collect();

    if stripped.len() > MAX_CONTENT_BYTES {
        return Err(ValidationError::TooLarge {
            size: stripped.len(),
            limit: MAX_CONTENT_BYTES,
        });
    }

    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty);
    }

    Ok(trimmed.to_string())
}

/// Same as [`sanitize`] for raw input that may not be text at all
pub fn sanitize_bytes(content: &[u8]) -> Result<String, ValidationError> {
    let text = std::str::from_utf8(content).map_err(|_| ValidationError::NotText)?;
    sanitize(text)
}
