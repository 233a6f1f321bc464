//! Input validation for camera configuration coming from external stores.
//!
//! Source URIs end up on an ffmpeg command line, so they are screened for shell
//! metacharacters and length before any worker is started.

use anyhow::{anyhow, Result};

/// Maximum length for camera identifiers
pub const MAX_ID_LENGTH: usize = 256;

/// Maximum length for source URIs
pub const MAX_URI_LENGTH: usize = 4096;

pub fn validate_length(value: &str, max_length: usize, field_name: &str) -> Result<()> {
    if value.len() > max_length {
        return Err(anyhow!(
            "{} exceeds maximum length of {} bytes (got {})",
            field_name,
            max_length,
            value.len()
        ));
    }
    Ok(())
}

pub fn validate_non_empty(value: &str, field_name: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(anyhow!("{} cannot be empty", field_name));
    }
    Ok(())
}

/// Camera ids are used as map keys, metric labels and URL path segments.
pub fn validate_id(id: &str, field_name: &str) -> Result<()> {
    validate_non_empty(id, field_name)?;
    validate_length(id, MAX_ID_LENGTH, field_name)?;

    if id.contains("..") || id.contains('/') || id.contains('\\') {
        return Err(anyhow!(
            "{} contains invalid characters (no path separators or '..' allowed)",
            field_name
        ));
    }

    Ok(())
}

pub fn validate_uri(uri: &str, field_name: &str) -> Result<()> {
    validate_non_empty(uri, field_name)?;
    validate_length(uri, MAX_URI_LENGTH, field_name)?;

    let dangerous_chars = ['`', '$', ';', '|', '&', '\n', '\r'];
    if uri.chars().any(|c| dangerous_chars.contains(&c)) {
        return Err(anyhow!("{} contains shell metacharacters", field_name));
    }

    Ok(())
}

pub fn validate_range<T: PartialOrd + std::fmt::Display>(
    value: T,
    min: T,
    max: T,
    field_name: &str,
) -> Result<()> {
    if value < min || value > max {
        return Err(anyhow!(
            "{} must be between {} and {}, got {}",
            field_name,
            min,
            max,
            value
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_id() {
        assert!(validate_id("1001", "camera_id").is_ok());
        assert!(validate_id("cam_north-01", "camera_id").is_ok());

        assert!(validate_id("", "camera_id").is_err());
        assert!(validate_id("  ", "camera_id").is_err());
        assert!(validate_id("../etc/passwd", "camera_id").is_err());
        assert!(validate_id(&"a".repeat(300), "camera_id").is_err());
    }

    #[test]
    fn test_validate_uri() {
        assert!(validate_uri("rtsp://admin:pw@10.0.0.5:554/Streaming/Channels/101", "uri").is_ok());
        assert!(validate_uri("/var/video/sample.mp4", "uri").is_ok());

        assert!(validate_uri("rtsp://cam`whoami`.local", "uri").is_err());
        assert!(validate_uri("rtsp://cam$(id).local", "uri").is_err());
        assert!(validate_uri(&"a".repeat(5000), "uri").is_err());
    }

    #[test]
    fn test_validate_range() {
        assert!(validate_range(0.5, 0.0, 1.0, "line").is_ok());
        assert!(validate_range(0.0, 0.0, 1.0, "line").is_ok());
        assert!(validate_range(-0.1, 0.0, 1.0, "line").is_err());
    }
}
