//! Input validation for identifiers, labels and numeric inputs
//! Keeps storage keys well-formed and rejects garbage before it reaches the store

use anyhow::{anyhow, Result};

/// Maximum lengths
pub const MAX_ID_LENGTH: usize = 128;
pub const MAX_NAME_LENGTH: usize = 256;
pub const MAX_DESCRIPTION_LENGTH: usize = 4_000;
pub const MAX_EVENT_LABEL_LENGTH: usize = 128;

/// Variant count bounds (variant ids default to single letters a..z)
pub const MIN_VARIANTS: usize = 2;
pub const MAX_VARIANTS: usize = 26;

/// Validate an identifier used as (part of) a storage key.
///
/// Allowed: alphanumeric, `-`, `_`, `@`, `.`. The `:` separator is reserved
/// for key composition.
pub fn validate_identifier(value: &str, field: &str) -> Result<()> {
    if value.is_empty() {
        return Err(anyhow!("{field} cannot be empty"));
    }

    if value.len() > MAX_ID_LENGTH {
        return Err(anyhow!(
            "{field} too long: {} chars (max: {MAX_ID_LENGTH})",
            value.len()
        ));
    }

    if !value
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '@' || c == '.')
    {
        return Err(anyhow!(
            "{field} contains invalid characters (allowed: alphanumeric, -, _, @, .)"
        ));
    }

    Ok(())
}

/// Validate a display name
pub fn validate_name(name: &str, field: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(anyhow!("{field} cannot be empty"));
    }

    if name.len() > MAX_NAME_LENGTH {
        return Err(anyhow!(
            "{field} too long: {} chars (max: {MAX_NAME_LENGTH})",
            name.len()
        ));
    }

    Ok(())
}

/// Validate an optional free-text description
pub fn validate_description(description: &str) -> Result<()> {
    if description.len() > MAX_DESCRIPTION_LENGTH {
        return Err(anyhow!(
            "description too long: {} chars (max: {MAX_DESCRIPTION_LENGTH})",
            description.len()
        ));
    }
    Ok(())
}

/// Validate a conversion event label
pub fn validate_event_label(event: &str) -> Result<()> {
    if event.trim().is_empty() {
        return Err(anyhow!("event label cannot be blank"));
    }

    if event.len() > MAX_EVENT_LABEL_LENGTH {
        return Err(anyhow!(
            "event label too long: {} chars (max: {MAX_EVENT_LABEL_LENGTH})",
            event.len()
        ));
    }

    if event.chars().any(|c| c.is_control()) {
        return Err(anyhow!("event label contains control characters"));
    }

    Ok(())
}

/// Validate a numeric conversion value
pub fn validate_conversion_value(value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(anyhow!("conversion value must be a finite number, got: {value}"));
    }
    Ok(())
}

/// Validate a confidence-level target (exclusive bounds)
pub fn validate_confidence_level(level: f64) -> Result<()> {
    if !(level > 0.5 && level < 1.0) {
        return Err(anyhow!(
            "confidence_level must be between 0.5 and 1.0 (exclusive), got: {level}"
        ));
    }
    Ok(())
}

/// Validate a single traffic percentage
pub fn validate_traffic_percentage(percentage: f64) -> Result<()> {
    if !percentage.is_finite() || !(0.0..=100.0).contains(&percentage) {
        return Err(anyhow!(
            "traffic percentage must be between 0 and 100, got: {percentage}"
        ));
    }
    Ok(())
}
