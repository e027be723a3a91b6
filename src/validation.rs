//! Input validation for resource names and configuration values.
//!
//! Every check here runs before any remote call, so malformed configuration
//! surfaces immediately.

use crate::{Result, VaultwrightError};

/// Maximum length of a key, secret, certificate or issuer name.
const MAX_NESTED_ITEM_NAME_LENGTH: usize = 127;

/// Validates a Key Vault name.
///
/// Vault names are 3-24 characters, start with a letter, contain only
/// alphanumerics and dashes, and have no consecutive or trailing dashes.
///
/// # Example
///
/// ```
/// use vaultwright::validation::validate_vault_name;
///
/// assert!(validate_vault_name("kv-prod-01").is_ok());
/// assert!(validate_vault_name("1vault").is_err());
/// assert!(validate_vault_name("vault--name").is_err());
/// ```
pub fn validate_vault_name(name: &str) -> Result<()> {
    if !(3..=24).contains(&name.len()) {
        return Err(VaultwrightError::InvalidName(format!(
            "vault name {name:?} must be between 3 and 24 characters"
        )));
    }
    validate_dns_label(name, "vault")
}

/// Validates a managed HSM name (same shape as a vault name).
pub fn validate_managed_hsm_name(name: &str) -> Result<()> {
    if !(3..=24).contains(&name.len()) {
        return Err(VaultwrightError::InvalidName(format!(
            "managed HSM name {name:?} must be between 3 and 24 characters"
        )));
    }
    validate_dns_label(name, "managed HSM")
}

fn validate_dns_label(name: &str, what: &str) -> Result<()> {
    if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Err(VaultwrightError::InvalidName(format!(
            "{what} name {name:?} must start with a letter"
        )));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(VaultwrightError::InvalidName(format!(
            "{what} name {name:?} may only contain alphanumeric characters and dashes"
        )));
    }
    if name.contains("--") {
        return Err(VaultwrightError::InvalidName(format!(
            "{what} name {name:?} must not contain consecutive dashes"
        )));
    }
    if name.ends_with('-') {
        return Err(VaultwrightError::InvalidName(format!(
            "{what} name {name:?} must end with a letter or digit"
        )));
    }
    Ok(())
}

/// Validates the name of a key, secret, certificate or certificate issuer.
///
/// # Example
///
/// ```
/// use vaultwright::validation::validate_nested_item_name;
///
/// assert!(validate_nested_item_name("db-password").is_ok());
/// assert!(validate_nested_item_name("db_password").is_err());
/// assert!(validate_nested_item_name("").is_err());
/// ```
pub fn validate_nested_item_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(VaultwrightError::InvalidName(
            "name cannot be empty".to_string(),
        ));
    }

    if name.len() > MAX_NESTED_ITEM_NAME_LENGTH {
        return Err(VaultwrightError::InvalidName(format!(
            "name exceeds maximum length of {} characters",
            MAX_NESTED_ITEM_NAME_LENGTH
        )));
    }

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(VaultwrightError::InvalidName(format!(
            "{name:?} may only contain alphanumeric characters and dashes"
        )));
    }

    Ok(())
}

/// Validates a managed storage account or SAS definition name.
pub fn validate_storage_item_name(name: &str) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(VaultwrightError::InvalidName(format!(
            "{name:?} may only contain alphanumeric characters"
        )));
    }
    Ok(())
}

/// Validates that a value is a UUID.
pub fn validate_uuid(field: &str, value: &str) -> Result<()> {
    uuid::Uuid::parse_str(value)
        .map(|_| ())
        .map_err(|_| VaultwrightError::InvalidConfig(format!("{field} {value:?} is not a valid UUID")))
}

/// Validates the soft-delete retention window (7 to 90 days).
pub fn validate_soft_delete_retention_days(days: u32) -> Result<()> {
    if !(7..=90).contains(&days) {
        return Err(VaultwrightError::InvalidConfig(format!(
            "soft_delete_retention_days must be between 7 and 90, got {days}"
        )));
    }
    Ok(())
}

/// Validates an ISO-8601 duration such as `P90D` or `PT12H`.
///
/// # Example
///
/// ```
/// use vaultwright::validation::validate_iso8601_duration;
///
/// assert!(validate_iso8601_duration("P1Y2M10DT2H30M").is_ok());
/// assert!(validate_iso8601_duration("90 days").is_err());
/// ```
pub fn validate_iso8601_duration(value: &str) -> Result<()> {
    let invalid = || {
        VaultwrightError::InvalidConfig(format!("{value:?} is not a valid ISO-8601 duration"))
    };

    let rest = value.strip_prefix('P').ok_or_else(invalid)?;
    if rest.is_empty() {
        return Err(invalid());
    }

    let (date, time) = match rest.split_once('T') {
        Some((_, "")) => return Err(invalid()),
        Some((date, time)) => (date, Some(time)),
        None => (rest, None),
    };

    let mut components = 0;
    components += count_components(date, &['Y', 'M', 'W', 'D']).ok_or_else(invalid)?;
    if let Some(time) = time {
        components += count_components(time, &['H', 'M', 'S']).ok_or_else(invalid)?;
    }

    if components == 0 {
        return Err(invalid());
    }
    Ok(())
}

/// Counts `<digits><designator>` pairs, requiring designators in order.
fn count_components(part: &str, designators: &[char]) -> Option<usize> {
    let mut count = 0;
    let mut digits = String::new();
    let mut next = 0;

    for c in part.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let position = designators[next..].iter().position(|d| *d == c)?;
        if digits.is_empty() {
            return None;
        }
        digits.clear();
        next += position + 1;
        count += 1;
    }

    digits.is_empty().then_some(count)
}

/// Validates permission names against an allowed set (case-insensitive).
pub fn validate_permissions(field: &str, values: &[String], allowed: &[&str]) -> Result<()> {
    for value in values {
        if !allowed.iter().any(|a| a.eq_ignore_ascii_case(value)) {
            return Err(VaultwrightError::InvalidConfig(format!(
                "{field} contains unknown permission {value:?} (allowed: {})",
                allowed.join(", ")
            )));
        }
    }
    Ok(())
}
