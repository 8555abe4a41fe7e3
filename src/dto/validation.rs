//! Validation helpers for DTOs.

use validator::ValidationError;

/// Validates that a chat nickname contains only ASCII letters, digits and underscores.
///
/// # Examples
///
/// ```ignore
/// validate_username("ada_99")       // Ok
/// validate_username("ada lovelace") // Err - space
/// validate_username("ädä")          // Err - not ASCII
/// ```
pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        let mut err = ValidationError::new("username_format");
        err.message =
            Some("Username may only contain letters, digits and underscores".into());
        return Err(err);
    }

    Ok(())
}
