use crate::error::{CoreError, Result};

/// Maximum length of a FHIR logical id.
pub const MAX_ID_LEN: usize = 64;

/// Validates a patient identifier against the FHIR `id` rules
/// (`[A-Za-z0-9\-\.]{1,64}`) and returns it trimmed.
pub fn validate_patient_id(id: &str) -> Result<&str> {
    let id = id.trim();
    if id.is_empty() {
        return Err(CoreError::malformed_id(id, "is empty"));
    }
    if id.len() > MAX_ID_LEN {
        return Err(CoreError::malformed_id(id, "is longer than 64 characters"));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
    {
        return Err(CoreError::malformed_id(
            id,
            "may only contain letters, digits, '-' and '.'",
        ));
    }
    Ok(id)
}
