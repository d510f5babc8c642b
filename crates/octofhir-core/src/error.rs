//! Errors raised at the shared data model boundary.

/// Input rejected while parsing resource types, patient ids or dates.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// Not one of the resource types the client syncs and queries.
    #[error("'{0}' is not a supported resource type")]
    UnsupportedResourceType(String),

    #[error("patient id '{id}' {reason}")]
    MalformedId { id: String, reason: &'static str },

    /// Neither a FHIR `date` nor a `dateTime` with a date part.
    #[error("'{0}' is not a FHIR date")]
    MalformedDate(String),
}

impl CoreError {
    pub fn unsupported_resource_type(name: impl Into<String>) -> Self {
        Self::UnsupportedResourceType(name.into())
    }

    pub fn malformed_id(id: impl Into<String>, reason: &'static str) -> Self {
        Self::MalformedId {
            id: id.into(),
            reason,
        }
    }

    pub fn malformed_date(value: impl Into<String>) -> Self {
        Self::MalformedDate(value.into())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_input() {
        assert_eq!(
            CoreError::unsupported_resource_type("Medication").to_string(),
            "'Medication' is not a supported resource type"
        );
        assert_eq!(
            CoreError::malformed_id("Patient/1", "contains a '/'").to_string(),
            "patient id 'Patient/1' contains a '/'"
        );
        assert_eq!(
            CoreError::malformed_date("yesterday").to_string(),
            "'yesterday' is not a FHIR date"
        );
    }
}
