use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// FHIR resource types the gateway client knows how to sync and query.
///
/// The variant order is the declared sync order; see [`SUPPORTED_RESOURCE_TYPES`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceType {
    Patient,
    Encounter,
    Observation,
    MedicationStatement,
    Condition,
    AllergyIntolerance,
    Immunization,
    DiagnosticReport,
    DocumentReference,
    FamilyMemberHistory,
}

/// Resource types fetched by a full sync, in the order they are fetched.
pub const SUPPORTED_RESOURCE_TYPES: [ResourceType; 10] = [
    ResourceType::Patient,
    ResourceType::Encounter,
    ResourceType::Observation,
    ResourceType::MedicationStatement,
    ResourceType::Condition,
    ResourceType::AllergyIntolerance,
    ResourceType::Immunization,
    ResourceType::DiagnosticReport,
    ResourceType::DocumentReference,
    ResourceType::FamilyMemberHistory,
];

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Patient => "Patient",
            ResourceType::Encounter => "Encounter",
            ResourceType::Observation => "Observation",
            ResourceType::MedicationStatement => "MedicationStatement",
            ResourceType::Condition => "Condition",
            ResourceType::AllergyIntolerance => "AllergyIntolerance",
            ResourceType::Immunization => "Immunization",
            ResourceType::DiagnosticReport => "DiagnosticReport",
            ResourceType::DocumentReference => "DocumentReference",
            ResourceType::FamilyMemberHistory => "FamilyMemberHistory",
        }
    }

    /// Search parameter that scopes this type to one patient (`subject` or `patient`).
    ///
    /// `None` for `Patient`, which is read directly by id.
    pub fn patient_search_param(&self) -> Option<&'static str> {
        match self {
            ResourceType::Patient => None,
            ResourceType::AllergyIntolerance
            | ResourceType::Immunization
            | ResourceType::FamilyMemberHistory => Some("patient"),
            _ => Some("subject"),
        }
    }

    /// Date search parameter used for `ge`/`le` bounds and `_sort`.
    pub fn date_search_param(&self) -> Option<&'static str> {
        match self {
            ResourceType::Patient => None,
            ResourceType::MedicationStatement => Some("effective"),
            ResourceType::Condition => Some("onset-date"),
            _ => Some("date"),
        }
    }

    /// Token search parameter matched by code searches.
    pub fn code_search_param(&self) -> Option<&'static str> {
        match self {
            ResourceType::Patient => None,
            ResourceType::Encounter | ResourceType::DocumentReference => Some("type"),
            ResourceType::Immunization => Some("vaccine-code"),
            ResourceType::FamilyMemberHistory => Some("relationship"),
            _ => Some("code"),
        }
    }

    /// Dotted element paths holding the clinically relevant date, most specific first.
    pub fn date_paths(&self) -> &'static [&'static str] {
        match self {
            ResourceType::Patient => &["birthDate"],
            ResourceType::Encounter => &["period.start", "period.end"],
            ResourceType::Observation => &[
                "effectiveDateTime",
                "effectivePeriod.start",
                "effectiveInstant",
                "issued",
            ],
            ResourceType::MedicationStatement => {
                &["effectiveDateTime", "effectivePeriod.start", "dateAsserted"]
            }
            ResourceType::Condition => &["onsetDateTime", "onsetPeriod.start", "recordedDate"],
            ResourceType::AllergyIntolerance => &["recordedDate", "onsetDateTime"],
            ResourceType::Immunization => &["occurrenceDateTime", "recorded"],
            ResourceType::DiagnosticReport => {
                &["effectiveDateTime", "effectivePeriod.start", "issued"]
            }
            ResourceType::DocumentReference => &["date", "context.period.start"],
            ResourceType::FamilyMemberHistory => &["date"],
        }
    }

    /// Dotted element paths holding CodeableConcepts matched by code searches.
    pub fn code_paths(&self) -> &'static [&'static str] {
        match self {
            ResourceType::Patient => &[],
            ResourceType::Encounter => &["type"],
            ResourceType::MedicationStatement => &["medicationCodeableConcept"],
            ResourceType::Immunization => &["vaccineCode"],
            ResourceType::DocumentReference => &["type"],
            ResourceType::FamilyMemberHistory => &["relationship", "condition.code"],
            _ => &["code"],
        }
    }

    pub fn supports_code_search(&self) -> bool {
        !self.code_paths().is_empty()
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SUPPORTED_RESOURCE_TYPES
            .iter()
            .copied()
            .find(|rt| rt.as_str() == s)
            .ok_or_else(|| CoreError::unsupported_resource_type(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_type_from_str() {
        assert_eq!(ResourceType::from_str("Patient").unwrap(), ResourceType::Patient);
        assert_eq!(
            ResourceType::from_str("FamilyMemberHistory").unwrap(),
            ResourceType::FamilyMemberHistory
        );

        assert!(ResourceType::from_str("patient").is_err());
        assert!(ResourceType::from_str("Medication").is_err());
        assert!(ResourceType::from_str("").is_err());
    }

    #[test]
    fn test_all_supported_types_roundtrip() {
        for rt in SUPPORTED_RESOURCE_TYPES {
            let parsed = ResourceType::from_str(&rt.to_string()).unwrap();
            assert_eq!(parsed, rt);
        }
    }

    #[test]
    fn test_declared_order_starts_with_patient() {
        assert_eq!(SUPPORTED_RESOURCE_TYPES[0], ResourceType::Patient);
        assert_eq!(SUPPORTED_RESOURCE_TYPES[9], ResourceType::FamilyMemberHistory);

        let mut sorted = SUPPORTED_RESOURCE_TYPES;
        sorted.sort();
        assert_eq!(sorted, SUPPORTED_RESOURCE_TYPES);
    }

    #[test]
    fn test_patient_search_param() {
        assert_eq!(ResourceType::Patient.patient_search_param(), None);
        assert_eq!(ResourceType::Observation.patient_search_param(), Some("subject"));
        assert_eq!(ResourceType::Immunization.patient_search_param(), Some("patient"));
        assert_eq!(ResourceType::AllergyIntolerance.patient_search_param(), Some("patient"));
    }

    #[test]
    fn test_code_search_support() {
        assert!(!ResourceType::Patient.supports_code_search());
        assert!(ResourceType::Observation.supports_code_search());
        assert_eq!(ResourceType::Immunization.code_search_param(), Some("vaccine-code"));
    }

    #[test]
    fn test_resource_type_serialization() {
        let json = serde_json::to_string(&ResourceType::DiagnosticReport).unwrap();
        assert_eq!(json, "\"DiagnosticReport\"");

        let rt: ResourceType = serde_json::from_str("\"Condition\"").unwrap();
        assert_eq!(rt, ResourceType::Condition);
    }
}
