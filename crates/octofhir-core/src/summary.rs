//! Per-resource-type fetch status and the immutable summary of a sync run.

use crate::fhir::ResourceType;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Lifecycle of one resource type within a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchState {
    Pending,
    InProgress,
    Completed,
    Error,
}

impl FetchState {
    /// Whether the step has finished, successfully or not.
    pub fn is_finished(&self) -> bool {
        matches!(self, FetchState::Completed | FetchState::Error)
    }
}

impl std::fmt::Display for FetchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchState::Pending => write!(f, "pending"),
            FetchState::InProgress => write!(f, "in_progress"),
            FetchState::Completed => write!(f, "completed"),
            FetchState::Error => write!(f, "error"),
        }
    }
}

/// Status of one resource type during a sync run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchStatus {
    pub resource_type: ResourceType,
    pub state: FetchState,
    /// Records observed (persisted) for this type so far.
    pub count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Fraction in `[0, 1]`.
    pub progress: f32,
}

impl FetchStatus {
    pub fn pending(resource_type: ResourceType) -> Self {
        Self {
            resource_type,
            state: FetchState::Pending,
            count: 0,
            error: None,
            progress: 0.0,
        }
    }

    pub fn start(&mut self) {
        self.state = FetchState::InProgress;
        self.count = 0;
        self.error = None;
        self.progress = 0.0;
    }

    /// Records page-level progress while in progress.
    pub fn advance(&mut self, count: usize, expected_total: Option<usize>) {
        self.count = count;
        self.progress = match expected_total {
            Some(total) if total > 0 => (count as f32 / total as f32).clamp(0.0, 1.0),
            _ => self.progress,
        };
    }

    pub fn complete(&mut self, count: usize) {
        self.state = FetchState::Completed;
        self.count = count;
        self.error = None;
        self.progress = 1.0;
    }

    pub fn fail(&mut self, message: impl Into<String>, count: usize) {
        self.state = FetchState::Error;
        self.count = count;
        self.error = Some(message.into());
        self.progress = 1.0;
    }
}

/// Immutable snapshot taken when a sync run ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchSummary {
    pub patient_id: String,
    /// Record counts per finished resource type, in sync order.
    pub resource_counts: IndexMap<ResourceType, usize>,
    pub total: usize,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
    /// Error messages in the order they were encountered.
    pub errors: Vec<String>,
    /// `true` when the run stopped at a step boundary before all types were fetched.
    pub cancelled: bool,
    /// Whether the demographic fetch actually produced a Patient record.
    ///
    /// The Patient count is always reported as 1 once a patient id is in scope;
    /// this flag carries the real outcome of that fetch.
    pub patient_fetched: bool,
}

impl FetchSummary {
    /// Builds a summary from the final statuses. Only finished steps are counted.
    pub fn from_statuses<'a>(
        patient_id: impl Into<String>,
        statuses: impl IntoIterator<Item = &'a FetchStatus>,
        cancelled: bool,
        patient_fetched: bool,
    ) -> Self {
        let mut resource_counts = IndexMap::new();
        let mut errors = Vec::new();

        for status in statuses {
            if !status.state.is_finished() {
                continue;
            }
            resource_counts.insert(status.resource_type, status.count);
            if let Some(error) = &status.error {
                errors.push(format!("{}: {}", status.resource_type, error));
            }
        }

        let total = resource_counts.values().sum();
        Self {
            patient_id: patient_id.into(),
            resource_counts,
            total,
            completed_at: OffsetDateTime::now_utc(),
            errors,
            cancelled,
            patient_fetched,
        }
    }

    pub fn count(&self, resource_type: ResourceType) -> usize {
        self.resource_counts.get(&resource_type).copied().unwrap_or(0)
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && !self.cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        let mut status = FetchStatus::pending(ResourceType::Observation);
        assert_eq!(status.state, FetchState::Pending);

        status.start();
        status.advance(25, Some(100));
        assert_eq!(status.state, FetchState::InProgress);
        assert!((status.progress - 0.25).abs() < f32::EPSILON);

        status.complete(100);
        assert_eq!(status.state, FetchState::Completed);
        assert_eq!(status.progress, 1.0);
    }

    #[test]
    fn test_fail_keeps_partial_count() {
        let mut status = FetchStatus::pending(ResourceType::Encounter);
        status.start();
        status.fail("rate limited", 20);
        assert_eq!(status.state, FetchState::Error);
        assert_eq!(status.count, 20);
        assert_eq!(status.error.as_deref(), Some("rate limited"));
    }

    #[test]
    fn test_summary_skips_unfinished_steps() {
        let mut patient = FetchStatus::pending(ResourceType::Patient);
        patient.complete(1);
        let mut encounter = FetchStatus::pending(ResourceType::Encounter);
        encounter.fail("boom", 0);
        let observation = FetchStatus::pending(ResourceType::Observation);

        let summary =
            FetchSummary::from_statuses("p1", [&patient, &encounter, &observation], true, true);

        assert_eq!(summary.resource_counts.len(), 2);
        assert_eq!(summary.count(ResourceType::Patient), 1);
        assert_eq!(summary.count(ResourceType::Observation), 0);
        assert_eq!(summary.total, 1);
        assert_eq!(summary.errors, vec!["Encounter: boom".to_string()]);
        assert!(summary.cancelled);
        assert!(!summary.is_clean());
    }

    #[test]
    fn test_summary_serializes_camel_case() {
        let mut patient = FetchStatus::pending(ResourceType::Patient);
        patient.complete(1);
        let summary = FetchSummary::from_statuses("p1", [&patient], false, false);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["resourceCounts"]["Patient"], 1);
        assert_eq!(json["patientFetched"], false);

        let back: FetchSummary = serde_json::from_value(json).unwrap();
        assert_eq!(back.count(ResourceType::Patient), 1);
    }
}
