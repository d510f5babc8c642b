//! Structured query plans.
//!
//! A plan is a closed shape: unknown fields, unknown resource types and
//! filters the resource type cannot honour are rejected with
//! [`QueryError::UnrecognizedPlan`] instead of being probed for.

use std::fmt;

use octofhir_core::{DateRange, ResourceType};
use octofhir_storage::{CodeFilter, LocalQuery, SortOrder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::QueryError;

/// Where a plan may be answered from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Local,
    Remote,
    #[default]
    Either,
}

impl ExecutionMode {
    pub fn allows_local(&self) -> bool {
        matches!(self, ExecutionMode::Local | ExecutionMode::Either)
    }

    pub fn allows_remote(&self) -> bool {
        matches!(self, ExecutionMode::Remote | ExecutionMode::Either)
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Local => write!(f, "local"),
            ExecutionMode::Remote => write!(f, "remote"),
            ExecutionMode::Either => write!(f, "either"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PlanFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_search: Option<CodeFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortOrder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// 0-based position for "the Nth result" questions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_index: Option<usize>,
}

/// A validated, resource-type-scoped description of one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QueryPlan {
    pub resource_type: ResourceType,
    #[serde(default)]
    pub filters: PlanFilters,
    #[serde(default)]
    pub mode: ExecutionMode,
}

impl QueryPlan {
    pub fn new(resource_type: ResourceType) -> Self {
        Self {
            resource_type,
            filters: PlanFilters::default(),
            mode: ExecutionMode::default(),
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_filters(mut self, filters: PlanFilters) -> Self {
        self.filters = filters;
        self
    }

    /// Decodes and validates a plan produced by an interpreter.
    pub fn from_value(value: Value) -> Result<Self, QueryError> {
        let plan: QueryPlan = serde_json::from_value(value)
            .map_err(|e| QueryError::unrecognized_plan(e.to_string()))?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn from_json(json: &str) -> Result<Self, QueryError> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| QueryError::unrecognized_plan(e.to_string()))?;
        Self::from_value(value)
    }

    /// Checks the filters against what the resource type supports.
    pub fn validate(&self) -> Result<(), QueryError> {
        let rt = self.resource_type;
        if let Some(codes) = &self.filters.code_search {
            if !rt.supports_code_search() {
                return Err(QueryError::unrecognized_plan(format!(
                    "{rt} does not support code search"
                )));
            }
            if codes.codes.iter().all(|c| c.trim().is_empty()) {
                return Err(QueryError::unrecognized_plan("codeSearch.codes is empty"));
            }
        }
        if let Some(DateRange {
            start: Some(start),
            end: Some(end),
        }) = self.filters.date_range
            && start > end
        {
            return Err(QueryError::unrecognized_plan(format!(
                "dateRange starts after it ends ({start} > {end})"
            )));
        }
        if self.filters.limit == Some(0) {
            return Err(QueryError::unrecognized_plan("limit must be at least 1"));
        }
        Ok(())
    }

    /// The local store query equivalent to this plan.
    pub fn to_local_query(&self) -> LocalQuery {
        LocalQuery {
            codes: self.filters.code_search.clone(),
            date_range: self.filters.date_range.filter(|r| !r.is_unbounded()),
            sort: self.filters.sort,
            limit: self.filters.limit,
            record_index: self.filters.record_index,
        }
    }
}
