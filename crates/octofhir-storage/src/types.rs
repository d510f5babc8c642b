//! Cached record and local query types.

use std::cmp::Ordering;
use std::fmt;

use octofhir_core::{DateRange, ResourceType, parse_fhir_date};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::Date;

use crate::error::StorageError;

/// Identity of a cached record. Unique per store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordKey {
    pub patient_id: String,
    pub resource_type: ResourceType,
    pub id: String,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.patient_id, self.resource_type, self.id)
    }
}

/// One remote FHIR resource cached for one patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecord {
    pub patient_id: String,
    pub resource_type: ResourceType,
    pub id: String,
    /// The resource content as returned by the gateway.
    pub resource: Value,
}

/// A `system|code` pair found on a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coding<'a> {
    pub system: Option<&'a str>,
    pub code: &'a str,
    pub display: Option<&'a str>,
}

impl ResourceRecord {
    #[must_use]
    pub fn new(
        patient_id: impl Into<String>,
        resource_type: ResourceType,
        id: impl Into<String>,
        resource: Value,
    ) -> Self {
        Self {
            patient_id: patient_id.into(),
            resource_type,
            id: id.into(),
            resource,
        }
    }

    /// Wraps a fetched resource, reading its type and id from the content.
    pub fn from_resource(patient_id: &str, resource: Value) -> Result<Self, StorageError> {
        let resource_type = resource
            .get("resourceType")
            .and_then(Value::as_str)
            .ok_or_else(|| StorageError::invalid_record("resource has no resourceType"))?
            .parse::<ResourceType>()
            .map_err(|e| StorageError::invalid_record(e.to_string()))?;
        let id = resource
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                StorageError::invalid_record(format!("{resource_type} resource has no id"))
            })?
            .to_string();
        Ok(Self::new(patient_id, resource_type, id, resource))
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            patient_id: self.patient_id.clone(),
            resource_type: self.resource_type,
            id: self.id.clone(),
        }
    }

    /// Checks that the record can be cached.
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.patient_id.trim().is_empty() {
            return Err(StorageError::invalid_record("empty patient id"));
        }
        if self.id.trim().is_empty() {
            return Err(StorageError::invalid_record(format!(
                "{} record has an empty id",
                self.resource_type
            )));
        }
        if !self.resource.is_object() {
            return Err(StorageError::invalid_record(format!(
                "{}/{} content is not a JSON object",
                self.resource_type, self.id
            )));
        }
        if let Some(declared) = self.resource.get("resourceType").and_then(Value::as_str)
            && declared != self.resource_type.as_str()
        {
            return Err(StorageError::invalid_record(format!(
                "{}/{} declares resourceType {declared}",
                self.resource_type, self.id
            )));
        }
        Ok(())
    }

    /// The clinically relevant date of the record, if it has one.
    pub fn effective_date(&self) -> Option<Date> {
        self.resource_type
            .date_paths()
            .iter()
            .flat_map(|path| resolve_path(&self.resource, path))
            .filter_map(Value::as_str)
            .find_map(|s| parse_fhir_date(s).ok())
    }

    /// Codings found under the type's code paths.
    pub fn codings(&self) -> Vec<Coding<'_>> {
        self.resource_type
            .code_paths()
            .iter()
            .flat_map(|path| resolve_path(&self.resource, path))
            .flat_map(|concept| resolve_path(concept, "coding"))
            .filter_map(|coding| {
                Some(Coding {
                    code: coding.get("code")?.as_str()?,
                    system: coding.get("system").and_then(Value::as_str),
                    display: coding.get("display").and_then(Value::as_str),
                })
            })
            .collect()
    }

    /// Human label of the record's primary concept.
    pub fn concept_text(&self) -> Option<&str> {
        let concept = self
            .resource_type
            .code_paths()
            .iter()
            .flat_map(|path| resolve_path(&self.resource, path))
            .next()?;
        concept
            .get("text")
            .and_then(Value::as_str)
            .or_else(|| {
                resolve_path(concept, "coding")
                    .into_iter()
                    .find_map(|c| c.get("display").and_then(Value::as_str))
            })
    }
}

/// Resolves a dotted element path, flattening arrays at every step.
pub fn resolve_path<'a>(value: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current = vec![value];
    for segment in path.split('.') {
        let mut next = Vec::new();
        for v in current {
            match v.get(segment) {
                Some(Value::Array(items)) => next.extend(items.iter()),
                Some(found) => next.push(found),
                None => {}
            }
        }
        current = next;
    }
    current
}

/// Code-based search terms: a record matches when any of its codings carries
/// one of `codes` (and `system`, when set).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CodeFilter {
    pub codes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

impl CodeFilter {
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            codes: codes.into_iter().map(Into::into).collect(),
            system: None,
        }
    }

    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn matches(&self, coding: &Coding<'_>) -> bool {
        if let Some(system) = &self.system
            && coding.system != Some(system.as_str())
        {
            return false;
        }
        self.codes.iter().any(|c| c == coding.code)
    }

    /// FHIR token search value: `system|code,system|code` or `code,code`.
    pub fn to_search_value(&self) -> String {
        self.codes
            .iter()
            .map(|code| match &self.system {
                Some(system) => format!("{system}|{code}"),
                None => code.clone(),
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Ordering by the record's effective date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    #[serde(rename = "date")]
    DateAscending,
    #[serde(rename = "-date")]
    DateDescending,
}

impl SortOrder {
    /// `_sort` value for `resource_type`, if the type has a date parameter.
    pub fn to_search_value(&self, resource_type: ResourceType) -> Option<String> {
        let param = resource_type.date_search_param()?;
        Some(match self {
            SortOrder::DateAscending => param.to_string(),
            SortOrder::DateDescending => format!("-{param}"),
        })
    }

    fn compare(&self, a: Option<Date>, b: Option<Date>) -> Ordering {
        match (a, b) {
            (Some(a), Some(b)) => match self {
                SortOrder::DateAscending => a.cmp(&b),
                SortOrder::DateDescending => b.cmp(&a),
            },
            // Undated records go last in either direction.
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

/// Filters applied to one patient's records of one resource type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalQuery {
    pub codes: Option<CodeFilter>,
    pub date_range: Option<DateRange>,
    pub sort: Option<SortOrder>,
    pub limit: Option<usize>,
    /// 0-based position to select after sorting and filtering.
    pub record_index: Option<usize>,
}

impl LocalQuery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_codes(mut self, codes: CodeFilter) -> Self {
        self.codes = Some(codes);
        self
    }

    #[must_use]
    pub fn with_date_range(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    #[must_use]
    pub fn with_sort(mut self, sort: SortOrder) -> Self {
        self.sort = Some(sort);
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_record_index(mut self, index: usize) -> Self {
        self.record_index = Some(index);
        self
    }

    /// Whether a record passes the code and date filters.
    pub fn matches(&self, record: &ResourceRecord) -> bool {
        if let Some(filter) = &self.codes
            && !record.codings().iter().any(|c| filter.matches(c))
        {
            return false;
        }
        if let Some(range) = &self.date_range
            && !range.is_unbounded()
        {
            return match record.effective_date() {
                Some(date) => range.contains(date),
                None => false,
            };
        }
        true
    }

    /// Runs the query over candidate records: sort, then filter, then select
    /// `record_index` (or truncate to `limit`).
    pub fn apply<I>(&self, records: I) -> LocalQueryResult
    where
        I: IntoIterator<Item = ResourceRecord>,
    {
        let mut records: Vec<ResourceRecord> = match self.sort {
            Some(order) => {
                let mut dated: Vec<(Option<Date>, ResourceRecord)> = records
                    .into_iter()
                    .map(|r| (r.effective_date(), r))
                    .collect();
                dated.sort_by(|(a, _), (b, _)| order.compare(*a, *b));
                dated.into_iter().map(|(_, r)| r).collect()
            }
            None => records.into_iter().collect(),
        };
        records.retain(|r| self.matches(r));
        let matched = records.len();

        let records = match (self.record_index, self.limit) {
            (Some(index), _) => records.into_iter().nth(index).into_iter().collect(),
            (None, Some(limit)) => {
                records.truncate(limit);
                records
            }
            (None, None) => records,
        };

        LocalQueryResult { matched, records }
    }
}

/// Outcome of a local query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalQueryResult {
    /// Records that passed the filters before index or limit selection.
    pub matched: usize,
    /// Selected records in query order.
    pub records: Vec<ResourceRecord>,
}

impl LocalQueryResult {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }
}

/// Result of a bulk insert. Per-record failures do not abort the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkInsertOutcome {
    /// Key of every record written, in batch order. A key repeated within the
    /// batch appears once per write.
    pub stored: Vec<RecordKey>,
    /// One message per record that could not be stored.
    pub failures: Vec<String>,
}

impl BulkInsertOutcome {
    /// Number of writes, counting repeated keys each time.
    pub fn inserted(&self) -> usize {
        self.stored.len()
    }

    pub fn merge(&mut self, other: BulkInsertOutcome) {
        self.stored.extend(other.stored);
        self.failures.extend(other.failures);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::date;

    fn observation(id: &str, code: &str, date: Option<&str>) -> ResourceRecord {
        let mut resource = json!({
            "resourceType": "Observation",
            "id": id,
            "code": {"coding": [{"system": "http://loinc.org", "code": code, "display": "Cholesterol"}], "text": "Cholesterol"},
            "valueQuantity": {"value": 180, "unit": "mg/dL"}
        });
        if let Some(d) = date {
            resource["effectiveDateTime"] = json!(d);
        }
        ResourceRecord::new("p1", ResourceType::Observation, id, resource)
    }

    #[test]
    fn test_from_resource() {
        let record =
            ResourceRecord::from_resource("p1", json!({"resourceType": "Condition", "id": "c1"}))
                .unwrap();
        assert_eq!(record.resource_type, ResourceType::Condition);
        assert_eq!(record.key().to_string(), "p1:Condition/c1");

        assert!(ResourceRecord::from_resource("p1", json!({"resourceType": "Condition"})).is_err());
        assert!(ResourceRecord::from_resource("p1", json!({"resourceType": "Bogus", "id": "x"})).is_err());
    }

    #[test]
    fn test_validate_rejects_mismatched_type() {
        let record = ResourceRecord::new(
            "p1",
            ResourceType::Observation,
            "o1",
            json!({"resourceType": "Condition", "id": "o1"}),
        );
        assert!(record.validate().unwrap_err().is_invalid_record());
        assert!(observation("o1", "2093-3", None).validate().is_ok());
    }

    #[test]
    fn test_effective_date_and_codings() {
        let record = observation("o1", "2093-3", Some("2023-04-05T10:00:00Z"));
        assert_eq!(record.effective_date(), Some(date!(2023 - 04 - 05)));
        let codings = record.codings();
        assert_eq!(codings.len(), 1);
        assert_eq!(codings[0].code, "2093-3");
        assert_eq!(codings[0].system, Some("http://loinc.org"));
        assert_eq!(record.concept_text(), Some("Cholesterol"));
    }

    #[test]
    fn test_resolve_path_flattens_arrays() {
        let value = json!({"condition": [{"code": {"text": "a"}}, {"code": {"text": "b"}}]});
        let found = resolve_path(&value, "condition.code.text");
        assert_eq!(found, vec![&json!("a"), &json!("b")]);
    }

    #[test]
    fn test_code_filter() {
        let filter = CodeFilter::new(["2093-3", "4548-4"]);
        assert!(filter.matches(&Coding { system: None, code: "4548-4", display: None }));
        let filter = filter.with_system("http://loinc.org");
        assert!(!filter.matches(&Coding { system: Some("urn:other"), code: "2093-3", display: None }));
        assert_eq!(
            filter.to_search_value(),
            "http://loinc.org|2093-3,http://loinc.org|4548-4"
        );
    }

    #[test]
    fn test_sort_search_value() {
        assert_eq!(
            SortOrder::DateDescending.to_search_value(ResourceType::Condition).as_deref(),
            Some("-onset-date")
        );
        assert_eq!(SortOrder::DateAscending.to_search_value(ResourceType::Patient), None);
    }

    #[test]
    fn test_apply_sorts_filters_and_selects() {
        let records = vec![
            observation("a", "2093-3", Some("2021-01-01")),
            observation("b", "9999-9", Some("2024-01-01")),
            observation("c", "2093-3", Some("2023-01-01")),
            observation("d", "2093-3", None),
            observation("e", "2093-3", Some("2022-01-01")),
        ];
        let query = LocalQuery::new()
            .with_codes(CodeFilter::new(["2093-3"]))
            .with_sort(SortOrder::DateDescending);

        let result = query.apply(records.clone());
        assert_eq!(result.matched, 4);
        let ids: Vec<&str> = result.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "e", "a", "d"]);

        let latest = query.clone().with_record_index(0).apply(records.clone());
        assert_eq!(latest.records[0].id, "c");

        let out_of_range = query.with_record_index(7).apply(records);
        assert!(out_of_range.is_empty());
        assert_eq!(out_of_range.matched, 4);
    }

    #[test]
    fn test_date_range_excludes_undated() {
        let records = vec![
            observation("a", "x", Some("2021-06-01")),
            observation("b", "x", None),
            observation("c", "x", Some("2023-06-01")),
        ];
        let query = LocalQuery::new().with_date_range(DateRange::new(
            Some(date!(2022 - 01 - 01)),
            None,
        ));
        let result = query.apply(records);
        assert_eq!(result.len(), 1);
        assert_eq!(result.records[0].id, "c");
    }

    #[test]
    fn test_limit() {
        let records = (0..5).map(|i| observation(&format!("o{i}"), "x", None));
        let result = LocalQuery::new().with_limit(2).apply(records);
        assert_eq!(result.matched, 5);
        assert_eq!(result.len(), 2);
    }
}
