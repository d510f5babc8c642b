//! Local-first routing of query plans.

use std::fmt;
use std::sync::Arc;

use octofhir_core::{ResourceType, fhir_date, validate_patient_id};
use octofhir_mcp::{FhirRequest, GatewayConfig, ToolCaller, call_tool_with_retry};
use octofhir_storage::{LocalQuery, LocalStore, ResourceRecord};
use serde::Serialize;
use serde_json::Value;

use crate::error::QueryError;
use crate::format::summarize;
use crate::interpreter::QueryInterpreter;
use crate::plan::QueryPlan;

/// Which path produced an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Local,
    Remote,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Local => write!(f, "local"),
            Provenance::Remote => write!(f, "remote"),
        }
    }
}

/// Normalized result of a routed query, whichever path produced it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryAnswer {
    pub resource_type: ResourceType,
    pub provenance: Provenance,
    /// Records that passed the filters before index or limit selection.
    pub matched: usize,
    pub records: Vec<ResourceRecord>,
}

impl QueryAnswer {
    /// Whether the selection is empty, e.g. an out-of-range record index.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// One formatted line per selected record.
    pub fn lines(&self) -> Vec<String> {
        self.records.iter().map(summarize).collect()
    }

    pub fn text(&self) -> String {
        if self.is_empty() {
            format!(
                "No {} record at that position ({} matched)",
                self.resource_type, self.matched
            )
        } else {
            self.lines().join("\n")
        }
    }
}

/// Answers query plans from the local cache when it has matching data, and
/// from the gateway otherwise.
///
/// Local-first is strict: a cache with matching records always wins, even if
/// the gateway might hold fresher data.
pub struct QueryRouter {
    store: Arc<dyn LocalStore>,
    caller: Arc<dyn ToolCaller>,
    gateway: Arc<GatewayConfig>,
}

impl QueryRouter {
    pub fn new(
        store: Arc<dyn LocalStore>,
        caller: Arc<dyn ToolCaller>,
        gateway: Arc<GatewayConfig>,
    ) -> Self {
        Self {
            store,
            caller,
            gateway,
        }
    }

    pub async fn route(
        &self,
        plan: &QueryPlan,
        patient_id: Option<&str>,
    ) -> Result<QueryAnswer, QueryError> {
        let patient_id = require_patient(patient_id)?;
        plan.validate()?;
        let resource_type = plan.resource_type;

        if plan.mode.allows_local() {
            let result = self
                .store
                .query(patient_id, resource_type, &plan.to_local_query())
                .await?;
            if result.matched > 0 {
                tracing::info!(
                    resource_type = %resource_type,
                    matched = result.matched,
                    selected = result.records.len(),
                    "Answered from local cache"
                );
                return Ok(QueryAnswer {
                    resource_type,
                    provenance: Provenance::Local,
                    matched: result.matched,
                    records: result.records,
                });
            }
            tracing::debug!(resource_type = %resource_type, "No local match");
        }

        if !plan.mode.allows_remote() {
            return Err(QueryError::no_interpretation(format!(
                "no cached {resource_type} records match and remote lookup is disabled"
            )));
        }

        let answer = self.query_remote(plan, patient_id).await?;
        if answer.matched == 0 {
            return Err(QueryError::no_interpretation(format!(
                "neither the cache nor the gateway returned {resource_type} records"
            )));
        }
        Ok(answer)
    }

    /// Decodes an interpreter's raw plan at the boundary, then routes it.
    pub async fn route_value(
        &self,
        plan: Value,
        patient_id: Option<&str>,
    ) -> Result<QueryAnswer, QueryError> {
        let plan = QueryPlan::from_value(plan)?;
        self.route(&plan, patient_id).await
    }

    /// Interprets free text, then routes the resulting plan.
    pub async fn ask(
        &self,
        interpreter: &dyn QueryInterpreter,
        text: &str,
        patient_id: Option<&str>,
    ) -> Result<QueryAnswer, QueryError> {
        let patient_id = require_patient(patient_id)?;
        let plan = interpreter.interpret(text, patient_id).await?;
        self.route(&plan, Some(patient_id)).await
    }

    async fn query_remote(
        &self,
        plan: &QueryPlan,
        patient_id: &str,
    ) -> Result<QueryAnswer, QueryError> {
        let resource_type = plan.resource_type;
        let path = remote_path(plan, patient_id);
        tracing::info!(resource_type = %resource_type, path = %path, "Falling back to gateway");

        let result = call_tool_with_retry(
            self.caller.as_ref(),
            self.gateway.tool_for(resource_type),
            FhirRequest::get(path).into_arguments(),
            &self.gateway.retry,
        )
        .await?;
        let payload = result.fhir_payload()?;

        // Filters already ran on the server; only ordering and selection remain.
        let selection = LocalQuery {
            sort: plan.filters.sort,
            limit: plan.filters.limit,
            record_index: plan.filters.record_index,
            ..LocalQuery::default()
        };
        let selected = selection.apply(records_in(&payload, patient_id, resource_type));

        Ok(QueryAnswer {
            resource_type,
            provenance: Provenance::Remote,
            matched: selected.matched,
            records: selected.records,
        })
    }
}

/// Resolves the patient scope of a query.
///
/// The id ends up inside a FHIR search string, so anything outside the FHIR
/// `id` charset is rejected before either path runs.
fn require_patient(patient_id: Option<&str>) -> Result<&str, QueryError> {
    match patient_id.map(str::trim) {
        Some(id) if !id.is_empty() => validate_patient_id(id)
            .map_err(|e| QueryError::missing_context(format!("{e}; select a valid patient"))),
        _ => Err(QueryError::missing_context(
            "queries are patient-scoped; select a patient first",
        )),
    }
}

/// Gateway request path answering `plan` for one patient.
///
/// `patient_id` must already be a valid FHIR id.
pub fn remote_path(plan: &QueryPlan, patient_id: &str) -> String {
    let rt = plan.resource_type;
    let Some(scope) = rt.patient_search_param() else {
        return format!("/{rt}/{patient_id}");
    };

    let filters = &plan.filters;
    let mut params = vec![format!("{scope}=Patient/{patient_id}")];
    if let Some(codes) = &filters.code_search
        && let Some(param) = rt.code_search_param()
    {
        params.push(format!("{param}={}", codes.to_search_value()));
    }
    if let Some(range) = filters.date_range
        && let Some(param) = rt.date_search_param()
    {
        if let Some(start) = range.start {
            params.push(format!("{param}=ge{}", fhir_date::format(&start)));
        }
        if let Some(end) = range.end {
            params.push(format!("{param}=le{}", fhir_date::format(&end)));
        }
    }
    if let Some(sort) = filters.sort.and_then(|s| s.to_search_value(rt)) {
        params.push(format!("_sort={sort}"));
    }
    if let Some(count) = filters.record_index.map(|i| i + 1).max(filters.limit) {
        params.push(format!("_count={count}"));
    }
    format!("/{rt}?{}", params.join("&"))
}

fn records_in(payload: &Value, patient_id: &str, resource_type: ResourceType) -> Vec<ResourceRecord> {
    let resources: Vec<&Value> = match payload.get("resourceType").and_then(Value::as_str) {
        Some("Bundle") => payload
            .get("entry")
            .and_then(Value::as_array)
            .map(|entries| entries.iter().filter_map(|e| e.get("resource")).collect())
            .unwrap_or_default(),
        Some(_) => vec![payload],
        None => Vec::new(),
    };
    resources
        .into_iter()
        .filter(|r| r.get("resourceType").and_then(Value::as_str) == Some(resource_type.as_str()))
        .filter_map(|r| match ResourceRecord::from_resource(patient_id, r.clone()) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping remote entry");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::KeywordInterpreter;
    use crate::plan::{ExecutionMode, PlanFilters};
    use async_trait::async_trait;
    use octofhir_db_memory::InMemoryStore;
    use octofhir_mcp::{McpError, ToolResult};
    use octofhir_storage::{CodeFilter, SortOrder};
    use serde_json::json;
    use std::sync::Mutex;

    /// Gateway double that answers every call the same way and records paths.
    struct RecordingGateway {
        response: Result<Value, McpError>,
        paths: Mutex<Vec<String>>,
    }

    impl RecordingGateway {
        fn answering(payload: Value) -> Arc<Self> {
            Arc::new(Self {
                response: Ok(payload),
                paths: Mutex::new(Vec::new()),
            })
        }

        fn failing(error: McpError) -> Arc<Self> {
            Arc::new(Self {
                response: Err(error),
                paths: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.paths.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ToolCaller for RecordingGateway {
        async fn call_tool(&self, _name: &str, arguments: Value) -> Result<ToolResult, McpError> {
            let path = arguments["request"]["path"].as_str().unwrap_or_default().to_string();
            self.paths.lock().unwrap().push(path);
            self.response.clone().map(|payload| ToolResult {
                structured_content: Some(payload),
                ..ToolResult::default()
            })
        }
    }

    fn cholesterol(id: &str, date: &str, value: u32) -> Value {
        json!({
            "resourceType": "Observation",
            "id": id,
            "code": {"coding": [{"system": "http://loinc.org", "code": "2093-3", "display": "Cholesterol"}]},
            "effectiveDateTime": date,
            "valueQuantity": {"value": value, "unit": "mg/dL"}
        })
    }

    async fn seeded_store() -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        let records = [
            ("o1", "2020-01-10", 190),
            ("o2", "2021-02-11", 185),
            ("o3", "2022-03-12", 180),
            ("o4", "2023-04-13", 175),
            ("o5", "2024-05-14", 170),
        ]
        .into_iter()
        .map(|(id, date, v)| ResourceRecord::from_resource("p1", cholesterol(id, date, v)).unwrap())
        .collect();
        store.bulk_insert(records).await.unwrap();
        store
    }

    fn router(store: Arc<InMemoryStore>, gateway: Arc<RecordingGateway>) -> QueryRouter {
        QueryRouter::new(store, gateway, Arc::new(GatewayConfig::new("http://gw/mcp")))
    }

    fn cholesterol_plan() -> QueryPlan {
        QueryPlan::new(ResourceType::Observation).with_filters(PlanFilters {
            code_search: Some(CodeFilter::new(["2093-3"])),
            ..PlanFilters::default()
        })
    }

    #[tokio::test]
    async fn test_local_hit_never_calls_gateway() {
        let gateway = RecordingGateway::answering(json!({"resourceType": "Bundle", "entry": []}));
        let router = router(seeded_store().await, gateway.clone());

        let answer = router.route(&cholesterol_plan(), Some("p1")).await.unwrap();
        assert_eq!(answer.provenance, Provenance::Local);
        assert_eq!(answer.matched, 5);
        assert_eq!(answer.records.len(), 5);
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_index_is_empty_not_error() {
        let gateway = RecordingGateway::answering(json!({"resourceType": "Bundle", "entry": []}));
        let router = router(seeded_store().await, gateway.clone());

        let mut plan = cholesterol_plan();
        plan.filters.sort = Some(SortOrder::DateDescending);
        plan.filters.record_index = Some(7);

        let answer = router.route(&plan, Some("p1")).await.unwrap();
        assert_eq!(answer.provenance, Provenance::Local);
        assert!(answer.is_empty());
        assert_eq!(answer.matched, 5);
        assert!(gateway.calls().is_empty());

        plan.filters.record_index = Some(1);
        let answer = router.route(&plan, Some("p1")).await.unwrap();
        assert_eq!(answer.records[0].id, "o4");
    }

    #[tokio::test]
    async fn test_remote_fallback_when_cache_empty() {
        let gateway = RecordingGateway::answering(json!({
            "resourceType": "Bundle",
            "entry": [
                {"resource": cholesterol("r1", "2024-06-01", 168)},
                {"resource": {"resourceType": "OperationOutcome", "id": "info"}}
            ]
        }));
        let router = router(Arc::new(InMemoryStore::new()), gateway.clone());

        let mut plan = cholesterol_plan();
        plan.filters.code_search = Some(CodeFilter::new(["2093-3"]).with_system("http://loinc.org"));
        plan.filters.sort = Some(SortOrder::DateDescending);
        plan.filters.record_index = Some(0);

        let answer = router.route(&plan, Some("p1")).await.unwrap();
        assert_eq!(answer.provenance, Provenance::Remote);
        assert_eq!(answer.records.len(), 1);
        assert_eq!(answer.text(), "2024-06-01 | Cholesterol | 168 mg/dL");
        assert_eq!(
            gateway.calls(),
            vec!["/Observation?subject=Patient/p1&code=http://loinc.org|2093-3&_sort=-date&_count=1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_remote_error_keeps_classification() {
        let gateway = RecordingGateway::failing(McpError::UnknownTool {
            name: "fhir_request".into(),
            message: "Unknown tool: fhir_request".into(),
            advertised: true,
        });
        let router = router(Arc::new(InMemoryStore::new()), gateway);

        let err = router.route(&cholesterol_plan(), Some("p1")).await.unwrap_err();
        assert!(matches!(
            err.as_remote(),
            Some(McpError::UnknownTool { advertised: true, .. })
        ));
    }

    #[tokio::test]
    async fn test_nothing_found_anywhere() {
        let gateway = RecordingGateway::answering(json!({"resourceType": "Bundle", "total": 0}));
        let router = router(Arc::new(InMemoryStore::new()), gateway.clone());

        let err = router.route(&cholesterol_plan(), Some("p1")).await.unwrap_err();
        assert!(err.is_no_interpretation());
        assert_eq!(gateway.calls().len(), 1);

        let local_only = cholesterol_plan().with_mode(ExecutionMode::Local);
        let err = router.route(&local_only, Some("p1")).await.unwrap_err();
        assert!(err.is_no_interpretation());
        assert_eq!(gateway.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_remote_mode_skips_cache() {
        let gateway = RecordingGateway::answering(json!({
            "resourceType": "Bundle",
            "entry": [{"resource": cholesterol("r1", "2024-06-01", 168)}]
        }));
        let router = router(seeded_store().await, gateway.clone());

        let plan = cholesterol_plan().with_mode(ExecutionMode::Remote);
        let answer = router.route(&plan, Some("p1")).await.unwrap();
        assert_eq!(answer.provenance, Provenance::Remote);
        assert_eq!(gateway.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_patient_is_required() {
        let gateway = RecordingGateway::answering(json!({}));
        let router = router(seeded_store().await, gateway.clone());

        for patient in [None, Some(""), Some("  ")] {
            let err = router.route(&cholesterol_plan(), patient).await.unwrap_err();
            assert!(err.is_missing_context());
        }
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_patient_id_never_reaches_gateway() {
        let gateway = RecordingGateway::answering(json!({
            "resourceType": "Bundle",
            "entry": [{"resource": cholesterol("r1", "2024-06-01", 168)}]
        }));
        let router = router(seeded_store().await, gateway.clone());
        let plan = QueryPlan::new(ResourceType::Observation).with_mode(ExecutionMode::Remote);

        for patient in ["p1&subject=Patient/other", "p1?x=1", "../Patient/p2", "p 1"] {
            let err = router.route(&plan, Some(patient)).await.unwrap_err();
            assert!(err.is_missing_context(), "{patient}: {err}");
        }
        assert!(gateway.calls().is_empty());

        let answer = router.route(&plan, Some(" p1 ")).await.unwrap();
        assert_eq!(answer.provenance, Provenance::Remote);
        assert_eq!(gateway.calls(), vec!["/Observation?subject=Patient/p1".to_string()]);
    }

    #[tokio::test]
    async fn test_raw_plan_validated_at_boundary() {
        let gateway = RecordingGateway::answering(json!({}));
        let router = router(seeded_store().await, gateway);

        let err = router
            .route_value(json!({"resourceType": "Observation", "filter": {}}), Some("p1"))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::UnrecognizedPlan(_)));
    }

    #[tokio::test]
    async fn test_ask_latest_from_cache() {
        let gateway = RecordingGateway::answering(json!({}));
        let router = router(seeded_store().await, gateway.clone());

        let answer = router
            .ask(&KeywordInterpreter::new(), "What is my latest cholesterol?", Some("p1"))
            .await
            .unwrap();
        assert_eq!(answer.records.len(), 1);
        assert_eq!(answer.records[0].id, "o5");
        assert!(gateway.calls().is_empty());
    }

    #[test]
    fn test_remote_paths() {
        let plan = QueryPlan::from_value(json!({
            "resourceType": "Condition",
            "filters": {"dateRange": {"start": "2021-01-01", "end": "2021-12-31"}, "limit": 5}
        }))
        .unwrap();
        assert_eq!(
            remote_path(&plan, "p1"),
            "/Condition?subject=Patient/p1&onset-date=ge2021-01-01&onset-date=le2021-12-31&_count=5"
        );

        let patient = QueryPlan::new(ResourceType::Patient);
        assert_eq!(remote_path(&patient, "p1"), "/Patient/p1");

        let immunization = QueryPlan::new(ResourceType::Immunization);
        assert_eq!(remote_path(&immunization, "p1"), "/Immunization?patient=Patient/p1");
    }
}
