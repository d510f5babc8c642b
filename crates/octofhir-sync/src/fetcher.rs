//! Fetches one resource type for one patient, following Bundle pagination.

use std::collections::HashSet;
use std::sync::Arc;

use octofhir_core::ResourceType;
use octofhir_mcp::{FhirRequest, GatewayConfig, McpError, ToolCaller, call_tool_with_retry};
use octofhir_storage::{RecordKey, ResourceRecord, ResyncTransaction};
use serde_json::Value;

use crate::config::SyncConfig;

/// Progress after each fetched page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageProgress {
    pub resource_type: ResourceType,
    /// 1-based page number.
    pub page: usize,
    /// Records fetched so far for this type.
    pub fetched: usize,
    /// `Bundle.total`, when the server reports it.
    pub expected_total: Option<usize>,
}

/// What one fetch of one resource type produced.
#[derive(Debug, Clone)]
pub struct FetchReport {
    pub resource_type: ResourceType,
    /// All records in server order, across pages.
    pub records: Vec<ResourceRecord>,
    /// Distinct records staged in the store. A record a server repeats
    /// across pages is stored, and counted, once.
    pub stored: HashSet<RecordKey>,
    /// One message per record that could not be saved.
    pub save_failures: Vec<String>,
    /// Page requests issued.
    pub pages: usize,
    /// Stopped at the page bound while the server still offered a next page.
    pub truncated: bool,
    /// Failure that ended the fetch early. Records fetched before it are kept.
    pub error: Option<McpError>,
}

impl FetchReport {
    fn new(resource_type: ResourceType) -> Self {
        Self {
            resource_type,
            records: Vec::new(),
            stored: HashSet::new(),
            save_failures: Vec::new(),
            pages: 0,
            truncated: false,
            error: None,
        }
    }

    /// Count reported for this type in statuses and summaries.
    ///
    /// A patient id in scope counts as exactly one Patient, whatever the
    /// demographic fetch returned; see [`patient_fetched`](Self::patient_fetched).
    pub fn reported_count(&self) -> usize {
        match self.resource_type {
            ResourceType::Patient => 1,
            _ => self.saved(),
        }
    }

    /// Number of distinct records staged in the store.
    pub fn saved(&self) -> usize {
        self.stored.len()
    }

    /// Whether a Patient record was actually fetched.
    pub fn patient_fetched(&self) -> bool {
        self.resource_type == ResourceType::Patient
            && self.error.is_none()
            && !self.records.is_empty()
    }
}

/// Retrieves resources through the gateway's FHIR request tool.
#[derive(Clone)]
pub struct ResourceFetcher {
    caller: Arc<dyn ToolCaller>,
    gateway: Arc<GatewayConfig>,
    page_size: u32,
    max_pages: usize,
}

impl ResourceFetcher {
    pub fn new(caller: Arc<dyn ToolCaller>, gateway: Arc<GatewayConfig>, config: &SyncConfig) -> Self {
        Self {
            caller,
            gateway,
            page_size: config.effective_page_size(),
            max_pages: config.max_pages.max(1) as usize,
        }
    }

    /// Path of the first request for `resource_type`.
    pub fn first_page_path(&self, patient_id: &str, resource_type: ResourceType) -> String {
        match resource_type.patient_search_param() {
            Some(param) => format!(
                "/{resource_type}?{param}=Patient/{patient_id}&_count={}",
                self.page_size
            ),
            None => format!("/Patient/{patient_id}"),
        }
    }

    /// Fetches every page without storing anything.
    pub async fn fetch(
        &self,
        patient_id: &str,
        resource_type: ResourceType,
    ) -> Result<Vec<ResourceRecord>, McpError> {
        let report = self.run(patient_id, resource_type, None, &mut |_| {}).await;
        match report.error {
            Some(e) => Err(e),
            None => Ok(report.records),
        }
    }

    /// Fetches every page, staging each page in `tx` as it arrives.
    ///
    /// Never fails as a whole: remote errors end the fetch and are reported in
    /// [`FetchReport::error`], save errors are counted per record.
    pub async fn fetch_into(
        &self,
        patient_id: &str,
        resource_type: ResourceType,
        tx: &mut dyn ResyncTransaction,
        on_page: &mut (dyn FnMut(PageProgress) + Send),
    ) -> FetchReport {
        self.run(patient_id, resource_type, Some(tx), on_page).await
    }

    async fn run(
        &self,
        patient_id: &str,
        resource_type: ResourceType,
        mut tx: Option<&mut dyn ResyncTransaction>,
        on_page: &mut (dyn FnMut(PageProgress) + Send),
    ) -> FetchReport {
        let mut report = FetchReport::new(resource_type);
        let mut next = Some(self.first_page_path(patient_id, resource_type));

        while let Some(path) = next.take() {
            if report.pages == self.max_pages {
                tracing::warn!(
                    resource_type = %resource_type,
                    max_pages = self.max_pages,
                    "Page bound reached, remaining pages skipped"
                );
                report.truncated = true;
                break;
            }

            let payload = match self.request(resource_type, &path).await {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(resource_type = %resource_type, path = %path, error = %e, "Fetch failed");
                    report.error = Some(e);
                    break;
                }
            };
            report.pages += 1;

            let page = Page::parse(patient_id, resource_type, &payload);
            report.save_failures.extend(page.invalid);
            next = page.next;

            if let Some(tx) = tx.as_deref_mut() {
                match tx.bulk_insert(page.records.clone()).await {
                    Ok(outcome) => {
                        report.stored.extend(outcome.stored);
                        report.save_failures.extend(outcome.failures);
                    }
                    Err(e) => {
                        tracing::warn!(resource_type = %resource_type, error = %e, "Page could not be saved");
                        report
                            .save_failures
                            .extend(page.records.iter().map(|r| format!("{}: {e}", r.key())));
                    }
                }
            }

            report.records.extend(page.records);
            tracing::debug!(
                resource_type = %resource_type,
                page = report.pages,
                fetched = report.records.len(),
                has_next = next.is_some(),
                "Fetched page"
            );
            on_page(PageProgress {
                resource_type,
                page: report.pages,
                fetched: report.records.len(),
                expected_total: page.total,
            });
        }

        report
    }

    async fn request(&self, resource_type: ResourceType, path: &str) -> Result<Value, McpError> {
        let result = call_tool_with_retry(
            self.caller.as_ref(),
            self.gateway.tool_for(resource_type),
            FhirRequest::get(path).into_arguments(),
            &self.gateway.retry,
        )
        .await?;
        result.fhir_payload()
    }
}

/// Records and continuation extracted from one response payload.
struct Page {
    records: Vec<ResourceRecord>,
    invalid: Vec<String>,
    next: Option<String>,
    total: Option<usize>,
}

impl Page {
    fn parse(patient_id: &str, resource_type: ResourceType, payload: &Value) -> Self {
        let mut page = Page {
            records: Vec::new(),
            invalid: Vec::new(),
            next: None,
            total: None,
        };

        let resources: Vec<&Value> = match payload.get("resourceType").and_then(Value::as_str) {
            Some("Bundle") => {
                page.next = next_link(payload).and_then(|link| next_page_path(&link));
                page.total = payload
                    .get("total")
                    .and_then(Value::as_u64)
                    .map(|t| t as usize);
                payload
                    .get("entry")
                    .and_then(Value::as_array)
                    .map(|entries| entries.iter().filter_map(|e| e.get("resource")).collect())
                    .unwrap_or_default()
            }
            Some(_) => vec![payload],
            None => Vec::new(),
        };

        for resource in resources {
            if resource.get("resourceType").and_then(Value::as_str) != Some(resource_type.as_str()) {
                // Included resources and search outcomes.
                continue;
            }
            match ResourceRecord::from_resource(patient_id, resource.clone()) {
                Ok(record) => page.records.push(record),
                Err(e) => page.invalid.push(format!("{resource_type}: {e}")),
            }
        }
        page
    }
}

fn next_link(bundle: &Value) -> Option<String> {
    bundle
        .get("link")?
        .as_array()?
        .iter()
        .find(|l| l.get("relation").and_then(Value::as_str) == Some("next"))?
        .get("url")?
        .as_str()
        .map(str::to_string)
}

/// Converts a Bundle `next` link into a gateway request path.
///
/// Absolute links are rebased at their first resource-type segment, so
/// `https://host/fhir/Observation?page=2` becomes `/Observation?page=2`.
/// Links without a resource-type segment keep only their query.
pub fn next_page_path(link: &str) -> Option<String> {
    let link = link.trim();
    if link.is_empty() {
        return None;
    }
    if link.starts_with('/') {
        return Some(link.to_string());
    }
    if link.starts_with('?') {
        return Some(format!("/{link}"));
    }

    let url = url::Url::parse(link).ok()?;
    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    let start = segments
        .iter()
        .position(|s| s.parse::<ResourceType>().is_ok())
        .unwrap_or(segments.len());
    let path = format!("/{}", segments[start..].join("/"));
    Some(match url.query() {
        Some(query) => format!("{path}?{query}"),
        None => path,
    })
}
