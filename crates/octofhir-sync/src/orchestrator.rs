//! Full resynchronisation of one patient's record.
//!
//! A run has three phases:
//!
//! 1. **Reset**: open a resync transaction on the store, stage a truncate and
//!    reset every status to pending.
//! 2. **Fetch**: fetch each configured resource type in declared order,
//!    staging records as pages arrive. A failing type is recorded and the
//!    run moves on.
//! 3. **Summary**: commit the transaction, build the [`FetchSummary`],
//!    persist it and emit it.
//!
//! Readers of the store keep seeing the previous cache until the commit in
//! phase 3.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use octofhir_core::{FetchSummary, FetchStatus, ResourceType, validate_patient_id};
use octofhir_mcp::{GatewayConfig, ToolCaller};
use octofhir_storage::LocalStore;
use tokio::sync::mpsc;

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::fetcher::{FetchReport, PageProgress, ResourceFetcher};

/// Progress notifications of a sync run, in order.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Started {
        patient_id: String,
        resource_types: Vec<ResourceType>,
    },
    StepStarted(ResourceType),
    /// Page-level progress. Dropped when the channel is full.
    Progress(FetchStatus),
    StepFinished(FetchStatus),
    Completed(FetchSummary),
}

/// Requests cancellation of the running sync at the next step boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives the resource fetcher across all configured resource types.
///
/// The orchestrator is the only writer of the status list; observers read it
/// through [`statuses`](Self::statuses) or consume [`SyncEvent`]s.
pub struct SyncOrchestrator {
    store: Arc<dyn LocalStore>,
    fetcher: ResourceFetcher,
    config: SyncConfig,
    statuses: RwLock<Vec<FetchStatus>>,
    running: AtomicBool,
    cancel: CancelHandle,
}

impl SyncOrchestrator {
    pub fn new(
        caller: Arc<dyn ToolCaller>,
        store: Arc<dyn LocalStore>,
        gateway: Arc<GatewayConfig>,
        config: SyncConfig,
    ) -> Result<Self, SyncError> {
        config.validate().map_err(SyncError::Config)?;
        let statuses = config
            .resource_types
            .iter()
            .map(|rt| FetchStatus::pending(*rt))
            .collect();
        Ok(Self {
            store,
            fetcher: ResourceFetcher::new(caller, gateway, &config),
            config,
            statuses: RwLock::new(statuses),
            running: AtomicBool::new(false),
            cancel: CancelHandle::default(),
        })
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Snapshot of the per-type statuses of the current or last run.
    pub fn statuses(&self) -> Vec<FetchStatus> {
        self.statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Summary persisted by the last completed run.
    pub async fn last_summary(&self) -> Result<Option<FetchSummary>, SyncError> {
        Ok(self.store.load_last_summary().await?)
    }

    /// A progress channel sized by the configuration.
    pub fn event_channel(&self) -> (mpsc::Sender<SyncEvent>, mpsc::Receiver<SyncEvent>) {
        mpsc::channel(self.config.event_buffer)
    }

    pub async fn run(&self, patient_id: &str) -> Result<FetchSummary, SyncError> {
        self.run_with_events(patient_id, None).await
    }

    /// Runs a full resync, sending progress to `events` when given.
    pub async fn run_with_events(
        &self,
        patient_id: &str,
        events: Option<mpsc::Sender<SyncEvent>>,
    ) -> Result<FetchSummary, SyncError> {
        if patient_id.trim().is_empty() {
            return Err(SyncError::MissingContext(
                "a patient id is required to sync".into(),
            ));
        }
        let patient_id = validate_patient_id(patient_id)?;
        let _guard = self.acquire()?;
        self.cancel.reset();

        let resource_types = self.config.resource_types.clone();
        tracing::info!(
            patient_id,
            resource_types = resource_types.len(),
            "Starting resync"
        );

        // Phase 1
        let mut tx = self.store.begin_resync().await?;
        tx.truncate_all().await?;
        *self.write_statuses() = resource_types
            .iter()
            .map(|rt| FetchStatus::pending(*rt))
            .collect();
        emit(
            &events,
            SyncEvent::Started {
                patient_id: patient_id.to_string(),
                resource_types: resource_types.clone(),
            },
        )
        .await;

        // Phase 2
        let mut cancelled = false;
        let mut patient_fetched = false;
        for (index, resource_type) in resource_types.iter().copied().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::info!(next = %resource_type, "Resync cancelled at step boundary");
                cancelled = true;
                break;
            }

            self.update_status(index, FetchStatus::start);
            emit(&events, SyncEvent::StepStarted(resource_type)).await;

            let mut on_page = |progress: PageProgress| {
                let status = self.update_status(index, |s| {
                    s.advance(progress.fetched, progress.expected_total)
                });
                if let Some(sender) = &events {
                    let _ = sender.try_send(SyncEvent::Progress(status));
                }
            };
            let report = self
                .fetcher
                .fetch_into(patient_id, resource_type, tx.as_mut(), &mut on_page)
                .await;

            if resource_type == ResourceType::Patient {
                patient_fetched = report.patient_fetched();
            }
            let status = self.update_status(index, |s| finish_status(s, &report));
            log_step(&status, &report);
            emit(&events, SyncEvent::StepFinished(status)).await;
        }

        // Phase 3
        let summary = FetchSummary::from_statuses(
            patient_id,
            self.statuses().iter(),
            cancelled,
            patient_fetched,
        );
        if cancelled {
            // The staged cache is truncated for every type not reached yet.
            tx.rollback().await?;
            tracing::info!(patient_id, "Cancelled resync discarded; cache unchanged");
        } else {
            tx.commit().await?;
            self.store.persist_summary(&summary).await?;
        }

        tracing::info!(
            patient_id,
            total = summary.total,
            errors = summary.errors.len(),
            cancelled,
            "Resync finished"
        );
        emit(&events, SyncEvent::Completed(summary.clone())).await;
        Ok(summary)
    }

    fn acquire(&self) -> Result<RunGuard<'_>, SyncError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(SyncError::AlreadyRunning);
        }
        Ok(RunGuard(&self.running))
    }

    fn write_statuses(&self) -> std::sync::RwLockWriteGuard<'_, Vec<FetchStatus>> {
        self.statuses.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_status(&self, index: usize, f: impl FnOnce(&mut FetchStatus)) -> FetchStatus {
        let mut statuses = self.write_statuses();
        let status = &mut statuses[index];
        f(status);
        status.clone()
    }
}

fn finish_status(status: &mut FetchStatus, report: &FetchReport) {
    let count = report.reported_count();
    if let Some(error) = &report.error {
        status.fail(error.to_string(), count);
        return;
    }
    status.complete(count);

    let mut warnings = Vec::new();
    if !report.save_failures.is_empty() {
        warnings.push(format!(
            "{} record(s) not saved ({})",
            report.save_failures.len(),
            report.save_failures[0]
        ));
    }
    if report.truncated {
        warnings.push(format!("stopped after {} pages", report.pages));
    }
    if !warnings.is_empty() {
        status.error = Some(warnings.join("; "));
    }
}

fn log_step(status: &FetchStatus, report: &FetchReport) {
    match &status.error {
        Some(error) => tracing::warn!(
            resource_type = %status.resource_type,
            state = %status.state,
            count = status.count,
            pages = report.pages,
            error = %error,
            "Resource type finished with errors"
        ),
        None => tracing::info!(
            resource_type = %status.resource_type,
            count = status.count,
            pages = report.pages,
            "Resource type synced"
        ),
    }
}

async fn emit(events: &Option<mpsc::Sender<SyncEvent>>, event: SyncEvent) {
    if let Some(sender) = events
        && sender.send(event).await.is_err()
    {
        tracing::debug!("Sync progress receiver dropped");
    }
}
