use anyhow::{Context, Result};
use colored::Colorize;
use octofhir_core::ResourceType;
use octofhir_storage::LocalStore;
use octofhir_sync::{SyncConfig, SyncEvent, SyncOrchestrator};

use crate::cli::{OutputFormat, SyncArgs};
use crate::config::Settings;
use crate::context::{Gateway, open_store};
use crate::output::{print_json, print_step, print_summary, print_warning};

fn sync_config(args: &SyncArgs) -> Result<SyncConfig> {
    let mut config = SyncConfig::default();
    if let Some(page_size) = args.page_size {
        config.page_size = page_size;
    }
    if let Some(max_pages) = args.max_pages {
        config.max_pages = max_pages;
    }
    if !args.types.is_empty() {
        config.resource_types = args
            .types
            .iter()
            .map(|t| t.trim().parse::<ResourceType>())
            .collect::<Result<_, _>>()?;
    }
    Ok(config)
}

pub async fn sync(settings: &Settings, args: &SyncArgs) -> Result<()> {
    let config = sync_config(args)?;
    let gateway = Gateway::from_settings(settings)?;
    let store = open_store(settings).await?;
    gateway.client.initialize().await.context("Handshake failed")?;

    let orchestrator = SyncOrchestrator::new(
        gateway.client.clone(),
        store,
        gateway.config.clone(),
        config,
    )?;

    let (events, mut rx) = orchestrator.event_channel();
    let show_progress = settings.format == OutputFormat::Table;
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if !show_progress {
                continue;
            }
            match event {
                SyncEvent::Started {
                    patient_id,
                    resource_types,
                } => println!(
                    "Syncing {} resource types for {}",
                    resource_types.len(),
                    format!("Patient/{patient_id}").cyan()
                ),
                SyncEvent::StepFinished(status) => print_step(&status),
                _ => {}
            }
        }
    });

    let cancel = orchestrator.cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            print_warning("Cancelling after the current resource type");
            cancel.cancel();
        }
    });

    let result = orchestrator
        .run_with_events(settings.patient_id(), Some(events))
        .await;
    interrupt.abort();
    let _ = printer.await;
    gateway.close().await;

    let summary = result.context("Sync failed")?;
    if settings.format == OutputFormat::Json {
        print_json(&summary)?;
    } else {
        print_summary(&summary);
        if summary.cancelled {
            print_warning("Cancelled run discarded; the cache still holds the previous sync");
        }
    }
    Ok(())
}

pub async fn summary(settings: &Settings) -> Result<()> {
    let store = open_store(settings).await?;
    let Some(summary) = store.load_last_summary().await? else {
        anyhow::bail!("No sync has completed yet. Run: octofhir-gw sync --patient <id>");
    };
    if settings.format == OutputFormat::Json {
        print_json(&summary)?;
    } else {
        print_summary(&summary);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_config_from_args() {
        let args = SyncArgs {
            page_size: Some(20),
            max_pages: None,
            types: vec!["Patient".into(), " Observation".into()],
        };
        let config = sync_config(&args).unwrap();
        assert_eq!(config.page_size, 20);
        assert_eq!(
            config.resource_types,
            vec![ResourceType::Patient, ResourceType::Observation]
        );

        let args = SyncArgs {
            page_size: None,
            max_pages: None,
            types: vec!["Appointment".into()],
        };
        assert!(sync_config(&args).is_err());
    }
}
