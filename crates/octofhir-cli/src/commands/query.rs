use std::fs;

use anyhow::{Context, Result};
use colored::Colorize;
use octofhir_core::{DateRange, ResourceType, parse_fhir_date};
use octofhir_query::{KeywordInterpreter, PlanFilters, QueryInterpreter, QueryPlan, QueryRouter};
use octofhir_storage::CodeFilter;

use crate::cli::{AskArgs, OutputFormat, QueryArgs};
use crate::config::Settings;
use crate::context::{Gateway, open_store};
use crate::output::{print_answer, print_json};

fn plan_from_args(args: &QueryArgs) -> Result<QueryPlan> {
    if let Some(path) = &args.plan {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Cannot read plan file {}", path.display()))?;
        let mut plan = QueryPlan::from_json(&json)?;
        if let Some(mode) = args.mode {
            plan.mode = mode.into();
        }
        return Ok(plan);
    }

    let resource_type: ResourceType = args
        .resource_type
        .as_deref()
        .context("--type is required without --plan")?
        .parse()?;
    let date = |value: &Option<String>| value.as_deref().map(parse_fhir_date).transpose();

    let mut filters = PlanFilters {
        sort: args.sort.map(Into::into),
        limit: args.limit,
        record_index: args.index,
        ..PlanFilters::default()
    };
    if !args.code.is_empty() {
        let mut codes = CodeFilter::new(args.code.iter().map(|c| c.trim()));
        codes.system = args.system.clone();
        filters.code_search = Some(codes);
    }
    let range = DateRange::new(date(&args.from)?, date(&args.to)?);
    if !range.is_unbounded() {
        filters.date_range = Some(range);
    }

    let plan = QueryPlan::new(resource_type)
        .with_filters(filters)
        .with_mode(args.mode.map(Into::into).unwrap_or_default());
    plan.validate()?;
    Ok(plan)
}

async fn router(settings: &Settings) -> Result<(QueryRouter, Gateway)> {
    let gateway = Gateway::from_settings(settings)?;
    let store = open_store(settings).await?;
    let router = QueryRouter::new(store, gateway.on_demand(), gateway.config.clone());
    Ok((router, gateway))
}

fn print(settings: &Settings, answer: &octofhir_query::QueryAnswer) -> Result<()> {
    if settings.format == OutputFormat::Json {
        print_json(answer)
    } else {
        print_answer(answer);
        Ok(())
    }
}

pub async fn query(settings: &Settings, args: &QueryArgs) -> Result<()> {
    let plan = plan_from_args(args)?;
    let (router, gateway) = router(settings).await?;
    let result = router.route(&plan, settings.patient.as_deref()).await;
    gateway.close().await;
    print(settings, &result?)
}

pub async fn ask(settings: &Settings, args: &AskArgs) -> Result<()> {
    let interpreter = KeywordInterpreter::new();
    let (router, gateway) = router(settings).await?;
    let patient = settings.patient.as_deref();

    let result = match (args.mode, args.show_plan) {
        (None, false) => router.ask(&interpreter, &args.text, patient).await,
        (mode, _) => {
            let mut plan = interpreter
                .interpret(&args.text, settings.patient_id())
                .await?;
            if let Some(mode) = mode {
                plan.mode = mode.into();
            }
            if args.show_plan {
                println!("{} {}", "Plan:".cyan(), serde_json::to_string(&plan)?);
            }
            router.route(&plan, patient).await
        }
    };
    gateway.close().await;
    print(settings, &result?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;
    use octofhir_query::ExecutionMode;
    use octofhir_storage::SortOrder;

    fn query_args(argv: &[&str]) -> QueryArgs {
        let mut full = vec!["octofhir-gw", "query"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Commands::Query(args) => args,
            _ => panic!("expected query command"),
        }
    }

    #[test]
    fn test_plan_from_flags() {
        let plan = plan_from_args(&query_args(&[
            "--type", "Observation", "--code", "2093-3", "--system", "http://loinc.org",
            "--from", "2023-01-01", "--sort", "newest", "--index", "0", "--mode", "local",
        ]))
        .unwrap();
        assert_eq!(plan.resource_type, ResourceType::Observation);
        assert_eq!(plan.mode, ExecutionMode::Local);
        assert_eq!(plan.filters.sort, Some(SortOrder::DateDescending));
        let codes = plan.filters.code_search.unwrap();
        assert_eq!(codes.to_search_value(), "http://loinc.org|2093-3");
        assert!(plan.filters.date_range.unwrap().end.is_none());
    }

    #[test]
    fn test_invalid_flags_rejected() {
        assert!(plan_from_args(&query_args(&["--type", "Appointment"])).is_err());
        assert!(plan_from_args(&query_args(&["--type", "Patient", "--code", "x"])).is_err());
        assert!(plan_from_args(&query_args(&["--type", "Condition", "--from", "01/02/2023"])).is_err());
    }
}
