use anyhow::Result;
use colored::Colorize;
use octofhir_core::{FetchState, FetchStatus, FetchSummary};
use octofhir_mcp::ToolInfo;
use octofhir_query::QueryAnswer;
use serde::Serialize;
use tabled::builder::Builder;
use tabled::settings::Style;
use time::format_description::well_known::Rfc3339;

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

pub fn print_warning(msg: &str) {
    eprintln!("{} {}", "!".yellow(), msg);
}

/// One progress line per finished resource type.
pub fn print_step(status: &FetchStatus) {
    match (status.state, &status.error) {
        (FetchState::Error, Some(error)) => println!(
            "  {} {:<20} {}",
            "✗".red(),
            status.resource_type.as_str(),
            error.red()
        ),
        (_, Some(warning)) => println!(
            "  {} {:<20} {:>5}  {}",
            "!".yellow(),
            status.resource_type.as_str(),
            status.count,
            warning.yellow()
        ),
        _ => println!(
            "  {} {:<20} {:>5}",
            "✓".green(),
            status.resource_type.as_str(),
            status.count
        ),
    }
}

pub fn print_summary(summary: &FetchSummary) {
    let mut builder = Builder::default();
    builder.push_record(["Resource type", "Records"]);
    for (resource_type, count) in &summary.resource_counts {
        builder.push_record([resource_type.to_string(), count.to_string()]);
    }
    builder.push_record(["Total".to_string(), summary.total.to_string()]);
    let table = builder.build().with(Style::rounded()).to_string();
    println!("{table}");

    let completed = summary
        .completed_at
        .format(&Rfc3339)
        .unwrap_or_else(|_| summary.completed_at.to_string());
    let outcome = if summary.cancelled {
        "cancelled".yellow()
    } else {
        "finished".green()
    };
    println!(
        "{}: Patient/{}  {} at {}",
        "Sync".cyan(),
        summary.patient_id,
        outcome,
        completed
    );
    if !summary.patient_fetched {
        print_warning("Patient demographics were not fetched; the Patient count reflects the patient in context");
    }
    for error in &summary.errors {
        println!("  {} {}", "✗".red(), error);
    }
}

pub fn print_tools(tools: &[ToolInfo]) {
    if tools.is_empty() {
        println!("No tools advertised.");
        return;
    }
    let mut builder = Builder::default();
    builder.push_record(["Name", "Description"]);
    for tool in tools {
        let description = tool
            .description
            .as_deref()
            .and_then(|d| d.lines().next())
            .unwrap_or("-");
        builder.push_record([tool.name.as_str(), description]);
    }
    let table = builder.build().with(Style::rounded()).to_string();
    println!("{table}");
}

pub fn print_answer(answer: &QueryAnswer) {
    println!(
        "{} {} from {} ({} matched)",
        "Answer:".cyan(),
        answer.resource_type,
        answer.provenance.to_string().bold(),
        answer.matched
    );
    if answer.is_empty() {
        println!("{}", answer.text());
        return;
    }
    let mut builder = Builder::default();
    builder.push_record(["Id", "Summary"]);
    for (record, line) in answer.records.iter().zip(answer.lines()) {
        builder.push_record([record.id.clone(), line]);
    }
    let table = builder.build().with(Style::rounded()).to_string();
    println!("{table}");
}
