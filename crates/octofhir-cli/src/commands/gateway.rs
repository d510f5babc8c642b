use anyhow::{Context, Result};
use colored::Colorize;

use crate::cli::OutputFormat;
use crate::config::Settings;
use crate::context::Gateway;
use crate::output::{print_json, print_tools};

pub async fn status(settings: &Settings) -> Result<()> {
    let gateway = Gateway::from_settings(settings)?;
    let url = gateway.config.url.clone();
    let result = gateway.client.initialize().await;
    let session = match result {
        Ok(session) => session,
        Err(e) => {
            println!("{} {} is {}: {e}", "✗".red(), url.cyan(), "unreachable".red());
            return Err(e).context("Handshake failed");
        }
    };

    if settings.format == OutputFormat::Json {
        print_json(&session)?;
    } else {
        println!("{} {} session {}", "✓".green(), url.cyan(), session.state.to_string().green());
        println!(
            "  {}: {}",
            "Session".cyan(),
            session.id.as_deref().unwrap_or("(none)")
        );
        println!(
            "  {}: {}",
            "Protocol".cyan(),
            session.protocol_version.as_deref().unwrap_or("unknown")
        );
        if let Some(info) = &session.server_info {
            println!("  {}: {} {}", "Server".cyan(), info.name, info.version);
        }
    }
    gateway.close().await;
    Ok(())
}

pub async fn tools(settings: &Settings) -> Result<()> {
    let gateway = Gateway::from_settings(settings)?;
    gateway.client.initialize().await.context("Handshake failed")?;
    let tools = gateway.client.list_tool_infos().await;
    gateway.close().await;
    let tools = tools.context("Listing tools failed")?;

    if settings.format == OutputFormat::Json {
        print_json(&tools)?;
    } else {
        print_tools(&tools);
        let fhir_tool = gateway.config.fhir_tool.as_str();
        if !tools.iter().any(|t| t.name == fhir_tool) {
            crate::output::print_warning(&format!(
                "The gateway does not advertise the FHIR request tool '{fhir_tool}'"
            ));
        }
    }
    Ok(())
}
