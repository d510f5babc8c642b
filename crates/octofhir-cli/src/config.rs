use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use octofhir_mcp::GatewayConfig;
use serde::{Deserialize, Serialize};

use crate::cli::{Cli, OutputFormat};

pub const CONFIG_KEYS: &[&str] = &["server", "patient", "store", "format", "log_level", "token"];

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ProfileConfig {
    pub server: Option<String>,
    pub patient: Option<String>,
    pub store: Option<PathBuf>,
    pub format: Option<String>,
    pub log_level: Option<String>,
    /// Bearer token sent to the gateway.
    pub token: Option<String>,
}

impl ProfileConfig {
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            "server" => self.server = Some(value.to_string()),
            "patient" => {
                octofhir_core::validate_patient_id(value)?;
                self.patient = Some(value.to_string());
            }
            "store" => self.store = Some(PathBuf::from(value)),
            "format" => {
                parse_format(value)?;
                self.format = Some(value.to_string());
            }
            "log_level" => self.log_level = Some(value.to_string()),
            "token" => self.token = Some(value.to_string()),
            other => anyhow::bail!(
                "Unknown config key: {other}. Valid keys: {}",
                CONFIG_KEYS.join(", ")
            ),
        }
        Ok(())
    }
}

pub type ConfigFile = BTreeMap<String, ProfileConfig>;

fn config_dir() -> Result<PathBuf> {
    let dir = dirs::home_dir()
        .context("Cannot determine home directory")?
        .join(".octofhir-gw");
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

fn load_from(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        return Ok(ConfigFile::new());
    }
    let content = fs::read_to_string(path)?;
    toml::from_str(&content).with_context(|| format!("Invalid config file {}", path.display()))
}

pub fn load_profile(profile: &str) -> Result<ProfileConfig> {
    let mut all = load_from(&config_path()?)?;
    Ok(all.remove(profile).unwrap_or_default())
}

pub fn save_profile(profile: &str, config: &ProfileConfig) -> Result<()> {
    let path = config_path()?;
    let mut all = load_from(&path)?;
    all.insert(profile.to_string(), config.clone());
    let content = toml::to_string_pretty(&all)?;
    fs::write(path, content)?;
    Ok(())
}

fn parse_format(value: &str) -> Result<OutputFormat> {
    OutputFormat::from_str(value, true)
        .map_err(|_| anyhow::anyhow!("Unknown format: {value}. Valid formats: table, json"))
}

/// Effective settings: flags and env vars first, then the profile.
#[derive(Debug, Clone)]
pub struct Settings {
    pub profile: String,
    pub server: Option<String>,
    pub patient: Option<String>,
    pub store: PathBuf,
    pub format: OutputFormat,
    pub log_level: String,
    pub token: Option<String>,
}

impl Settings {
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let profile = load_profile(&cli.profile)?;
        let store = match cli.store.clone().or(profile.store.clone()) {
            Some(store) => store,
            None => config_dir()?.join(format!("cache.{}.json", cli.profile)),
        };
        Self::merge(cli, profile, store)
    }

    fn merge(cli: &Cli, profile: ProfileConfig, store: PathBuf) -> Result<Self> {
        let format = match (cli.format, profile.format.as_deref()) {
            (Some(format), _) => format,
            (None, Some(value)) => parse_format(value)?,
            (None, None) => OutputFormat::default(),
        };
        Ok(Self {
            profile: cli.profile.clone(),
            server: cli.server.clone().or(profile.server),
            patient: cli.patient.clone().or(profile.patient),
            store,
            format,
            log_level: cli
                .log_level
                .clone()
                .or(profile.log_level)
                .unwrap_or_else(|| "info".to_string()),
            token: std::env::var("OCTOFHIR_GW_TOKEN").ok().or(profile.token),
        })
    }

    /// Gateway connection settings; the server must be configured.
    pub fn gateway(&self) -> Result<GatewayConfig> {
        let Some(server) = &self.server else {
            anyhow::bail!(
                "No gateway URL configured. Use --server, set OCTOFHIR_GW_URL, or run: octofhir-gw config set server <url>"
            );
        };
        let mut config = GatewayConfig::new(server.clone());
        config.bearer_token = self.token.clone();
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid gateway settings: {e}"))?;
        Ok(config)
    }

    /// The patient in context, or an empty id that the sync and query
    /// layers reject with a missing-context error.
    pub fn patient_id(&self) -> &str {
        self.patient.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_set_known_keys() {
        let mut cfg = ProfileConfig::default();
        cfg.set("server", "http://localhost:3000/mcp").unwrap();
        cfg.set("patient", "p-1").unwrap();
        cfg.set("format", "json").unwrap();
        assert_eq!(cfg.server.as_deref(), Some("http://localhost:3000/mcp"));
        assert_eq!(cfg.patient.as_deref(), Some("p-1"));

        assert!(cfg.set("patient", "Patient/p-1").is_err());
        assert!(cfg.set("format", "yaml").is_err());
        assert!(cfg.set("color", "always").is_err());
    }

    #[test]
    fn test_profiles_roundtrip_through_toml() {
        let dir = std::env::temp_dir().join(format!("octofhir-gw-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");

        let mut all = ConfigFile::new();
        let mut dev = ProfileConfig::default();
        dev.set("server", "http://dev/mcp").unwrap();
        all.insert("dev".into(), dev.clone());
        fs::write(&path, toml::to_string_pretty(&all).unwrap()).unwrap();

        let loaded = load_from(&path).unwrap();
        assert_eq!(loaded.get("dev"), Some(&dev));
        assert!(load_from(&dir.join("missing.toml")).unwrap().is_empty());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_flags_override_profile() {
        let cli = Cli::try_parse_from([
            "octofhir-gw", "summary", "--server", "http://flag/mcp", "--format", "json",
        ])
        .unwrap();
        let profile = ProfileConfig {
            server: Some("http://profile/mcp".into()),
            patient: Some("p1".into()),
            format: Some("table".into()),
            ..ProfileConfig::default()
        };
        let settings = Settings::merge(&cli, profile, PathBuf::from("cache.json")).unwrap();
        assert_eq!(settings.server.as_deref(), Some("http://flag/mcp"));
        assert_eq!(settings.format, OutputFormat::Json);
        assert_eq!(settings.patient_id(), "p1");
        assert_eq!(settings.gateway().unwrap().url, "http://flag/mcp");
    }
}
