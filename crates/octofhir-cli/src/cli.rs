use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use octofhir_query::ExecutionMode;
use octofhir_storage::SortOrder;

#[derive(Parser)]
#[command(name = "octofhir-gw")]
#[command(about = "Sync and query a patient's FHIR record through an MCP gateway")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Gateway endpoint (overrides config and OCTOFHIR_GW_URL env var)
    #[arg(short, long, global = true, env = "OCTOFHIR_GW_URL")]
    pub server: Option<String>,

    /// Patient id in context
    #[arg(long, global = true, env = "OCTOFHIR_GW_PATIENT")]
    pub patient: Option<String>,

    /// Local cache snapshot file
    #[arg(long, global = true, env = "OCTOFHIR_GW_STORE")]
    pub store: Option<PathBuf>,

    /// Config profile name
    #[arg(short, long, global = true, env = "OCTOFHIR_GW_PROFILE", default_value = "default")]
    pub profile: String,

    /// Output format
    #[arg(short, long, global = true)]
    pub format: Option<OutputFormat>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Clone, Copy, ValueEnum, Default, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Open a session and show gateway info
    Status,
    /// List tools advertised by the gateway
    Tools,
    /// Resync the patient's record into the local cache
    Sync(SyncArgs),
    /// Show the summary of the last sync
    Summary,
    /// Run a structured query
    Query(QueryArgs),
    /// Ask a free-text question
    Ask(AskArgs),
    /// Manage CLI configuration
    Config(ConfigArgs),
}

#[derive(clap::Args)]
pub struct SyncArgs {
    /// Records per page (capped at 100)
    #[arg(long)]
    pub page_size: Option<u32>,
    /// Maximum pages fetched per resource type
    #[arg(long)]
    pub max_pages: Option<u32>,
    /// Resource types to sync, comma separated (default: all supported)
    #[arg(long, value_delimiter = ',')]
    pub types: Vec<String>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum SortArg {
    /// Most recent first
    Newest,
    /// Oldest first
    Oldest,
}

impl From<SortArg> for SortOrder {
    fn from(value: SortArg) -> Self {
        match value {
            SortArg::Newest => SortOrder::DateDescending,
            SortArg::Oldest => SortOrder::DateAscending,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ModeArg {
    Local,
    Remote,
    Either,
}

impl From<ModeArg> for ExecutionMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Local => ExecutionMode::Local,
            ModeArg::Remote => ExecutionMode::Remote,
            ModeArg::Either => ExecutionMode::Either,
        }
    }
}

#[derive(clap::Args)]
pub struct QueryArgs {
    /// Resource type (e.g. Observation)
    #[arg(long = "type", required_unless_present = "plan")]
    pub resource_type: Option<String>,
    /// Codes to match, comma separated (e.g. 2093-3)
    #[arg(long, value_delimiter = ',')]
    pub code: Vec<String>,
    /// Code system the codes belong to (e.g. http://loinc.org)
    #[arg(long)]
    pub system: Option<String>,
    /// Earliest date, YYYY-MM-DD
    #[arg(long)]
    pub from: Option<String>,
    /// Latest date, YYYY-MM-DD
    #[arg(long)]
    pub to: Option<String>,
    #[arg(long)]
    pub sort: Option<SortArg>,
    /// Maximum number of records
    #[arg(long)]
    pub limit: Option<usize>,
    /// 0-based position of a single record in the sorted result
    #[arg(long)]
    pub index: Option<usize>,
    /// Where the answer may come from (default: either)
    #[arg(long)]
    pub mode: Option<ModeArg>,
    /// Read the whole plan from a JSON file instead
    #[arg(long, conflicts_with_all = ["resource_type", "code", "system", "from", "to", "sort", "limit", "index"])]
    pub plan: Option<PathBuf>,
}

#[derive(clap::Args)]
pub struct AskArgs {
    /// The question, e.g. "what was my latest cholesterol?"
    pub text: String,
    /// Override the interpreted execution mode
    #[arg(long)]
    pub mode: Option<ModeArg>,
    /// Print the interpreted plan before answering
    #[arg(long)]
    pub show_plan: bool,
}

#[derive(clap::Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current config
    Show,
    /// Set config value
    Set(ConfigSetArgs),
}

#[derive(clap::Args)]
pub struct ConfigSetArgs {
    /// Key to set (server, patient, store, format, log_level, token)
    pub key: String,
    /// Value
    pub value: String,
}
