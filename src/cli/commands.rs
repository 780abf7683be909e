//! CLI command definitions

use clap::Args;

/// Run a step document
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to the step document (YAML or JSON)
    #[arg(short, long)]
    pub file: String,

    /// Path to the job configuration YAML
    #[arg(short, long)]
    pub config: Option<String>,

    /// Job parameter overrides (key=value)
    #[arg(long = "set", value_parser = parse_key_value)]
    pub set: Vec<(String, String)>,

    /// Use fixtures instead of network requests
    #[arg(long)]
    pub testing: bool,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,
}

/// Validate a step document
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to the step document (YAML or JSON)
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Job name to filter by
    #[arg(short, long)]
    pub job: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show a single run
    #[arg(long)]
    pub run_id: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
