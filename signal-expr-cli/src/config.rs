//! Configuration loading and parsing
//!
//! A configuration file is TOML with four parts: the `[context]` settings,
//! the `[defaults]` applied to rows without pulse or time window, the
//! `[[signals]]` table and the `[[queries]]` to evaluate.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use signal_expr::{ContextConfig, TableDefaults, TableRow};
use std::fs;
use std::path::Path;

/// Main application configuration (loaded from a .toml file)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub defaults: TableDefaults,
    #[serde(default)]
    pub emulator: EmulatorConfig,
    #[serde(default)]
    pub signals: Vec<TableRow>,
    #[serde(default)]
    pub queries: Vec<QueryConfig>,
}

/// Settings of the emulated data source
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmulatorConfig {
    #[serde(default = "default_secret")]
    pub secret: i64,
}

fn default_secret() -> i64 {
    signal_expr::access::DEFAULT_SECRET
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            secret: default_secret(),
        }
    }
}

/// An expression to evaluate after import
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryConfig {
    pub expr: String,
    /// Label used in the summary, defaults to the expression itself
    #[serde(default)]
    pub name: Option<String>,
}

impl QueryConfig {
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.expr)
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate(&config).with_context(|| format!("Invalid config file: {:?}", path))?;
    Ok(config)
}

fn validate(config: &AppConfig) -> Result<()> {
    for (idx, row) in config.signals.iter().enumerate() {
        if row.source.trim().is_empty() {
            bail!("signal #{} ({}) has no DS", idx + 1, row.variable);
        }
    }
    for query in &config.queries {
        if query.expr.trim().is_empty() {
            bail!("query '{}' has an empty expression", query.label());
        }
    }
    Ok(())
}
