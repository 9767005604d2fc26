//! Command line configuration.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `CAREHUB_STORE_OWNER` | - | Repository owner |
//! | `CAREHUB_STORE_REPO` | - | Repository name |
//! | `CAREHUB_STORE_BRANCH` | main | Branch to read and commit |
//! | `CAREHUB_STORE_BASE_PATH` | data | Directory holding collection files |
//! | `CAREHUB_STORE_API_URL` | https://api.github.com | Content API root |
//! | `CAREHUB_STORE_TOKEN` | - | Bearer token for the content API |
//! | `CAREHUB_STORE_SCHEMAS` | - | JSON schema registry file (built-in catalog if unset) |
//! | `CAREHUB_LOG_LEVEL` | info | Log level |

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;

use carehub_persistence::schema::catalog::platform_schemas;
use carehub_persistence::{SchemaRegistry, StoreConfig};

#[derive(Debug, Clone, Parser)]
#[command(name = "carehub-store")]
#[command(about = "Read and modify CareHub collections")]
pub struct CliConfig {
    /// Repository owner (user or organisation).
    #[arg(long, env = "CAREHUB_STORE_OWNER")]
    pub owner: String,

    /// Repository name.
    #[arg(long, env = "CAREHUB_STORE_REPO")]
    pub repo: String,

    #[arg(long, env = "CAREHUB_STORE_BRANCH", default_value = "main")]
    pub branch: String,

    /// Directory holding the collection files.
    #[arg(long, env = "CAREHUB_STORE_BASE_PATH", default_value = "data")]
    pub base_path: String,

    #[arg(long, env = "CAREHUB_STORE_API_URL", default_value = "https://api.github.com")]
    pub api_url: String,

    /// Bearer token for the content API.
    #[arg(long, env = "CAREHUB_STORE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// JSON file with collection schemas. The built-in catalog is used if unset.
    #[arg(long, env = "CAREHUB_STORE_SCHEMAS")]
    pub schemas: Option<PathBuf>,

    /// Request timeout in seconds.
    #[arg(long, env = "CAREHUB_STORE_TIMEOUT", default_value = "30")]
    pub timeout: u64,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "CAREHUB_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Print every document of a collection.
    Get {
        collection: String,
        /// Bypass the cache and re-read the remote.
        #[arg(long)]
        force: bool,
    },
    /// Print documents whose fields equal the given values.
    Find {
        collection: String,
        /// `field=value` condition; repeatable. Values are parsed as JSON
        /// when possible and taken as strings otherwise.
        #[arg(long = "where", value_name = "FIELD=VALUE", value_parser = parse_condition)]
        conditions: Vec<(String, Value)>,
    },
    /// Print the document with the given id or uid.
    GetById { collection: String, key: String },
    /// Insert a document given as a JSON object.
    Insert { collection: String, data: String },
    /// Merge a JSON object into the document with the given id or uid.
    Update {
        collection: String,
        key: String,
        data: String,
    },
    /// Delete the document with the given id or uid.
    Delete { collection: String, key: String },
    /// List collections with a registered schema.
    Collections,
}

impl CliConfig {
    /// Store configuration for the selected repository.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            branch: self.branch.clone(),
            base_path: self.base_path.clone(),
            api_base_url: self.api_url.clone(),
            auth_token: self.token.clone(),
            request_timeout_secs: Some(self.timeout),
            ..StoreConfig::new(&self.owner, &self.repo)
        }
    }

    pub fn load_schemas(&self) -> anyhow::Result<SchemaRegistry> {
        let Some(path) = &self.schemas else {
            return Ok(platform_schemas());
        };
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading schema file {}", path.display()))?;
        let registry = SchemaRegistry::from_json(&json)
            .with_context(|| format!("parsing schema file {}", path.display()))?;
        Ok(registry)
    }
}

/// Parses `field=value`.
pub fn parse_condition(raw: &str) -> Result<(String, Value), String> {
    let (field, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected FIELD=VALUE, got '{raw}'"))?;
    if field.is_empty() {
        return Err(format!("empty field name in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((field.to_string(), value))
}

/// Parses a command line JSON payload.
pub fn parse_payload(raw: &str) -> anyhow::Result<Value> {
    serde_json::from_str(raw).context("payload is not valid JSON")
}
