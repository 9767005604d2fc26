//! Store configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BackendError, StorageError, StorageResult, ValidationError};

/// Configuration for a collection store backed by a remote repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Repository owner (user or organisation).
    pub owner: String,

    /// Repository name.
    pub repo: String,

    /// Branch that collection files are read from and committed to.
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Directory prefix for collection files.
    #[serde(default = "default_base_path")]
    pub base_path: String,

    /// Root URL of the content API.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Optional bearer token for the content API.
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Total write attempts per job before a conflict becomes terminal.
    #[serde(default = "default_max_write_attempts")]
    pub max_write_attempts: u32,

    /// Fixed delay between write-queue drain attempts.
    #[serde(default = "default_drain_delay_ms")]
    pub drain_delay_ms: u64,

    /// Audit entries retained per collection.
    #[serde(default = "default_audit_capacity")]
    pub audit_capacity: usize,

    /// Optional timeout applied to each remote request.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,

    /// Prefix for commit messages produced by collection writes.
    #[serde(default = "default_commit_message_prefix")]
    pub commit_message_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            owner: String::new(),
            repo: String::new(),
            branch: default_branch(),
            base_path: default_base_path(),
            api_base_url: default_api_base_url(),
            auth_token: None,
            max_write_attempts: default_max_write_attempts(),
            drain_delay_ms: default_drain_delay_ms(),
            audit_capacity: default_audit_capacity(),
            request_timeout_secs: None,
            commit_message_prefix: default_commit_message_prefix(),
        }
    }
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_base_path() -> String {
    "data".to_string()
}

fn default_api_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_max_write_attempts() -> u32 {
    5
}

fn default_drain_delay_ms() -> u64 {
    250
}

fn default_audit_capacity() -> usize {
    100
}

fn default_commit_message_prefix() -> String {
    "carehub: update".to_string()
}

impl StoreConfig {
    /// Creates a configuration for `owner/repo` with all other settings defaulted.
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            ..Default::default()
        }
    }

    /// Validates configuration invariants.
    pub fn validate(&self) -> StorageResult<()> {
        let required = [
            ("owner", &self.owner),
            ("repo", &self.repo),
            ("branch", &self.branch),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(invalid_config(format!("{name} must not be empty")));
            }
        }

        let lower = self.api_base_url.trim().to_ascii_lowercase();
        if !lower.starts_with("http://") && !lower.starts_with("https://") {
            return Err(invalid_config(
                "api_base_url must start with http:// or https://",
            ));
        }

        if self.max_write_attempts == 0 {
            return Err(invalid_config("max_write_attempts must be > 0"));
        }

        if self.audit_capacity == 0 {
            return Err(invalid_config("audit_capacity must be > 0"));
        }

        if self.request_timeout_secs == Some(0) {
            return Err(invalid_config("request_timeout_secs must be > 0 when set"));
        }

        Ok(())
    }

    /// Delay between write-queue drain attempts.
    pub fn drain_delay(&self) -> Duration {
        Duration::from_millis(self.drain_delay_ms)
    }

    /// Returns the store path of a collection: `<base_path>/<name>.json`.
    pub fn collection_path(&self, collection: &str) -> StorageResult<String> {
        check_collection_name(collection)?;
        let base = self.base_path.trim_matches('/');
        if base.is_empty() {
            Ok(format!("{collection}.json"))
        } else {
            Ok(format!("{base}/{collection}.json"))
        }
    }
}

/// Rejects names that would escape the base path or produce odd file names.
pub(crate) fn check_collection_name(name: &str) -> Result<(), ValidationError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidCollectionName {
            name: name.to_string(),
        })
    }
}

fn invalid_config(message: impl Into<String>) -> StorageError {
    StorageError::Backend(BackendError::InvalidConfig {
        message: message.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> StoreConfig {
        StoreConfig::new("carehub", "platform-data")
    }

    #[test]
    fn defaults_match_write_queue_contract() {
        let config = base_config();
        assert_eq!(config.max_write_attempts, 5);
        assert_eq!(config.drain_delay(), Duration::from_millis(250));
        assert_eq!(config.audit_capacity, 100);
        assert_eq!(config.branch, "main");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_repository() {
        let config = StoreConfig::new("carehub", " ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_malformed_api_url() {
        let mut config = base_config();
        config.api_base_url = "ftp://api.example".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_attempts() {
        let mut config = base_config();
        config.max_write_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn collection_path_trims_slashes() {
        let mut config = base_config();
        config.base_path = "/db/v1/".to_string();
        assert_eq!(
            config.collection_path("appointments").unwrap(),
            "db/v1/appointments.json"
        );

        config.base_path = String::new();
        assert_eq!(config.collection_path("users").unwrap(), "users.json");
    }

    #[test]
    fn collection_path_rejects_traversal() {
        let config = base_config();
        assert!(config.collection_path("../secrets").is_err());
        assert!(config.collection_path("").is_err());
        assert!(config.collection_path("forum posts").is_err());
        assert!(config.collection_path("forum_posts").is_ok());
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"owner":"carehub","repo":"data","drain_delay_ms":0}"#)
                .unwrap();
        assert_eq!(config.base_path, "data");
        assert_eq!(config.drain_delay(), Duration::ZERO);
        assert_eq!(config.commit_message_prefix, "carehub: update");
    }
}
