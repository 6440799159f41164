// Server Configuration
// Defaults, an optional config.json in the state directory, and RALPH_*
// environment overrides for secrets.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use ralph_core::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    pub retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries, self.base_delay_ms, self.max_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RalphConfig {
    pub webhook_secret: String,
    pub db_path: PathBuf,
    pub github_api_base: String,
    pub github_token: String,
    pub default_branch: String,
    pub agent_base_url: String,
    pub auto_merge_enabled: bool,
    pub max_task_attempts: u32,
    pub spec_retry: RetrySettings,
    pub task_retry: RetrySettings,
    pub retention_days: u32,
    pub run_list_limit: usize,
}

impl Default for RalphConfig {
    fn default() -> Self {
        Self {
            webhook_secret: String::new(),
            db_path: PathBuf::from(".ralph/ralph.db"),
            github_api_base: "https://api.github.com".to_string(),
            github_token: String::new(),
            default_branch: "main".to_string(),
            agent_base_url: "http://127.0.0.1:8700".to_string(),
            auto_merge_enabled: false,
            max_task_attempts: 5,
            spec_retry: RetrySettings {
                retries: 2,
                base_delay_ms: 500,
                max_delay_ms: 2_500,
            },
            task_retry: RetrySettings {
                retries: 2,
                base_delay_ms: 1_000,
                max_delay_ms: 6_000,
            },
            retention_days: 30,
            run_list_limit: 50,
        }
    }
}

impl RalphConfig {
    /// Load config.json from the state directory if present, then apply
    /// environment overrides. Secrets normally arrive via environment.
    pub async fn load(state_dir: &Path) -> anyhow::Result<RalphConfig> {
        let path = state_dir.join("config.json");
        let mut config = if path.exists() {
            let raw = fs::read_to_string(&path).await?;
            serde_json::from_str(&raw)?
        } else {
            RalphConfig {
                db_path: state_dir.join("ralph.db"),
                ..RalphConfig::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(secret) = std::env::var("RALPH_WEBHOOK_SECRET") {
            if !secret.trim().is_empty() {
                self.webhook_secret = secret;
            }
        }
        if let Ok(token) = std::env::var("RALPH_GITHUB_TOKEN") {
            if !token.trim().is_empty() {
                self.github_token = token;
            }
        }
        if let Ok(url) = std::env::var("RALPH_AGENT_BASE_URL") {
            if !url.trim().is_empty() {
                self.agent_base_url = url;
            }
        }
        if let Ok(flag) = std::env::var("RALPH_AUTO_MERGE") {
            self.auto_merge_enabled = matches!(flag.as_str(), "1" | "true" | "yes");
        }
    }
}
