//! Agent configuration: inference API, models, API key, memory tuning.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use treehole_memory::{
    ConsolidationConfig, DEFAULT_CONSOLIDATION_THRESHOLD, DEFAULT_MANUAL_WINDOW,
    DEFAULT_NOTIFICATION_CAPACITY, DEFAULT_RETENTION_CAP,
};

use super::settings::{RuntimeSettings, absolutize, project_root};
use crate::resolve::{
    resolve_bool, resolve_optional_string, resolve_positive_u64, resolve_positive_usize,
    resolve_string, resolve_u64,
};

/// Default OpenAI-compatible chat completions endpoint (Volcengine Ark).
pub const DEFAULT_INFERENCE_URL: &str = "https://ark.cn-beijing.volces.com/api/v3/chat/completions";
/// Default chat model id.
pub const DEFAULT_MODEL: &str = "doubao-pro-32k";

const API_KEY_ENV: &str = "TREEHOLE_API_KEY";
const API_URL_ENV: &str = "TREEHOLE_API_URL";
const MODEL_ENV: &str = "TREEHOLE_MODEL";
const SUMMARY_MODEL_ENV: &str = "TREEHOLE_SUMMARY_MODEL";
const COMPLETION_TIMEOUT_ENV: &str = "TREEHOLE_COMPLETION_TIMEOUT_SECS";
const THRESHOLD_ENV: &str = "TREEHOLE_CONSOLIDATION_THRESHOLD";
const MANUAL_WINDOW_ENV: &str = "TREEHOLE_MANUAL_WINDOW";
const RETENTION_CAP_ENV: &str = "TREEHOLE_RETENTION_CAP";
const SUMMARY_TIMEOUT_ENV: &str = "TREEHOLE_SUMMARY_TIMEOUT_SECS";
const MIN_RETRY_INTERVAL_ENV: &str = "TREEHOLE_MIN_RETRY_INTERVAL_MS";
const STATE_PATH_ENV: &str = "TREEHOLE_STATE_PATH";
const STRICT_STARTUP_ENV: &str = "TREEHOLE_STRICT_STARTUP";

const DEFAULT_COMPLETION_TIMEOUT_SECS: u64 = 60;
const DEFAULT_SUMMARY_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MIN_RETRY_INTERVAL_MS: u64 = 10_000;

/// Conversation memory tuning and persistence location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Pending turns that start an automatic consolidation.
    #[serde(default = "default_threshold")]
    pub threshold: usize,
    /// Recent turns re-summarized by a manual consolidation.
    #[serde(default = "default_manual_window")]
    pub manual_window: usize,
    /// Retained digests.
    #[serde(default = "default_retention_cap")]
    pub retention_cap: usize,
    /// Upper bound on one summarization call.
    #[serde(default = "default_summary_timeout_secs")]
    pub summary_timeout_secs: u64,
    /// Minimum delay after a failed automatic consolidation.
    #[serde(default = "default_min_retry_interval_ms")]
    pub min_retry_interval_ms: u64,
    /// Conversation state file; `None` keeps everything in memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_path: Option<PathBuf>,
    /// Fail startup when the state file cannot be loaded.
    #[serde(default)]
    pub strict_startup: bool,
}

fn default_threshold() -> usize {
    DEFAULT_CONSOLIDATION_THRESHOLD
}
fn default_manual_window() -> usize {
    DEFAULT_MANUAL_WINDOW
}
fn default_retention_cap() -> usize {
    DEFAULT_RETENTION_CAP
}
fn default_summary_timeout_secs() -> u64 {
    DEFAULT_SUMMARY_TIMEOUT_SECS
}
fn default_min_retry_interval_ms() -> u64 {
    DEFAULT_MIN_RETRY_INTERVAL_MS
}

/// `<PRJ_DATA_HOME or PRJ_ROOT/.data>/treehole/conversation.json`.
pub fn default_state_path() -> PathBuf {
    let root = project_root();
    let data_home = std::env::var("PRJ_DATA_HOME")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map_or_else(|| root.join(".data"), PathBuf::from);
    data_home.join("treehole").join("conversation.json")
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            manual_window: default_manual_window(),
            retention_cap: default_retention_cap(),
            summary_timeout_secs: default_summary_timeout_secs(),
            min_retry_interval_ms: default_min_retry_interval_ms(),
            state_path: None,
            strict_startup: false,
        }
    }
}

impl MemoryConfig {
    /// Engine tuning derived from this config.
    pub fn consolidation(&self) -> ConsolidationConfig {
        ConsolidationConfig {
            threshold: self.threshold,
            manual_window: self.manual_window,
            retention_cap: self.retention_cap,
            summary_timeout: Duration::from_secs(self.summary_timeout_secs),
            min_retry_interval: Duration::from_millis(self.min_retry_interval_ms),
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
        }
        .normalized()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub inference_url: String,
    pub model: String,
    /// Model used for consolidation; usually a cheaper one.
    pub summary_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_completion_timeout_secs")]
    pub completion_timeout_secs: u64,
    #[serde(default)]
    pub memory: MemoryConfig,
}

fn default_completion_timeout_secs() -> u64 {
    DEFAULT_COMPLETION_TIMEOUT_SECS
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            inference_url: DEFAULT_INFERENCE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            summary_model: DEFAULT_MODEL.to_string(),
            api_key: None,
            completion_timeout_secs: default_completion_timeout_secs(),
            memory: MemoryConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Resolve from environment (`TREEHOLE_*`), then settings, then defaults.
    pub fn resolve(settings: &RuntimeSettings) -> Self {
        let llm = &settings.llm;
        let memory = &settings.memory;

        let model = resolve_string(MODEL_ENV, llm.model.as_deref(), DEFAULT_MODEL);
        let summary_model = resolve_string(SUMMARY_MODEL_ENV, llm.summary_model.as_deref(), &model);
        let api_key = resolve_optional_string(API_KEY_ENV, None).or_else(|| {
            llm.api_key_env
                .as_deref()
                .and_then(|name| resolve_optional_string(name, None))
        });
        let state_path = resolve_optional_string(STATE_PATH_ENV, memory.state_path.as_deref())
            .map_or_else(default_state_path, |raw| {
                absolutize(&project_root(), PathBuf::from(raw))
            });

        Self {
            inference_url: resolve_string(
                API_URL_ENV,
                llm.inference_url.as_deref(),
                DEFAULT_INFERENCE_URL,
            ),
            model,
            summary_model,
            api_key,
            completion_timeout_secs: resolve_positive_u64(
                COMPLETION_TIMEOUT_ENV,
                llm.completion_timeout_secs,
                DEFAULT_COMPLETION_TIMEOUT_SECS,
            ),
            memory: MemoryConfig {
                threshold: resolve_positive_usize(
                    THRESHOLD_ENV,
                    memory.threshold,
                    DEFAULT_CONSOLIDATION_THRESHOLD,
                ),
                manual_window: resolve_positive_usize(
                    MANUAL_WINDOW_ENV,
                    memory.manual_window,
                    DEFAULT_MANUAL_WINDOW,
                ),
                retention_cap: resolve_positive_usize(
                    RETENTION_CAP_ENV,
                    memory.retention_cap,
                    DEFAULT_RETENTION_CAP,
                ),
                summary_timeout_secs: resolve_positive_u64(
                    SUMMARY_TIMEOUT_ENV,
                    memory.summary_timeout_secs,
                    DEFAULT_SUMMARY_TIMEOUT_SECS,
                ),
                min_retry_interval_ms: resolve_u64(
                    MIN_RETRY_INTERVAL_ENV,
                    memory.min_retry_interval_ms,
                    DEFAULT_MIN_RETRY_INTERVAL_MS,
                ),
                state_path: Some(state_path),
                strict_startup: resolve_bool(STRICT_STARTUP_ENV, memory.strict_startup, false),
            },
        }
    }

    /// Whether real LLM calls are possible; without a key the agent runs offline.
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|key| !key.trim().is_empty())
    }

    /// Verbatim turns sent with every completion request.
    ///
    /// Equal to the consolidation threshold, so the window ends where the
    /// pending range begins and no turn falls between window and digest.
    pub fn window_turns(&self) -> usize {
        self.memory.threshold.max(1)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion_timeout_secs.max(1))
    }
}
