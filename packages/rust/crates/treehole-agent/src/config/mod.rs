//! Config namespace: agent config and runtime settings loading.

mod agent;
mod settings;

pub use agent::{AgentConfig, DEFAULT_INFERENCE_URL, DEFAULT_MODEL, MemoryConfig, default_state_path};
pub use settings::{
    LlmSettings, MemorySettings, RuntimeSettings, load_runtime_settings,
    load_runtime_settings_from_paths, runtime_settings_paths, set_config_home_override,
};
