//! `/api/config`: read or override pipeline tuning for this session.

use crate::bridge::{apply_config, with_orchestrator};
use crate::config::PipelineConfig;
use crate::routes::util::pipeline_error_fragment;

/// Handle GET /api/config
/// Returns the active settings as JSON.
pub fn handle_config_get(_query: &str) -> String {
    match with_orchestrator(|o| Ok(serde_json::to_string(o.config())?)) {
        Ok(json) => json,
        Err(e) => format!("error: {}", e),
    }
}

/// Handle POST /api/config
/// Body is a JSON object; omitted fields take their defaults.
pub fn handle_config_post(body: &str) -> String {
    match PipelineConfig::from_json(body.trim()).and_then(apply_config) {
        Ok(()) => r#"<span class="text-emerald-600">Settings updated</span>"#.to_string(),
        Err(e) => pipeline_error_fragment(&e),
    }
}
