use std::path::PathBuf;
use std::time::Duration;

use crate::engine::ConflictPolicy;

/// Engine settings. `from_env` reads `COACHCAL_*` variables; anything unset
/// or unparseable keeps its default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub conflict_policy: ConflictPolicy,
    /// Base URL of the recurrence job service. Offload is off when unset.
    pub remote_url: Option<String>,
    pub remote_timeout: Duration,
    /// Series estimated above this many occurrences go to the remote job.
    pub remote_threshold: usize,
    pub view_cache_capacity: usize,
    pub data_dir: Option<PathBuf>,
    pub metrics_port: Option<u16>,
    /// Log appends between compactions of the durable store (0 = never).
    pub compact_threshold: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            conflict_policy: ConflictPolicy::default(),
            remote_url: None,
            remote_timeout: Duration::from_secs(30),
            remote_threshold: 500,
            view_cache_capacity: 512,
            data_dir: None,
            metrics_port: None,
            compact_threshold: 1000,
        }
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(var)
    }

    /// Build from an arbitrary key lookup; `from_env` passes the process env.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let get = |name: &str| lookup(name).map(|s| s.trim().to_string());
        let num = |name: &str| get(name).and_then(|s| s.parse::<u64>().ok());
        Self {
            conflict_policy: get("COACHCAL_CONFLICT_POLICY")
                .and_then(|s| s.parse().ok())
                .unwrap_or(d.conflict_policy),
            remote_url: get("COACHCAL_REMOTE_URL").filter(|s| !s.is_empty()),
            remote_timeout: num("COACHCAL_REMOTE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(d.remote_timeout),
            remote_threshold: num("COACHCAL_REMOTE_THRESHOLD")
                .map(|n| n as usize)
                .unwrap_or(d.remote_threshold),
            view_cache_capacity: num("COACHCAL_VIEW_CACHE_CAPACITY")
                .map(|n| n as usize)
                .filter(|n| *n > 0)
                .unwrap_or(d.view_cache_capacity),
            data_dir: get("COACHCAL_DATA_DIR").filter(|s| !s.is_empty()).map(PathBuf::from),
            metrics_port: get("COACHCAL_METRICS_PORT").and_then(|s| s.parse().ok()),
            compact_threshold: num("COACHCAL_COMPACT_THRESHOLD").unwrap_or(d.compact_threshold),
        }
    }

    /// Log level filter for `observability::init_tracing`.
    pub fn log_filter() -> String {
        var("RUST_LOG").unwrap_or_else(|| "coachcal=info".to_string())
    }
}
