use std::time::Duration;

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct ControllerConfig {
    #[envconfig(from = "EVSRC_PROFILE", default = "dev")]
    pub profile: String,

    /// Worker tasks draining the queue (profile default: 2 in dev, 8 in prod)
    /// Env: EVSRC_WORKERS
    #[envconfig(from = "EVSRC_WORKERS")]
    pub workers: Option<usize>,

    /// Full resync interval in seconds (profile default: 300 in dev, 36000 in prod)
    /// Env: EVSRC_RESYNC_SECS
    #[envconfig(from = "EVSRC_RESYNC_SECS")]
    pub resync_secs: Option<u64>,

    #[envconfig(nested)]
    pub backoff: BackoffConfig,

    /// Upper bound on every external call made while reconciling.
    #[envconfig(from = "EVSRC_CALL_TIMEOUT_SECS", default = "30")]
    pub call_timeout_secs: u64,

    #[envconfig(from = "EVSRC_CONFLICT_RETRIES", default = "5")]
    pub conflict_retries: u32,

    /// Comma-separated source kinds to own; every built-in kind when unset.
    #[envconfig(from = "EVSRC_KINDS")]
    pub kinds: Option<String>,

    #[envconfig(nested)]
    pub dev: DevConfig,
}

#[derive(Envconfig, Clone, Debug)]
pub struct BackoffConfig {
    #[envconfig(from = "EVSRC_BACKOFF_BASE_MS", default = "5")]
    pub base_ms: u64,
    #[envconfig(from = "EVSRC_BACKOFF_MAX_SECS", default = "1000")]
    pub max_secs: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 5,
            max_secs: 1000,
        }
    }
}

#[derive(Envconfig, Clone, Debug, Default)]
pub struct DevConfig {
    /// JSON array of sources created at startup.
    /// Env: EVSRC_SEED_FILE
    #[envconfig(from = "EVSRC_SEED_FILE")]
    pub seed_file: Option<String>,
    /// Mark children Ready as soon as they appear, standing in for the
    /// topic and subscription controllers (profile default: true in dev)
    /// Env: EVSRC_SIMULATE_READY
    #[envconfig(from = "EVSRC_SIMULATE_READY")]
    pub simulate_ready: Option<bool>,
}

impl ControllerConfig {
    /// Apply profile → defaults mapping, while respecting explicit env overrides.
    ///
    /// - dev: workers=2, resync=300s, simulate_ready=true
    /// - prod: workers=8, resync=36000s, simulate_ready=false
    pub fn apply_profile_defaults(mut self) -> Self {
        let (def_workers, def_resync, def_simulate) = match self.profile.as_str() {
            "prod" | "production" | "full" => (8, 36_000, false),
            _ /* dev */ => (2, 300, true),
        };

        if self.workers.is_none() {
            self.workers = Some(def_workers);
        }
        if self.resync_secs.is_none() {
            self.resync_secs = Some(def_resync);
        }
        if self.dev.simulate_ready.is_none() {
            self.dev.simulate_ready = Some(def_simulate);
        }
        self
    }

    pub fn workers(&self) -> usize {
        self.workers.unwrap_or(2).max(1)
    }

    pub fn resync_period(&self) -> Duration {
        Duration::from_secs(self.resync_secs.unwrap_or(300).max(1))
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs.max(1))
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff.base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff.max_secs)
    }

    pub fn simulate_ready(&self) -> bool {
        self.dev.simulate_ready.unwrap_or(false)
    }

    /// Owned kinds from `EVSRC_KINDS`, or `None` for every built-in kind.
    pub fn owned_kinds(&self) -> Option<Vec<String>> {
        let kinds: Vec<String> = self
            .kinds
            .as_deref()?
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect();
        if kinds.is_empty() { None } else { Some(kinds) }
    }
}
