use std::time::Duration;

use crate::errors::TrackerError;
use crate::store::DEFAULT_FINISHED_RETENTION;

/// Tracker behaviour options.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TrackerConfig {
    /// Timeout applied to each provider call unless overridden per submit.
    pub default_timeout: Duration,
    /// Upper bound on provider calls in flight at once.
    pub max_concurrent_dispatches: usize,
    /// Optional history retention cap per session (oldest entries dropped).
    pub max_history: Option<usize>,
    /// Finished tasks remembered per session for reads and late results.
    pub finished_task_retention: usize,
    /// Sessions idle for longer than this are evicted by `Tracker::evict_idle`.
    pub session_idle_ttl: Option<Duration>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(120),
            max_concurrent_dispatches: 4,
            max_history: None,
            finished_task_retention: DEFAULT_FINISHED_RETENTION,
            session_idle_ttl: None,
        }
    }
}

impl TrackerConfig {
    /// Builds a config from `GENSTUDIO_*` environment variables, keeping
    /// defaults for unset ones.
    ///
    /// - `GENSTUDIO_TASK_TIMEOUT_SECS`
    /// - `GENSTUDIO_MAX_CONCURRENT_DISPATCHES`
    /// - `GENSTUDIO_MAX_HISTORY`
    /// - `GENSTUDIO_FINISHED_TASK_RETENTION`
    /// - `GENSTUDIO_SESSION_IDLE_TTL_SECS`
    pub fn from_env() -> Result<Self, TrackerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, TrackerError> {
        let mut config = Self::default();
        if let Some(secs) = parse_var::<u64>(&lookup, "GENSTUDIO_TASK_TIMEOUT_SECS")? {
            config.default_timeout = Duration::from_secs(secs);
        }
        if let Some(limit) = parse_var::<usize>(&lookup, "GENSTUDIO_MAX_CONCURRENT_DISPATCHES")? {
            config.max_concurrent_dispatches = limit;
        }
        config.max_history = parse_var::<usize>(&lookup, "GENSTUDIO_MAX_HISTORY")?;
        if let Some(cap) = parse_var::<usize>(&lookup, "GENSTUDIO_FINISHED_TASK_RETENTION")? {
            config.finished_task_retention = cap;
        }
        config.session_idle_ttl =
            parse_var::<u64>(&lookup, "GENSTUDIO_SESSION_IDLE_TTL_SECS")?.map(Duration::from_secs);
        config.validate()?;
        Ok(config)
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn max_concurrent_dispatches(mut self, limit: usize) -> Self {
        self.max_concurrent_dispatches = limit;
        self
    }

    pub fn max_history(mut self, cap: usize) -> Self {
        self.max_history = Some(cap);
        self
    }

    pub fn finished_task_retention(mut self, cap: usize) -> Self {
        self.finished_task_retention = cap;
        self
    }

    pub fn session_idle_ttl(mut self, ttl: Duration) -> Self {
        self.session_idle_ttl = Some(ttl);
        self
    }

    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.default_timeout.is_zero() {
            return Err(TrackerError::Config(
                "default_timeout must be greater than 0".into(),
            ));
        }
        if self.max_concurrent_dispatches == 0 {
            return Err(TrackerError::Config(
                "max_concurrent_dispatches must be greater than 0".into(),
            ));
        }
        if self.finished_task_retention == 0 {
            return Err(TrackerError::Config(
                "finished_task_retention must be greater than 0".into(),
            ));
        }
        if self.max_history == Some(0) {
            return Err(TrackerError::Config(
                "max_history must be greater than 0 when set".into(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, TrackerError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<T>()
        .map(Some)
        .map_err(|_| TrackerError::Config(format!("{key} must be a non-negative integer, got {raw:?}")))
}
