//! Multi-window rate limiting.
//!
//! Three rolling windows (second, minute, hour) run side by side. A request
//! is admitted only when its identity is under the threshold in all of them,
//! and only admitted requests are counted.

use dashmap::DashMap;
use dashmap::mapref::one::RefMut;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{LiveConfig, RateLimitConfig};
use crate::error::ServeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowKind {
    Second,
    Minute,
    Hour,
}

impl WindowKind {
    /// Evaluation order of the cascade.
    pub const ALL: [WindowKind; 3] = [WindowKind::Second, WindowKind::Minute, WindowKind::Hour];

    pub fn duration(self) -> Duration {
        match self {
            WindowKind::Second => Duration::from_secs(1),
            WindowKind::Minute => Duration::from_secs(60),
            WindowKind::Hour => Duration::from_secs(3600),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WindowKind::Second => "second",
            WindowKind::Minute => "minute",
            WindowKind::Hour => "hour",
        }
    }

    /// Threshold for this window; `0` means the window is disabled.
    pub fn threshold(self, limits: &RateLimitConfig) -> u32 {
        match self {
            WindowKind::Second => limits.per_second,
            WindowKind::Minute => limits.per_minute,
            WindowKind::Hour => limits.per_hour,
        }
    }
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rolling log of admitted requests per identity for one window.
#[derive(Debug)]
pub struct RateWindow {
    kind: WindowKind,
    hits: DashMap<String, Vec<Instant>>,
}

impl RateWindow {
    fn new(kind: WindowKind) -> Self {
        Self {
            kind,
            hits: DashMap::new(),
        }
    }

    pub fn kind(&self) -> WindowKind {
        self.kind
    }

    /// Lock this identity's log and drop expired hits.
    fn entry(&self, identity: &str, now: Instant) -> RefMut<'_, String, Vec<Instant>> {
        let window = self.kind.duration();
        let mut entry = self.hits.entry(identity.to_string()).or_default();
        entry.retain(|hit| now.saturating_duration_since(*hit) < window);
        entry
    }

    fn sweep(&self, now: Instant) {
        let window = self.kind.duration();
        self.hits.retain(|_, hits| {
            hits.retain(|hit| now.saturating_duration_since(*hit) < window);
            !hits.is_empty()
        });
    }
}

/// The second/minute/hour cascade.
///
/// Thresholds come from the live configuration on every call, so a reload
/// changes limits without resetting counters.
#[derive(Debug)]
pub struct RateLimiter {
    config: Arc<LiveConfig>,
    windows: [RateWindow; 3],
}

impl RateLimiter {
    pub fn new(config: Arc<LiveConfig>) -> Self {
        Self {
            config,
            windows: WindowKind::ALL.map(RateWindow::new),
        }
    }

    /// Admit or deny a request from `identity`.
    pub fn admit(&self, identity: &str) -> Result<(), ServeError> {
        self.admit_at(identity, Instant::now())
    }

    /// Admit or deny a request from `identity` at a given instant.
    ///
    /// Windows are checked in order and the first one at its threshold denies
    /// the request without touching the rest. Entries stay locked until the
    /// hit is recorded in all windows, always in the same order, so two
    /// concurrent requests cannot both take the last slot.
    pub fn admit_at(&self, identity: &str, now: Instant) -> Result<(), ServeError> {
        let limits = self.config.snapshot().rate_limit;

        let mut admitted = Vec::with_capacity(self.windows.len());
        for window in &self.windows {
            let threshold = window.kind.threshold(&limits);
            if threshold == 0 {
                continue;
            }
            let entry = window.entry(identity, now);
            if entry.len() >= threshold as usize {
                crate::debug_event!(
                    "limit",
                    "denied",
                    "{identity} over {threshold}/{}",
                    window.kind
                );
                return Err(ServeError::RateLimited {
                    window: window.kind,
                });
            }
            admitted.push(entry);
        }

        for mut entry in admitted {
            entry.push(now);
        }
        Ok(())
    }

    /// Drop identities with no hits left in any window.
    pub fn sweep(&self) {
        self.sweep_at(Instant::now());
    }

    pub fn sweep_at(&self, now: Instant) {
        for window in &self.windows {
            window.sweep(now);
        }
    }

    /// Number of identities with live hits in the given window.
    pub fn tracked(&self, kind: WindowKind) -> usize {
        self.windows
            .iter()
            .find(|w| w.kind == kind)
            .map(|w| w.hits.len())
            .unwrap_or(0)
    }
}
