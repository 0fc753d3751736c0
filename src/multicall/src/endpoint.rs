use std::fmt;
use std::time::{Duration, Instant};

/// One upstream connection that may be used at most once per `min_interval`.
///
/// The last-use instant is recorded when the connection is handed out, not
/// when the call completes, so a slow call never shortens the next window.
#[derive(Debug, Clone)]
pub struct Endpoint<C> {
    connection: C,
    min_interval: Duration,
    last_used: Option<Instant>,
    label: Option<String>,
}

impl<C> Endpoint<C> {
    pub fn new(connection: C, min_interval: Duration) -> Self {
        Self {
            connection,
            min_interval,
            last_used: None,
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub(crate) fn set_default_label(&mut self, label: impl FnOnce() -> String) {
        if self.label.is_none() {
            self.label = Some(label());
        }
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn last_used(&self) -> Option<Instant> {
        self.last_used
    }

    /// Calls per second allowed by the interval.
    pub fn rate_per_second(&self) -> f64 {
        1.0 / self.min_interval.as_secs_f64()
    }

    /// Instant from which the endpoint may be used again.
    pub fn usable_at(&self) -> Option<Instant> {
        self.last_used.map(|last_used| last_used + self.min_interval)
    }

    /// `max(0, last_use + interval - now)`.
    pub fn time_until_usable(&self, now: Instant) -> Duration {
        self.usable_at()
            .map(|usable_at| usable_at.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_usable(&self, now: Instant) -> bool {
        self.time_until_usable(now).is_zero()
    }

    /// Records `now` as the last use.
    pub fn mark_used(&mut self, now: Instant) {
        self.last_used = Some(now);
    }
}

impl<C> fmt::Display for Endpoint<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:.2}/s",
            self.label.as_deref().unwrap_or("unlabelled"),
            self.rate_per_second()
        )
    }
}
