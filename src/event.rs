//! Structured events emitted by the engine.
//!
//! Events are handed to the [log] facade; formatting and shipping them is left to whichever
//! logger the application installs. Decisions and configuration changes are logged at the
//! [EVENT_TARGET] target, timings at [PERFORMANCE_TARGET].

use crate::window::WindowConfig;
use crate::Dimension;
use std::fmt::{Display, Formatter};
use std::time::Duration;

pub const EVENT_TARGET: &str = "sliding_admission::event";
pub const PERFORMANCE_TARGET: &str = "sliding_admission::performance";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EventKind {
    ConfigUpdated,
    RequestAllowed,
    RateLimited,
    TimedOperation,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConfigUpdated => "config_updated",
            Self::RequestAllowed => "request_allowed",
            Self::RateLimited => "rate_limited",
            Self::TimedOperation => "timed_operation",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Event<'a> {
    pub key: &'a str,
    pub kind: EventKind,
    pub backend: &'static str,
    pub wait: Option<f64>,
    pub count: Option<u64>,
    /// Dimension label inferred from the tracked key suffix, e.g. `requests_per_second`.
    pub dimension: Option<&'a str>,
    pub limit: Option<WindowConfig>,
    pub operation: Option<&'static str>,
    pub duration: Option<Duration>,
}

impl<'a> Event<'a> {
    pub fn new(kind: EventKind, key: &'a str, backend: &'static str) -> Self {
        Self {
            key,
            kind,
            backend,
            wait: None,
            count: None,
            dimension: None,
            limit: None,
            operation: None,
            duration: None,
        }
    }

    pub fn wait(mut self, wait: f64) -> Self {
        self.wait = Some(wait);
        self
    }

    pub fn count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    pub fn limit(mut self, limit: WindowConfig) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Attaches the dimension label derived from the key's suffix, if it has one.
    pub fn with_dimension(mut self) -> Self {
        self.dimension = dimension_label(self.key);
        self
    }

    pub fn timed(mut self, operation: &'static str, duration: Duration) -> Self {
        self.operation = Some(operation);
        self.duration = Some(duration);
        self
    }

    pub fn emit(&self) {
        match self.kind {
            EventKind::RequestAllowed => log::debug!(target: EVENT_TARGET, "{}", self),
            EventKind::ConfigUpdated | EventKind::RateLimited => {
                log::info!(target: EVENT_TARGET, "{}", self)
            }
            EventKind::TimedOperation => log::info!(target: PERFORMANCE_TARGET, "{}", self),
        }
    }
}

impl Display for Event<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "event={} key={} backend={}",
            self.kind.as_str(),
            self.key,
            self.backend
        )?;
        if let Some(wait) = self.wait {
            write!(f, " wait={wait:.3}")?;
        }
        if let Some(count) = self.count {
            write!(f, " count={count}")?;
        }
        if let Some(dimension) = self.dimension {
            write!(f, " dimension={dimension}")?;
        }
        if let Some(limit) = self.limit {
            write!(
                f,
                " max_admissions={} window_seconds={}",
                limit.max_admissions(),
                limit.window_seconds()
            )?;
        }
        if let (Some(operation), Some(duration)) = (self.operation, self.duration) {
            write!(f, " operation={operation} duration={:.4}", duration.as_secs_f64())?;
        }
        Ok(())
    }
}

/// Maps the suffix of a tracked key (the part after the last `:`) to a dimension label.
///
/// Unknown suffixes are returned as they are; keys without a `:` have no label.
pub fn dimension_label(key: &str) -> Option<&str> {
    let (_, suffix) = key.rsplit_once(':')?;
    let label = Dimension::ALL
        .iter()
        .find(|d| d.suffix() == suffix)
        .map_or(suffix, |d| d.label());
    Some(label)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_label() {
        assert_eq!(dimension_label("user:rps"), Some("requests_per_second"));
        assert_eq!(dimension_label("a:b:tpm"), Some("tokens_per_minute"));
        assert_eq!(dimension_label("user:custom"), Some("custom"));
        assert_eq!(dimension_label("user"), None);
    }

    #[test]
    fn test_display() {
        let limit = WindowConfig::new(5, 1.0).unwrap();
        let event = Event::new(EventKind::RateLimited, "user:rps", "memory")
            .wait(0.25)
            .count(5)
            .limit(limit)
            .with_dimension();
        assert_eq!(
            event.to_string(),
            "event=rate_limited key=user:rps backend=memory wait=0.250 count=5 \
             dimension=requests_per_second max_admissions=5 window_seconds=1"
        );
    }
}
