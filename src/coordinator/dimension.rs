use crate::window::WindowConfig;
use crate::{Error, Result};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// One of the ceilings that can be active on a resource at the same time.
///
/// Variants are ordered; locks taken per dimension are always acquired in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dimension {
    RequestsPerSecond,
    RequestsPerMinute,
    RequestsPerHour,
    TokensPerSecond,
    TokensPerMinute,
    /// A ceiling with a caller chosen window, applied to both requests and tokens.
    Custom,
}

impl Dimension {
    pub const ALL: [Dimension; 6] = [
        Dimension::RequestsPerSecond,
        Dimension::RequestsPerMinute,
        Dimension::RequestsPerHour,
        Dimension::TokensPerSecond,
        Dimension::TokensPerMinute,
        Dimension::Custom,
    ];

    /// Suffix of the tracked key, e.g. `rps` in `user:rps`.
    pub fn suffix(self) -> &'static str {
        match self {
            Self::RequestsPerSecond => "rps",
            Self::RequestsPerMinute => "rpm",
            Self::RequestsPerHour => "rph",
            Self::TokensPerSecond => "tps",
            Self::TokensPerMinute => "tpm",
            Self::Custom => "custom",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::RequestsPerSecond => "requests_per_second",
            Self::RequestsPerMinute => "requests_per_minute",
            Self::RequestsPerHour => "requests_per_hour",
            Self::TokensPerSecond => "tokens_per_second",
            Self::TokensPerMinute => "tokens_per_minute",
            Self::Custom => "custom",
        }
    }

    /// Fixed window length, [Dimension::Custom] has none.
    pub fn window_seconds(self) -> Option<f64> {
        match self {
            Self::RequestsPerSecond | Self::TokensPerSecond => Some(1.0),
            Self::RequestsPerMinute | Self::TokensPerMinute => Some(60.0),
            Self::RequestsPerHour => Some(3600.0),
            Self::Custom => None,
        }
    }

    /// The tracked key for this dimension of a resource.
    pub fn key(self, resource: &str) -> String {
        format!("{resource}:{}", self.suffix())
    }
}

impl Display for Dimension {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Requests,
    Tokens,
}

impl RequestKind {
    /// Dimensions consulted, and recorded into, for this kind of admission.
    pub fn dimensions(self) -> &'static [Dimension] {
        match self {
            Self::Requests => &[
                Dimension::RequestsPerSecond,
                Dimension::RequestsPerMinute,
                Dimension::RequestsPerHour,
                Dimension::Custom,
            ],
            Self::Tokens => &[
                Dimension::TokensPerSecond,
                Dimension::TokensPerMinute,
                Dimension::Custom,
            ],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requests => "requests",
            Self::Tokens => "tokens",
        }
    }
}

impl FromStr for RequestKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "requests" => Ok(Self::Requests),
            "tokens" => Ok(Self::Tokens),
            other => Err(Error::InvalidKind(other.to_owned())),
        }
    }
}

impl Display for RequestKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The ceilings requested for a resource.
///
/// # Examples
///
/// ```
/// # use sliding_admission::Ceilings;
/// let ceilings = Ceilings::new()
///     .requests_per_second(5)
///     .requests_per_minute(10);
/// assert!(!ceilings.is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ceilings {
    pub requests_per_second: Option<u64>,
    pub requests_per_minute: Option<u64>,
    pub requests_per_hour: Option<u64>,
    pub tokens_per_second: Option<u64>,
    pub tokens_per_minute: Option<u64>,
    pub custom: Option<WindowConfig>,
}

impl Ceilings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests_per_second(mut self, max: u64) -> Self {
        self.requests_per_second = Some(max);
        self
    }

    pub fn requests_per_minute(mut self, max: u64) -> Self {
        self.requests_per_minute = Some(max);
        self
    }

    pub fn requests_per_hour(mut self, max: u64) -> Self {
        self.requests_per_hour = Some(max);
        self
    }

    pub fn tokens_per_second(mut self, max: u64) -> Self {
        self.tokens_per_second = Some(max);
        self
    }

    pub fn tokens_per_minute(mut self, max: u64) -> Self {
        self.tokens_per_minute = Some(max);
        self
    }

    pub fn custom(mut self, limit: WindowConfig) -> Self {
        self.custom = Some(limit);
        self
    }

    pub fn is_empty(&self) -> bool {
        Dimension::ALL.iter().all(|d| !self.contains(*d))
    }

    pub fn contains(&self, dimension: Dimension) -> bool {
        self.max_for(dimension).is_some()
    }

    fn max_for(&self, dimension: Dimension) -> Option<u64> {
        match dimension {
            Dimension::RequestsPerSecond => self.requests_per_second,
            Dimension::RequestsPerMinute => self.requests_per_minute,
            Dimension::RequestsPerHour => self.requests_per_hour,
            Dimension::TokensPerSecond => self.tokens_per_second,
            Dimension::TokensPerMinute => self.tokens_per_minute,
            Dimension::Custom => self.custom.map(|c| c.max_admissions()),
        }
    }

    /// The window config for every requested dimension, in dimension order.
    ///
    /// Fails if nothing was requested or a ceiling is zero.
    pub fn windows(&self) -> Result<Vec<(Dimension, WindowConfig)>> {
        if self.is_empty() {
            return Err(Error::NoCeilings);
        }
        let mut windows = Vec::new();
        for dimension in Dimension::ALL {
            let config = match dimension.window_seconds() {
                None => self.custom,
                Some(window) => self
                    .max_for(dimension)
                    .map(|max| WindowConfig::new(max, window))
                    .transpose()?,
            };
            if let Some(config) = config {
                windows.push((dimension, config));
            }
        }
        Ok(windows)
    }
}
