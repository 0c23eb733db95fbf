//! Health classification and severity levels.

use serde::{Deserialize, Serialize};

/// Derived health classification of a monitored agent.
///
/// Ordered from best to worst, so `max` picks the more severe value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Green,
    Yellow,
    Red,
}

impl std::fmt::Display for Health {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Health::Green => write!(f, "green"),
            Health::Yellow => write!(f, "yellow"),
            Health::Red => write!(f, "red"),
        }
    }
}

/// Severity of something an agent reported or the monitor observed.
///
/// Uses the conventional log-level scale. Serialized by name; agents may
/// also send the numeric level (`40`), which maps through [`Severity::from_level`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "SeverityRepr")]
#[repr(u8)]
pub enum Severity {
    NotSet = 0,
    Debug = 10,
    Info = 20,
    Warning = 30,
    Error = 40,
    Critical = 50,
}

impl Severity {
    /// Level a freshly reset shadow starts from.
    pub const BASELINE: Severity = Severity::NotSet;

    /// Map a numeric log level onto the nearest severity at or below it.
    pub fn from_level(level: u8) -> Self {
        match level {
            50.. => Severity::Critical,
            40..=49 => Severity::Error,
            30..=39 => Severity::Warning,
            20..=29 => Severity::Info,
            10..=19 => Severity::Debug,
            _ => Severity::NotSet,
        }
    }

    /// Health implied by the highest severity seen so far.
    pub fn log_health(self) -> Health {
        if self >= Severity::Error {
            Health::Red
        } else {
            Health::Green
        }
    }
}

/// Wire forms accepted for a severity.
#[derive(Deserialize)]
#[serde(untagged)]
enum SeverityRepr {
    Level(u8),
    Name(String),
}

impl TryFrom<SeverityRepr> for Severity {
    type Error = String;

    fn try_from(repr: SeverityRepr) -> Result<Self, String> {
        match repr {
            SeverityRepr::Level(level) => Ok(Severity::from_level(level)),
            SeverityRepr::Name(name) => match name.to_ascii_lowercase().as_str() {
                "notset" | "not_set" => Ok(Severity::NotSet),
                "debug" => Ok(Severity::Debug),
                "info" => Ok(Severity::Info),
                "warning" | "warn" => Ok(Severity::Warning),
                "error" => Ok(Severity::Error),
                "critical" | "fatal" => Ok(Severity::Critical),
                _ => Err(format!("unknown severity '{name}'")),
            },
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::NotSet => write!(f, "notset"),
            Severity::Debug => write!(f, "debug"),
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// How much the fleet depends on an agent being up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Necessity {
    /// Missing or failing agent is an outage.
    #[default]
    Required,
    /// Agent is expected but not critical.
    Optional,
    /// Agent showed up without being configured.
    Spontaneous,
}

impl Necessity {
    /// Cap an overall health value according to necessity.
    ///
    /// Only required agents may raise the fleet to red.
    pub fn cap(self, health: Health) -> Health {
        match self {
            Necessity::Required => health,
            Necessity::Optional | Necessity::Spontaneous => health.min(Health::Yellow),
        }
    }
}
