use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Backend processing phase, surfaced for display only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    #[default]
    Idle,
    Searching,
    Downloading,
    Parsing,
    Extracting,
    Normalizing,
    Aggregating,
    Completed,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Searching => "searching",
            Stage::Downloading => "downloading",
            Stage::Parsing => "parsing",
            Stage::Extracting => "extracting",
            Stage::Normalizing => "normalizing",
            Stage::Aggregating => "aggregating",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Latest known state of one task's execution.
///
/// Missing wire fields fall back to their defaults; an empty `task_id` is
/// filled in with the bound task id when the snapshot is accepted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressSnapshot {
    pub task_id: String,
    pub stage: Stage,
    /// Percentage in `0..=100` as reported by the server.
    pub progress: f64,
    pub message: String,
    #[serde(alias = "current_paper")]
    pub current_item: Option<String>,
    pub processed: u64,
    /// Zero when the server does not know the total yet.
    pub total: u64,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ProgressSnapshot {
    /// Progress clamped to `0..=100`.
    pub fn percent(&self) -> f64 {
        if self.progress.is_nan() {
            return 0.0;
        }
        self.progress.clamp(0.0, 100.0)
    }
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(parse_timestamp))
}

/// Parses a server timestamp.
///
/// Accepts RFC 3339, a naive ISO-8601 date-time (taken as UTC) or epoch
/// seconds. Anything else yields `None`.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            }),
        Value::Number(number) => number
            .as_f64()
            .and_then(|secs| DateTime::from_timestamp_millis((secs * 1000.0) as i64)),
        _ => None,
    }
}
