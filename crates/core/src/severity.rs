//! Threshold classification for ammonia concentration readings.
//!
//! Pure logic: the caller supplies the value and the thresholds that were
//! active when the reading was taken.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification of a single reading.
///
/// Variants are ordered from least to most severe so comparisons such as
/// `severity >= Severity::Warning` read naturally.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Below the warning threshold.
    #[default]
    Normal,
    /// At or above the warning threshold but below the alarm threshold.
    Warning,
    /// At or above the alarm threshold.
    Alarm,
}

impl Severity {
    /// Canonical lowercase name, as stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Normal => "normal",
            Severity::Warning => "warning",
            Severity::Alarm => "alarm",
        }
    }

    /// Whether this severity should raise an operator notification.
    pub fn is_elevated(self) -> bool {
        self != Severity::Normal
    }

    /// Dense index for per-severity bookkeeping arrays.
    pub(crate) fn index(self) -> usize {
        match self {
            Severity::Normal => 0,
            Severity::Warning => 1,
            Severity::Alarm => 2,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify `value` against the warning and alarm thresholds.
///
/// Comparisons are inclusive, so a value sitting exactly on a threshold is
/// given the higher severity.
pub fn classify(value: f64, warning_threshold: f64, alarm_threshold: f64) -> Severity {
    if value >= alarm_threshold {
        Severity::Alarm
    } else if value >= warning_threshold {
        Severity::Warning
    } else {
        Severity::Normal
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const WARNING: f64 = 25.0;
    const ALARM: f64 = 50.0;

    #[test]
    fn below_warning_is_normal() {
        for v in [-5.0, 0.0, 10.0, 24.99] {
            assert_eq!(classify(v, WARNING, ALARM), Severity::Normal, "value {v}");
        }
    }

    #[test]
    fn between_thresholds_is_warning() {
        for v in [25.0, 30.0, 49.99] {
            assert_eq!(classify(v, WARNING, ALARM), Severity::Warning, "value {v}");
        }
    }

    #[test]
    fn at_or_above_alarm_is_alarm() {
        for v in [50.0, 60.0, 1000.0] {
            assert_eq!(classify(v, WARNING, ALARM), Severity::Alarm, "value {v}");
        }
    }

    #[test]
    fn ties_resolve_to_higher_severity() {
        assert_eq!(classify(WARNING, WARNING, ALARM), Severity::Warning);
        assert_eq!(classify(ALARM, WARNING, ALARM), Severity::Alarm);
    }

    #[test]
    fn ordering_follows_severity() {
        assert!(Severity::Normal < Severity::Warning);
        assert!(Severity::Warning < Severity::Alarm);
        assert!(!Severity::Normal.is_elevated());
        assert!(Severity::Alarm.is_elevated());
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&Severity::Alarm).unwrap();
        assert_eq!(json, "\"alarm\"");
        assert_eq!(Severity::Warning.to_string(), "warning");
    }
}
