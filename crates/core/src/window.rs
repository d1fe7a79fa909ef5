//! Half-open validity windows `[valid_from, valid_until)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Time window during which a fact or policy is in force.
///
/// Either bound may be open. The lower bound is inclusive, the upper bound is
/// exclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityWindow {
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
}

impl ValidityWindow {
    /// Window with no bounds (always valid).
    pub fn always() -> Self {
        Self::default()
    }

    pub fn starting(from: DateTime<Utc>) -> Self {
        Self {
            valid_from: Some(from),
            valid_until: None,
        }
    }

    pub fn between(from: DateTime<Utc>, until: DateTime<Utc>) -> DomainResult<Self> {
        let window = Self {
            valid_from: Some(from),
            valid_until: Some(until),
        };
        window.validate()?;
        Ok(window)
    }

    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        if let Some(from) = self.valid_from {
            if now < from {
                return false;
            }
        }
        if let Some(until) = self.valid_until {
            if now >= until {
                return false;
            }
        }
        true
    }

    pub fn validate(&self) -> DomainResult<()> {
        match (self.valid_from, self.valid_until) {
            (Some(from), Some(until)) if until <= from => Err(DomainError::validation(
                "validity window must end after it starts",
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn lower_bound_inclusive_upper_bound_exclusive() {
        let w = ValidityWindow::between(t0(), t0() + Duration::hours(1)).unwrap();
        assert!(!w.contains(t0() - Duration::seconds(1)));
        assert!(w.contains(t0()));
        assert!(w.contains(t0() + Duration::minutes(59)));
        assert!(!w.contains(t0() + Duration::hours(1)));
    }

    #[test]
    fn open_window_always_contains() {
        assert!(ValidityWindow::always().contains(t0()));
    }

    #[test]
    fn inverted_window_rejected() {
        assert!(ValidityWindow::between(t0(), t0()).is_err());
    }
}
