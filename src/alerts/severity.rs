//! Score to severity banding.

use crate::config::SeverityThresholdsConfig;
use crate::error::AlertError;
use crate::models::Severity;

/// Validated band lower bounds.
///
/// Bands are closed-open with the top band closed at 1.0; a score exactly on a bound falls in
/// the higher band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeverityThresholds {
    low: f64,
    medium: f64,
    high: f64,
    critical: f64,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            low: 0.5,
            medium: 0.7,
            high: 0.85,
            critical: 0.95,
        }
    }
}

impl TryFrom<&SeverityThresholdsConfig> for SeverityThresholds {
    type Error = crate::config::ConfigError;

    fn try_from(config: &SeverityThresholdsConfig) -> Result<Self, Self::Error> {
        config.validate()?;
        Ok(Self {
            low: config.low,
            medium: config.medium,
            high: config.high,
            critical: config.critical,
        })
    }
}

impl SeverityThresholds {
    /// Lowest score that materializes an alert.
    pub fn alert_floor(&self) -> f64 {
        self.low
    }

    /// Band for `score`, or `None` below the alert floor.
    pub fn classify(&self, score: f64) -> Result<Option<Severity>, AlertError> {
        validate_score(score)?;

        let severity = if score >= self.critical {
            Some(Severity::Critical)
        } else if score >= self.high {
            Some(Severity::High)
        } else if score >= self.medium {
            Some(Severity::Medium)
        } else if score >= self.low {
            Some(Severity::Low)
        } else {
            None
        };
        Ok(severity)
    }
}

/// Rejects NaN, infinities and anything outside [0, 1].
pub fn validate_score(score: f64) -> Result<(), AlertError> {
    if !score.is_finite() || !(0.0..=1.0).contains(&score) {
        return Err(AlertError::InvalidInput(format!(
            "score must be a finite number within [0, 1], got {}",
            score
        )));
    }
    Ok(())
}
