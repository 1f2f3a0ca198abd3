//! Rate limit compliance reporting.

use serde::Serialize;

/// Observed outbound call rate against the configured ceiling.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct RateLimitStatus {
    /// Configured requests per second.
    pub configured_rate_limit: f64,
    /// Calls per second averaged over the last 60 seconds.
    pub actual_rate_60s: f64,
    pub is_compliant: bool,
    /// 100 when compliant, otherwise `configured / actual * 100`.
    pub compliance_percentage: f64,
}

impl RateLimitStatus {
    pub fn from_rates(configured_rate_limit: f64, actual_rate_60s: f64) -> Self {
        let is_compliant = actual_rate_60s <= configured_rate_limit;
        let compliance_percentage = if is_compliant || actual_rate_60s <= 0.0 {
            100.0
        } else {
            (configured_rate_limit / actual_rate_60s * 100.0).min(100.0)
        };

        Self {
            configured_rate_limit,
            actual_rate_60s,
            is_compliant,
            compliance_percentage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compliant_rate() {
        let status = RateLimitStatus::from_rates(2.0, 1.5);
        assert!(status.is_compliant);
        assert_eq!(status.compliance_percentage, 100.0);
    }

    #[test]
    fn test_idle_is_compliant() {
        let status = RateLimitStatus::from_rates(2.0, 0.0);
        assert!(status.is_compliant);
        assert_eq!(status.compliance_percentage, 100.0);
    }

    #[test]
    fn test_over_limit() {
        let status = RateLimitStatus::from_rates(2.0, 4.0);
        assert!(!status.is_compliant);
        assert_eq!(status.compliance_percentage, 50.0);
    }
}
