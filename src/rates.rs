use serde::Serialize;

/// Common denominator for cross-drug comparison.
pub const RATE_DENOMINATOR: f64 = 100_000.0;

/// Reports per 100k exposed, rounded half-up to one decimal.
///
/// Zero exposure yields a rate of zero.
pub fn compute_rate(report_count: u64, exposure_count: u64) -> f64 {
    if exposure_count == 0 {
        return 0.0;
    }
    let rate = report_count as f64 / exposure_count as f64 * RATE_DENOMINATOR;
    (rate * 10.0).round() / 10.0
}

/// Adverse-event reports against exposure for one drug.
///
/// The rate is a relative signal only and is always served next to both
/// raw counts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalItem {
    pub drug: String,
    pub report_count: u64,
    pub exposure_count: u64,
    pub rate_per_100k: f64,
}

impl SignalItem {
    pub fn new(drug: String, report_count: u64, exposure_count: u64) -> Self {
        Self {
            drug,
            report_count,
            exposure_count,
            rate_per_100k: compute_rate(report_count, exposure_count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_rate() {
        assert_eq!(compute_rate(250, 1_000_000), 25.0);
        assert_eq!(compute_rate(1, 0), 0.0);
        assert_eq!(compute_rate(0, 5000), 0.0);
        assert_eq!(compute_rate(1, 3), 33333.3);
    }

    #[test]
    fn test_compute_rate_one_decimal() {
        // 0.625
        assert_eq!(compute_rate(1, 160_000), 0.6);
        // 12.345
        assert_eq!(compute_rate(12_345, 100_000_000), 12.3);
    }

    #[test]
    fn test_signal_item_serializes_camel_case() {
        let item = SignalItem::new("WARFARIN".to_string(), 120, 400_000);
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["ratePer100k"], 30.0);
        assert_eq!(json["reportCount"], 120);
        assert_eq!(json["exposureCount"], 400_000);
    }
}
