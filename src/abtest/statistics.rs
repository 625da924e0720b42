//! Significance testing for A/B variants.
//!
//! Chi-square over a 2 x k success/failure table, with the p-value bracketed
//! from a critical-value table rather than computed from the CDF.

use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Metric a test is decided on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WinnerCriteria {
    OpenRate,
    ClickRate,
    #[default]
    ConversionRate,
}

impl WinnerCriteria {
    pub fn as_str(self) -> &'static str {
        match self {
            WinnerCriteria::OpenRate => "open_rate",
            WinnerCriteria::ClickRate => "click_rate",
            WinnerCriteria::ConversionRate => "conversion_rate",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open_rate" => Some(WinnerCriteria::OpenRate),
            "click_rate" => Some(WinnerCriteria::ClickRate),
            "conversion_rate" => Some(WinnerCriteria::ConversionRate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VariantMetrics {
    pub sent: i64,
    pub opened: i64,
    pub clicked: i64,
    pub converted: i64,
}

impl VariantMetrics {
    /// `(trials, successes)` for the criterion: opens per send, clicks per
    /// open, conversions per click.
    pub fn trials(&self, criteria: WinnerCriteria) -> (i64, i64) {
        match criteria {
            WinnerCriteria::OpenRate => (self.sent, self.opened),
            WinnerCriteria::ClickRate => (self.opened, self.clicked),
            WinnerCriteria::ConversionRate => (self.clicked, self.converted),
        }
    }

    pub fn rate(&self, criteria: WinnerCriteria) -> f64 {
        let (trials, successes) = self.trials(criteria);
        ratio(successes, trials)
    }
}

pub fn ratio(successes: i64, trials: i64) -> f64 {
    if trials <= 0 {
        0.0
    } else {
        successes as f64 / trials as f64
    }
}

/// Critical values for df 1..=10 at p = 0.10, 0.05, 0.01, 0.001.
const CHI_SQUARE_CRITICAL: [[f64; 4]; 10] = [
    [2.706, 3.841, 6.635, 10.828],
    [4.605, 5.991, 9.210, 13.816],
    [6.251, 7.815, 11.345, 16.266],
    [7.779, 9.488, 13.277, 18.467],
    [9.236, 11.070, 15.086, 20.515],
    [10.645, 12.592, 16.812, 22.458],
    [12.017, 14.067, 18.475, 24.322],
    [13.362, 15.507, 20.090, 26.124],
    [14.684, 16.919, 21.666, 27.877],
    [15.987, 18.307, 23.209, 29.588],
];

/// Chi-square statistic over `(trials, successes)` pairs; `None` without data.
pub fn chi_square(observations: &[(i64, i64)]) -> Option<f64> {
    let total_trials: i64 = observations.iter().map(|(t, _)| *t).sum();
    let total_successes: i64 = observations.iter().map(|(_, s)| *s).sum();
    if observations.len() < 2 || total_trials <= 0 {
        return None;
    }

    let success_share = total_successes as f64 / total_trials as f64;
    let mut statistic = 0.0;
    for &(trials, successes) in observations {
        let failures = (trials - successes) as f64;
        let expected_success = trials as f64 * success_share;
        let expected_failure = trials as f64 - expected_success;
        if expected_success > 0.0 {
            statistic += (successes as f64 - expected_success).powi(2) / expected_success;
        }
        if expected_failure > 0.0 {
            statistic += (failures - expected_failure).powi(2) / expected_failure;
        }
    }
    Some(statistic)
}

/// Representative p-value for the bracket the statistic falls in.
pub fn p_value(statistic: f64, degrees_of_freedom: usize) -> f64 {
    let row = CHI_SQUARE_CRITICAL[degrees_of_freedom.clamp(1, 10) - 1];
    if statistic >= row[3] {
        0.001
    } else if statistic >= row[2] {
        0.005
    } else if statistic >= row[1] {
        0.025
    } else if statistic >= row[0] {
        0.075
    } else {
        0.15
    }
}

pub fn is_significant(p_value: f64, confidence_level: i32) -> bool {
    let alpha = (100 - confidence_level.clamp(50, 99)) as f64 / 100.0;
    p_value < alpha
}

/// z-score for a two-sided interval at the given confidence level.
pub fn z_score(confidence_level: i32) -> f64 {
    match confidence_level {
        ..=80 => 1.282,
        81..=85 => 1.440,
        86..=90 => 1.645,
        91..=95 => 1.960,
        _ => 2.576,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

/// Wilson score interval for a binomial proportion.
pub fn wilson_interval(successes: i64, trials: i64, confidence_level: i32) -> ConfidenceInterval {
    if trials <= 0 {
        return ConfidenceInterval {
            lower: 0.0,
            upper: 0.0,
        };
    }

    let n = trials as f64;
    let p = successes.clamp(0, trials) as f64 / n;
    let z = z_score(confidence_level);
    let z2 = z * z;
    let denominator = 1.0 + z2 / n;
    let center = (p + z2 / (2.0 * n)) / denominator;
    let margin = z * (p * (1.0 - p) / n + z2 / (4.0 * n * n)).sqrt() / denominator;

    ConfidenceInterval {
        lower: (center - margin).max(0.0),
        upper: (center + margin).min(1.0),
    }
}

/// Index of the best variant by observed rate; ties go to the earlier entry.
pub fn leader(metrics: &[VariantMetrics], criteria: WinnerCriteria) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (index, m) in metrics.iter().enumerate() {
        let rate = m.rate(criteria);
        match best {
            Some((_, best_rate)) if rate <= best_rate => {}
            _ => best = Some((index, rate)),
        }
    }
    best.map(|(index, _)| index)
}
