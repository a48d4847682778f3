use crate::clock::{day_start, days_in_current_month, days_in_next_month, first_day_of_next_month};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use std::collections::BTreeMap;

/// Accounts with fewer daily points than this cannot be forecast.
pub const MIN_HISTORY_DAYS: usize = 2;
pub const FORECAST_WINDOW_DAYS: usize = 30;
/// Most recent days whose billing data may still settle.
pub const SETTLEMENT_LAG_DAYS: i64 = 3;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Averages the series in order. Zeros seen before the first non-zero value
/// count as missing; once a non-zero value has been summed, zeros count as
/// real data.
pub fn average_with_valid_zero<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let mut total = 0.0;
    let mut counted = 0.0;
    let mut valid_zero = false;

    for value in values {
        if value == 0.0 && total != 0.0 {
            valid_zero = true;
        }
        if value != 0.0 || valid_zero {
            total += value;
            counted += 1.0;
        }
    }

    if counted == 0.0 {
        0.0
    } else {
        total / counted
    }
}

pub fn next_month_forecast(
    series: &BTreeMap<NaiveDate, f64>,
    now: DateTime<Utc>,
    settlement_lag_days: i64,
) -> f64 {
    if series.is_empty() {
        return 0.0;
    }

    let skip = series.len().saturating_sub(FORECAST_WINDOW_DAYS);
    let window: Vec<(&NaiveDate, &f64)> = series.iter().skip(skip).collect();

    let cutoff = now - Duration::days(settlement_lag_days);
    let settled: Vec<f64> = window
        .iter()
        .filter(|(date, _)| day_start(**date) < cutoff)
        .map(|(_, value)| **value)
        .collect();

    let average = if settled.is_empty() {
        average_with_valid_zero(window.iter().map(|(_, value)| **value))
    } else {
        average_with_valid_zero(settled)
    };

    average * days_in_next_month(now)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionInput {
    pub savings_so_far: f64,
    pub next_month_savings: f64,
    pub enabled: bool,
    pub last_month_savings: f64,
    pub dedicated_payer: bool,
}

impl ProjectionInput {
    fn settlement_lag_days(&self) -> f64 {
        if self.dedicated_payer {
            0.0
        } else {
            SETTLEMENT_LAG_DAYS as f64
        }
    }
}

pub fn current_month_projected_savings(input: &ProjectionInput, now: DateTime<Utc>) -> f64 {
    let nothing_yet = input.savings_so_far == 0.0;
    if (nothing_yet && input.next_month_savings == 0.0 && !input.dedicated_payer)
        || (nothing_yet && !input.enabled)
    {
        return 0.0;
    }
    if nothing_yet && input.next_month_savings == 0.0 {
        return input.last_month_savings;
    }

    let lag = input.settlement_lag_days();
    let days_in_month = days_in_current_month(now);
    let next_month_start = day_start(first_day_of_next_month(now));
    let seconds_left = (next_month_start - now).num_seconds() as f64;
    let days_until_end = (seconds_left / SECONDS_PER_DAY + lag).min(days_in_month);

    let mut days_with_valid_data = f64::from(now.day()) - lag;

    // expected-zero window
    if nothing_yet && days_with_valid_data > 0.0 {
        return 0.0;
    }

    let mut basis = input.savings_so_far;
    if nothing_yet || days_with_valid_data < 1.0 {
        basis = input.next_month_savings;
        days_with_valid_data = days_in_next_month(now);
    }

    input.savings_so_far + basis / days_with_valid_data * days_until_end
}
