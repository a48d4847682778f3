use crate::aggregate::RawSpend;
use crate::models::{AggregateResult, MonthlyTotals, SpendResult, TimeParams};
use chrono::Datelike;

/// Percentage of the gross on-demand equivalent that was saved. Zero unless
/// both inputs are positive.
pub fn savings_rate(savings: f64, on_demand: f64) -> f64 {
    if savings > 0.0 && on_demand > 0.0 {
        savings / on_demand * 100.0
    } else {
        0.0
    }
}

pub fn calculate_savings(
    savings: &AggregateResult,
    recurring_fee: &AggregateResult,
    time: &TimeParams,
) -> AggregateResult {
    let today = time.now.date_naive();
    let mut net = AggregateResult {
        daily: savings.daily.clone(),
        monthly: savings
            .monthly
            .iter()
            .map(|(month, cost)| (month.clone(), cost.abs()))
            .collect(),
    };

    let mut current_month_fee = 0.0;
    for (account, days) in net.daily.iter_mut() {
        let fees = recurring_fee.daily.get(account);
        for (date, cost) in days.iter_mut() {
            let fee = fees.and_then(|f| f.get(date)).copied().unwrap_or(0.0);
            *cost = cost.abs() - fee;
            if date.year() == today.year() && date.month() == today.month() {
                current_month_fee += fee;
            }
        }
    }

    let current = savings.month(&time.current_month).abs() - current_month_fee;
    net.monthly.insert(time.current_month.clone(), current);

    for (month, fee) in &recurring_fee.monthly {
        if *month != time.current_month {
            net.monthly
                .insert(month.clone(), savings.month(month).abs() - fee);
        }
    }

    net
}

pub fn net_spend(raw: &RawSpend, time: &TimeParams) -> SpendResult {
    let savings = calculate_savings(&raw.savings, &raw.recurring_fee, time);
    let mut on_demand = raw.on_demand.clone();
    let mut rates = MonthlyTotals::new();

    for (month, cost) in on_demand.monthly.iter_mut() {
        let saved = savings.month(month);
        *cost -= saved;
        rates.insert(month.clone(), savings_rate(saved, *cost + saved));
    }

    SpendResult {
        on_demand,
        savings,
        savings_rate: rates,
    }
}
