use crate::error::AppError;
use crate::forecast::MIN_HISTORY_DAYS;
use crate::models::{AggregateResult, Forecast, RecommendationSummary, SpendResult};
use crate::netting::savings_rate;
use crate::providers::{RecommendationProvider, RecommendationRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryState {
    Sufficient,
    Insufficient,
}

impl HistoryState {
    pub fn classify(on_demand: &AggregateResult, account_id: &str) -> Self {
        if on_demand.days_for(account_id) >= MIN_HISTORY_DAYS {
            HistoryState::Sufficient
        } else {
            HistoryState::Insufficient
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecommendedAmounts {
    pub current_on_demand_spend: f64,
    pub on_demand_with_commitment: f64,
    pub savings: f64,
}

impl RecommendedAmounts {
    pub fn parse(summary: &RecommendationSummary) -> Result<Self, AppError> {
        Ok(Self {
            current_on_demand_spend: parse_amount(
                "currentOnDemandSpend",
                &summary.current_on_demand_spend,
            )?,
            on_demand_with_commitment: parse_amount(
                "estimatedOnDemandCostWithCurrentCommitment",
                &summary.estimated_on_demand_cost_with_current_commitment,
            )?,
            savings: parse_amount("estimatedSavingsAmount", &summary.estimated_savings_amount)?,
        })
    }
}

fn parse_amount(field: &'static str, raw: &str) -> Result<f64, AppError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|source| AppError::ParseAmount { field, source })
}

pub fn seed_from_recommendation(
    spend: &mut SpendResult,
    forecast: &mut Forecast,
    amounts: RecommendedAmounts,
    current_month: &str,
) {
    *spend
        .on_demand
        .monthly
        .entry(current_month.to_string())
        .or_insert(0.0) += amounts.current_on_demand_spend;
    let saved = *spend
        .savings
        .monthly
        .entry(current_month.to_string())
        .or_insert(0.0);
    let on_demand = spend.on_demand.month(current_month);
    spend
        .savings_rate
        .insert(current_month.to_string(), savings_rate(saved, on_demand + saved));

    forecast.on_demand += amounts.on_demand_with_commitment - amounts.savings;
    forecast.savings += amounts.savings;
}

pub async fn seed_insufficient_accounts(
    provider: &dyn RecommendationProvider,
    request: &RecommendationRequest,
    accounts: &[String],
    spend: &mut SpendResult,
    forecast: &mut Forecast,
    current_month: &str,
) -> Result<(), AppError> {
    for account in accounts {
        let summary = provider.savings_plans_recommendation(account, request).await?;
        let amounts = RecommendedAmounts::parse(&summary)?;
        tracing::debug!(
            "seeding account {} from {} recommendation",
            account,
            provider.name()
        );
        seed_from_recommendation(spend, forecast, amounts, current_month);
    }
    Ok(())
}
