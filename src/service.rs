use crate::aggregate::{aggregate_spend, RawSpend};
use crate::analytics::{ensure_billing_table, AnalyticsStore};
use crate::clock::{
    applicable_months, day_start, first_of_month, month_key, months_between, shift_months,
    TimeSource,
};
use crate::config::{AppConfig, MAX_MONTHS};
use crate::error::AppError;
use crate::fallback::{seed_insufficient_accounts, HistoryState};
use crate::forecast::{
    current_month_projected_savings, next_month_forecast, ProjectionInput, MIN_HISTORY_DAYS,
    SETTLEMENT_LAG_DAYS,
};
use crate::merge::merge_configuration;
use crate::models::{
    BillingAccount, CurrentMonthSummary, FlexsaveSpendData, Forecast, MonthSummary,
    PersistedConfiguration, SavingsSummary, SpendResult, TimeParams,
};
use crate::netting::{net_spend, savings_rate};
use crate::providers::{RecommendationProvider, RecommendationRequest};
use crate::query::{
    build_on_demand_query, build_recurring_fee_query, build_savings_query, BillingTable,
    QueryWindow,
};
use crate::storage::{BillingAccountSource, ConfigurationStore};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSettings {
    pub forecast_window_days: i64,
    pub recommendation: RecommendationRequest,
}

impl ServiceSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            forecast_window_days: cfg.forecast_window_days,
            recommendation: RecommendationRequest::from_settings(&cfg.recommendation),
        }
    }
}

/// Months to report, current month included. Never reaches back past the
/// month the customer was enabled in when more than two are requested.
pub fn effective_months(
    requested: u32,
    time_enabled: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<u32, AppError> {
    let Some(enabled) = time_enabled else {
        return Ok(requested);
    };
    if requested <= 2 {
        return Ok(requested);
    }

    let back = i32::try_from(requested - 1)
        .map_err(|_| AppError::Config(format!("Cannot report {requested} months")))?;
    let earliest = shift_months(first_of_month(now.date_naive()), -back);
    if enabled <= day_start(earliest) {
        return Ok(requested);
    }
    let since_enabled = u32::try_from(months_between(enabled, now).max(0)).unwrap_or(0) + 1;
    Ok(since_enabled.min(requested))
}

fn newly_onboarded(accounts: &[BillingAccount], forecast_from: DateTime<Utc>) -> bool {
    accounts
        .iter()
        .all(|a| a.time_enabled.map_or(true, |t| t > forecast_from))
}

pub fn build_spend_summary(
    spend: &SpendResult,
    forecast: Forecast,
    time: &TimeParams,
) -> FlexsaveSpendData {
    let next_month = MonthSummary {
        on_demand_spend: forecast.on_demand,
        savings: forecast.savings,
        savings_rate: savings_rate(forecast.savings, forecast.on_demand + forecast.savings),
    };

    let projected_savings = current_month_projected_savings(
        &ProjectionInput {
            savings_so_far: spend.savings.month(&time.current_month),
            next_month_savings: next_month.savings,
            enabled: true,
            last_month_savings: 0.0,
            dedicated_payer: true,
        },
        time.now,
    );

    let months: BTreeMap<String, MonthSummary> = time
        .applicable_months
        .iter()
        .map(|month| {
            (
                month.clone(),
                MonthSummary {
                    on_demand_spend: spend.on_demand.month(month),
                    savings: spend.savings.month(month),
                    savings_rate: spend.savings_rate.get(month).copied().unwrap_or(0.0),
                },
            )
        })
        .collect();

    FlexsaveSpendData {
        spend: months,
        savings_summary: SavingsSummary {
            current_month: CurrentMonthSummary {
                month: time.current_month.clone(),
                projected_savings,
            },
            next_month,
        },
    }
}

pub struct SpendSummaryService {
    analytics: Arc<dyn AnalyticsStore>,
    recommendations: Arc<dyn RecommendationProvider>,
    configurations: Arc<dyn ConfigurationStore>,
    accounts: Arc<dyn BillingAccountSource>,
    clock: Arc<dyn TimeSource>,
    settings: ServiceSettings,
}

impl SpendSummaryService {
    pub fn new(
        analytics: Arc<dyn AnalyticsStore>,
        recommendations: Arc<dyn RecommendationProvider>,
        configurations: Arc<dyn ConfigurationStore>,
        accounts: Arc<dyn BillingAccountSource>,
        clock: Arc<dyn TimeSource>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            analytics,
            recommendations,
            configurations,
            accounts,
            clock,
            settings,
        }
    }

    pub fn time_params(&self, now: DateTime<Utc>, months: u32) -> TimeParams {
        TimeParams {
            now,
            current_month: month_key(now.date_naive()),
            applicable_months: applicable_months(now, months),
            forecast_from: now - Duration::days(self.settings.forecast_window_days),
        }
    }

    pub async fn active_customers(&self) -> Result<Vec<String>, AppError> {
        self.accounts.customers_with_active_accounts().await
    }

    pub async fn get_customer_spend(
        &self,
        customer_id: &str,
        account_ids: &[String],
        time: &TimeParams,
    ) -> Result<SpendResult, AppError> {
        let table = BillingTable::for_customer(customer_id)?;
        ensure_billing_table(self.analytics.as_ref(), &table).await?;

        let window = QueryWindow::new(
            customer_id,
            account_ids.to_vec(),
            time.applicable_months.len() as u32,
            time.now,
            self.settings.forecast_window_days,
        );
        tracing::debug!(
            "querying {} accounts of {} from {} until {}",
            window.account_ids.len(),
            window.customer_id,
            window.start(time.now),
            window.end(time.now)
        );
        let raw = aggregate_spend(
            self.analytics.clone(),
            build_on_demand_query(&table, &window, time.now)?,
            build_savings_query(&table, &window, time.now)?,
            build_recurring_fee_query(&table, &window, time.now)?,
            window.forecast_from,
        )
        .await;

        Ok(net_spend(&raw, time))
    }

    pub async fn forecast_accounts(
        &self,
        mut spend: SpendResult,
        account_ids: &[String],
        time: &TimeParams,
    ) -> Result<(SpendResult, Forecast), AppError> {
        let mut forecast = Forecast::default();
        let mut insufficient = Vec::new();

        for account in account_ids {
            match HistoryState::classify(&spend.on_demand, account) {
                HistoryState::Sufficient => {
                    if let Some(series) = spend.on_demand.daily.get(account) {
                        forecast.on_demand +=
                            next_month_forecast(series, time.now, SETTLEMENT_LAG_DAYS);
                    }
                    if let Some(series) = spend
                        .savings
                        .daily
                        .get(account)
                        .filter(|s| s.len() >= MIN_HISTORY_DAYS)
                    {
                        forecast.savings +=
                            next_month_forecast(series, time.now, SETTLEMENT_LAG_DAYS);
                    }
                }
                HistoryState::Insufficient => insufficient.push(account.clone()),
            }
        }

        if !insufficient.is_empty() {
            tracing::info!(
                "{} of {} accounts lack history; using recommendations",
                insufficient.len(),
                account_ids.len()
            );
        }
        seed_insufficient_accounts(
            self.recommendations.as_ref(),
            &self.settings.recommendation,
            &insufficient,
            &mut spend,
            &mut forecast,
            &time.current_month,
        )
        .await?;

        Ok((spend, forecast))
    }

    /// Recomputes and persists the customer's spend summary. Returns the
    /// stored document, or `None` when the customer has no active accounts.
    #[tracing::instrument(skip(self))]
    pub async fn update_customer_spend_summary(
        &self,
        customer_id: &str,
        months: u32,
    ) -> Result<Option<PersistedConfiguration>, AppError> {
        if !(1..=MAX_MONTHS).contains(&months) {
            return Err(AppError::Config(format!(
                "months must be between 1 and {MAX_MONTHS}, got {months}"
            )));
        }
        let accounts = self.accounts.active_accounts(customer_id).await?;
        if accounts.is_empty() {
            tracing::info!("no active billing accounts; nothing to update");
            return Ok(None);
        }

        let now = self.clock.now();
        let time_enabled = accounts.iter().filter_map(|a| a.time_enabled).max();
        let months = effective_months(months, time_enabled, now)?;
        let time = self.time_params(now, months);
        let account_ids: Vec<String> = accounts.iter().map(|a| a.account_id.clone()).collect();

        let spend = match self.get_customer_spend(customer_id, &account_ids, &time).await {
            Ok(spend) => spend,
            Err(e) if e.is_no_table() => {
                if newly_onboarded(&accounts, time.forecast_from) {
                    tracing::debug!("billing table not created yet for new accounts");
                } else {
                    tracing::warn!("billing table missing for established accounts: {}", e);
                }
                net_spend(&RawSpend::default(), &time)
            }
            Err(e) => return Err(e),
        };

        let (spend, forecast) = self.forecast_accounts(spend, &account_ids, &time).await?;
        let summary = build_spend_summary(&spend, forecast, &time);

        let existing = self.configurations.get(customer_id).await?;
        let merged = merge_configuration(existing, summary, time_enabled);
        self.configurations.update(customer_id, &merged).await?;

        tracing::info!(
            "updated spend summary over {} months; next month savings {:.2}",
            months,
            forecast.savings
        );
        Ok(Some(merged))
    }
}
