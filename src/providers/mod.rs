use crate::config::RecommendationSettings;
use crate::error::AppError;
use crate::models::RecommendationSummary;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

pub mod cost_explorer;

pub fn http_client() -> Result<Client, AppError> {
    let client = Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()?;
    Ok(client)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RecommendationRequest {
    pub account_scope: String,
    pub term_in_years: String,
    pub payment_option: String,
    pub lookback_period_in_days: String,
    pub savings_plans_type: String,
}

impl Default for RecommendationRequest {
    fn default() -> Self {
        Self {
            account_scope: "PAYER".into(),
            term_in_years: "ONE_YEAR".into(),
            payment_option: "NO_UPFRONT".into(),
            lookback_period_in_days: "THIRTY_DAYS".into(),
            savings_plans_type: "COMPUTE_SP".into(),
        }
    }
}

impl RecommendationRequest {
    pub fn from_settings(settings: &RecommendationSettings) -> Self {
        Self {
            term_in_years: settings.term_in_years.clone(),
            payment_option: settings.payment_option.clone(),
            lookback_period_in_days: settings.lookback_period_in_days.clone(),
            savings_plans_type: settings.savings_plans_type.clone(),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait RecommendationProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn savings_plans_recommendation(
        &self,
        account_id: &str,
        request: &RecommendationRequest,
    ) -> Result<RecommendationSummary, AppError>;
}
