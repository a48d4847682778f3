use crate::config::RecommendationSettings;
use crate::error::AppError;
use crate::models::RecommendationSummary;
use crate::providers::{RecommendationProvider, RecommendationRequest};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use url::Url;

pub const TOKEN_ENV: &str = "SPEND_FORECAST_RECOMMENDATION_TOKEN";
const TARGET: &str = "AWSInsightsIndexService.GetSavingsPlansPurchaseRecommendation";

pub struct CostExplorerClient {
    client: Client,
    base_url: Option<Url>,
    token: Option<String>,
}

impl CostExplorerClient {
    pub fn new(client: Client, settings: &RecommendationSettings) -> Result<Self, AppError> {
        let base_url = settings
            .base_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .map_err(|e| AppError::Config(format!("Invalid recommendation base_url: {e}")))?;
        let token = std::env::var(TOKEN_ENV).ok().filter(|t| !t.trim().is_empty());
        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    fn endpoint(&self, account_id: &str) -> Result<Url, AppError> {
        let mut url = self.base_url.clone().ok_or_else(|| {
            AppError::Config(
                "Recommendation base_url is not configured; set recommendation.base_url.".into(),
            )
        })?;
        url.path_segments_mut()
            .map_err(|_| AppError::Config("Recommendation base_url cannot be a base.".into()))?
            .pop_if_empty()
            .extend(["accounts", account_id, "savings-plans-purchase-recommendation"]);
        Ok(url)
    }

    fn parse_summary(body: &Value) -> Result<RecommendationSummary, AppError> {
        let summary = body
            .get("SavingsPlansPurchaseRecommendation")
            .and_then(|r| r.get("SavingsPlansPurchaseRecommendationSummary"))
            .filter(|s| !s.is_null())
            .ok_or_else(|| {
                AppError::Recommendation("empty savings plans purchase recommendation".into())
            })?;

        let field = |name: &str| -> Result<String, AppError> {
            summary
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    AppError::Recommendation(format!("recommendation is missing {name}"))
                })
        };

        Ok(RecommendationSummary {
            current_on_demand_spend: field("CurrentOnDemandSpend")?,
            estimated_on_demand_cost_with_current_commitment: field(
                "EstimatedOnDemandCostWithCurrentCommitment",
            )?,
            estimated_savings_amount: field("EstimatedSavingsAmount")?,
        })
    }
}

#[async_trait]
impl RecommendationProvider for CostExplorerClient {
    fn name(&self) -> &'static str {
        "cost-explorer"
    }

    async fn savings_plans_recommendation(
        &self,
        account_id: &str,
        request: &RecommendationRequest,
    ) -> Result<RecommendationSummary, AppError> {
        let mut req = self
            .client
            .post(self.endpoint(account_id)?)
            .header("X-Amz-Target", TARGET)
            .json(request);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let response = req.send().await?;
        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(AppError::Recommendation(format!(
                "recommendation endpoint rejected credentials for account {account_id}"
            )));
        }
        let body: Value = response.error_for_status()?.json().await?;
        Self::parse_summary(&body)
    }
}
