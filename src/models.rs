use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyCostPoint {
    pub account_id: String,
    pub date: NaiveDate,
    pub cost: f64,
}

pub type DailyIndex = BTreeMap<String, BTreeMap<NaiveDate, f64>>;
pub type MonthlyTotals = BTreeMap<String, f64>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    /// Per account, per day. Only holds days inside the forecast window.
    pub daily: DailyIndex,
    pub monthly: MonthlyTotals,
}

impl AggregateResult {
    pub fn month(&self, key: &str) -> f64 {
        self.monthly.get(key).copied().unwrap_or(0.0)
    }

    pub fn days_for(&self, account_id: &str) -> usize {
        self.daily.get(account_id).map_or(0, BTreeMap::len)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpendResult {
    pub on_demand: AggregateResult,
    pub savings: AggregateResult,
    pub savings_rate: MonthlyTotals,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Forecast {
    pub savings: f64,
    pub on_demand: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthSummary {
    pub on_demand_spend: f64,
    pub savings: f64,
    pub savings_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentMonthSummary {
    pub month: String,
    pub projected_savings: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavingsSummary {
    pub current_month: CurrentMonthSummary,
    pub next_month: MonthSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlexsaveSpendData {
    pub spend: BTreeMap<String, MonthSummary>,
    pub savings_summary: SavingsSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedConfiguration {
    pub enabled: bool,
    #[serde(default)]
    pub time_enabled: Option<DateTime<Utc>>,
    #[serde(default)]
    pub savings_history: BTreeMap<String, MonthSummary>,
    #[serde(default)]
    pub savings_summary: Option<SavingsSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Pending,
    Disabled,
}

impl AccountStatus {
    pub fn as_label(self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Pending => "pending",
            AccountStatus::Disabled => "disabled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" => Some(AccountStatus::Active),
            "pending" => Some(AccountStatus::Pending),
            "disabled" => Some(AccountStatus::Disabled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingAccount {
    pub customer_id: String,
    pub account_id: String,
    pub status: AccountStatus,
    pub time_enabled: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationSummary {
    pub current_on_demand_spend: String,
    pub estimated_on_demand_cost_with_current_commitment: String,
    pub estimated_savings_amount: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeParams {
    pub now: DateTime<Utc>,
    pub current_month: String,
    pub applicable_months: Vec<String>,
    pub forecast_from: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persisted_configuration_uses_camel_case_keys() {
        let cfg = PersistedConfiguration {
            enabled: true,
            time_enabled: None,
            savings_history: BTreeMap::from([(
                "5_2022".to_string(),
                MonthSummary {
                    on_demand_spend: 10.0,
                    savings: 2.0,
                    savings_rate: 20.0,
                },
            )]),
            savings_summary: Some(SavingsSummary::default()),
        };

        let value = serde_json::to_value(&cfg).expect("serialize");
        assert_eq!(value["savingsHistory"]["5_2022"]["onDemandSpend"], 10.0);
        assert_eq!(value["savingsHistory"]["5_2022"]["savingsRate"], 20.0);
        assert!(value["savingsSummary"]["currentMonth"]["projectedSavings"].is_number());
        assert!(value["timeEnabled"].is_null());
    }

    #[test]
    fn persisted_configuration_tolerates_missing_optional_fields() {
        let cfg: PersistedConfiguration =
            serde_json::from_str(r#"{"enabled": false}"#).expect("deserialize");
        assert!(!cfg.enabled);
        assert!(cfg.savings_history.is_empty());
        assert!(cfg.savings_summary.is_none());
    }

    #[test]
    fn account_status_parses_case_insensitively() {
        assert_eq!(AccountStatus::parse(" Active "), Some(AccountStatus::Active));
        assert_eq!(AccountStatus::parse("DISABLED"), Some(AccountStatus::Disabled));
        assert_eq!(AccountStatus::parse("gone"), None);
    }

    #[test]
    fn aggregate_lookups_default_to_zero() {
        let agg = AggregateResult::default();
        assert_eq!(agg.month("5_2022"), 0.0);
        assert_eq!(agg.days_for("123"), 0);
    }
}
