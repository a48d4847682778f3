use crate::clock::{first_of_month, shift_months};
use crate::error::AppError;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

const ON_DEMAND_FILTER: &str = "(cost_type = 'FlexsaveCoveredUsage'
        OR (line_item_type = 'Usage' AND (
            (product_code = 'AmazonEC2' AND operation LIKE 'RunInstances%')
            OR product_code = 'AWSLambda'
            OR (product_code = 'AmazonECS' AND operation LIKE 'FargateTask%'))))";
const SAVINGS_FILTER: &str = "cost_type = 'FlexsaveCharges'";
const RECURRING_FEE_FILTER: &str = "cost_type = 'FlexsaveRecurringFee'";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpendStream {
    OnDemand,
    Savings,
    RecurringFee,
}

impl SpendStream {
    pub fn as_label(self) -> &'static str {
        match self {
            SpendStream::OnDemand => "on-demand",
            SpendStream::Savings => "savings",
            SpendStream::RecurringFee => "recurring-fee",
        }
    }

    fn filter(self) -> &'static str {
        match self {
            SpendStream::OnDemand => ON_DEMAND_FILTER,
            SpendStream::Savings => SAVINGS_FILTER,
            SpendStream::RecurringFee => RECURRING_FEE_FILTER,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingTable {
    pub customer_id: String,
    pub name: String,
}

impl BillingTable {
    pub fn for_customer(customer_id: &str) -> Result<Self, AppError> {
        let valid = !customer_id.is_empty()
            && customer_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(AppError::Config(format!(
                "Customer id '{customer_id}' cannot be used as a billing table name."
            )));
        }
        Ok(Self {
            customer_id: customer_id.to_string(),
            name: format!("flexsave_billing_{customer_id}"),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryWindow {
    pub customer_id: String,
    pub account_ids: Vec<String>,
    pub months_back: u32,
    /// Rows on or before this instant only feed the monthly totals.
    pub forecast_from: DateTime<Utc>,
}

impl QueryWindow {
    pub fn new(
        customer_id: &str,
        account_ids: Vec<String>,
        months_back: u32,
        now: DateTime<Utc>,
        forecast_window_days: i64,
    ) -> Self {
        Self {
            customer_id: customer_id.to_string(),
            account_ids,
            months_back,
            forecast_from: now - Duration::days(forecast_window_days),
        }
    }

    pub fn start(&self, now: DateTime<Utc>) -> NaiveDate {
        let back = i32::try_from(self.months_back).unwrap_or(i32::MAX);
        shift_months(first_of_month(now.date_naive()), -back)
    }

    pub fn end(&self, now: DateTime<Utc>) -> NaiveDate {
        end_date(first_of_month(now.date_naive()), now)
    }
}

pub fn end_date(month_start: NaiveDate, now: DateTime<Utc>) -> NaiveDate {
    let today = now.date_naive();
    if today.year() == month_start.year() && today.month() == month_start.month() {
        month_start + Duration::days(i64::from(today.day()))
    } else {
        shift_months(month_start, 1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpendQuery {
    pub stream: SpendStream,
    pub table: BillingTable,
    pub sql: String,
    pub params: Vec<(&'static str, String)>,
}

fn build_query(
    stream: SpendStream,
    table: &BillingTable,
    window: &QueryWindow,
    now: DateTime<Utc>,
) -> Result<SpendQuery, AppError> {
    let sql = format!(
        r#"SELECT payer_id, usage_date, SUM(cost) AS cost
        FROM "{table}"
        WHERE usage_date >= :start AND usage_date < :end
          AND payer_id IN (SELECT value FROM json_each(:accounts))
          AND {filter}
        GROUP BY payer_id, usage_date
        ORDER BY usage_date"#,
        table = table.name,
        filter = stream.filter(),
    );

    Ok(SpendQuery {
        stream,
        table: table.clone(),
        sql,
        params: vec![
            (":start", window.start(now).format(DATE_FORMAT).to_string()),
            (":end", window.end(now).format(DATE_FORMAT).to_string()),
            (":accounts", serde_json::to_string(&window.account_ids)?),
        ],
    })
}

pub fn build_on_demand_query(
    table: &BillingTable,
    window: &QueryWindow,
    now: DateTime<Utc>,
) -> Result<SpendQuery, AppError> {
    build_query(SpendStream::OnDemand, table, window, now)
}

pub fn build_savings_query(
    table: &BillingTable,
    window: &QueryWindow,
    now: DateTime<Utc>,
) -> Result<SpendQuery, AppError> {
    build_query(SpendStream::Savings, table, window, now)
}

pub fn build_recurring_fee_query(
    table: &BillingTable,
    window: &QueryWindow,
    now: DateTime<Utc>,
) -> Result<SpendQuery, AppError> {
    build_query(SpendStream::RecurringFee, table, window, now)
}
