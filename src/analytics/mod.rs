use crate::error::AppError;
use crate::models::DailyCostPoint;
use crate::query::{BillingTable, SpendQuery};
use async_trait::async_trait;

pub mod sqlite;

pub type RowIter = Box<dyn Iterator<Item = Result<DailyCostPoint, AppError>> + Send>;

#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    async fn table_exists(&self, table: &BillingTable) -> Result<bool, AppError>;

    async fn read(&self, query: &SpendQuery) -> Result<RowIter, AppError>;
}

/// Fails with [`AppError::NoTable`] when the customer has no billing table yet.
pub async fn ensure_billing_table(
    store: &dyn AnalyticsStore,
    table: &BillingTable,
) -> Result<(), AppError> {
    if store.table_exists(table).await? {
        return Ok(());
    }
    Err(AppError::NoTable {
        customer_id: table.customer_id.clone(),
    })
}
