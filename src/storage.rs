use crate::error::AppError;
use crate::models::{AccountStatus, BillingAccount, PersistedConfiguration};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, types::Type, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

#[async_trait]
pub trait ConfigurationStore: Send + Sync {
    async fn get(&self, customer_id: &str) -> Result<Option<PersistedConfiguration>, AppError>;

    async fn update(
        &self,
        customer_id: &str,
        config: &PersistedConfiguration,
    ) -> Result<(), AppError>;
}

#[async_trait]
pub trait BillingAccountSource: Send + Sync {
    async fn active_accounts(&self, customer_id: &str) -> Result<Vec<BillingAccount>, AppError>;

    async fn customers_with_active_accounts(&self) -> Result<Vec<String>, AppError>;
}

#[derive(Clone)]
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    pub fn open(path: &Path) -> Result<Self, AppError> {
        let conn = Connection::open(path)?;
        let this = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        this.init()?;
        Ok(this)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, AppError> {
        self.conn.lock().map_err(|_| AppError::LockPoisoned)
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: FnOnce(&Storage) -> Result<T, AppError> + Send + 'static,
    {
        let storage = self.clone();
        tokio::task::spawn_blocking(move || op(&storage)).await?
    }

    fn init(&self) -> Result<(), AppError> {
        self.conn()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS billing_accounts (
                customer_id TEXT NOT NULL,
                account_id TEXT NOT NULL,
                status TEXT NOT NULL,
                time_enabled TEXT,
                PRIMARY KEY (customer_id, account_id)
            );

            CREATE TABLE IF NOT EXISTS spend_configurations (
                customer_id TEXT PRIMARY KEY,
                document TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    pub fn upsert_account(&self, account: &BillingAccount) -> Result<(), AppError> {
        self.conn()?.execute(
            "INSERT INTO billing_accounts (customer_id, account_id, status, time_enabled)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (customer_id, account_id)
             DO UPDATE SET status = excluded.status, time_enabled = excluded.time_enabled",
            params![
                account.customer_id,
                account.account_id,
                account.status.as_label(),
                account.time_enabled.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn accounts_for(&self, customer_id: &str) -> Result<Vec<BillingAccount>, AppError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT customer_id, account_id, status, time_enabled
             FROM billing_accounts WHERE customer_id = ? ORDER BY account_id",
        )?;
        let rows = stmt
            .query_map([customer_id], |r| {
                let raw_status: String = r.get(2)?;
                let status = AccountStatus::parse(&raw_status).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        2,
                        Type::Text,
                        format!("unknown account status '{raw_status}'").into(),
                    )
                })?;
                let time_enabled = r
                    .get::<_, Option<String>>(3)?
                    .map(|raw| {
                        DateTime::parse_from_rfc3339(&raw)
                            .map(|d| d.with_timezone(&Utc))
                            .map_err(|e| {
                                let source = Box::new(e);
                                rusqlite::Error::FromSqlConversionFailure(3, Type::Text, source)
                            })
                    })
                    .transpose()?;
                Ok(BillingAccount {
                    customer_id: r.get(0)?,
                    account_id: r.get(1)?,
                    status,
                    time_enabled,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn load_configuration(
        &self,
        customer_id: &str,
    ) -> Result<Option<PersistedConfiguration>, AppError> {
        let raw: Option<String> = self
            .conn()?
            .query_row(
                "SELECT document FROM spend_configurations WHERE customer_id = ?",
                [customer_id],
                |r| r.get(0),
            )
            .optional()?;
        match raw {
            Some(doc) => Ok(Some(serde_json::from_str(&doc)?)),
            None => Ok(None),
        }
    }

    pub fn save_configuration(
        &self,
        customer_id: &str,
        config: &PersistedConfiguration,
    ) -> Result<(), AppError> {
        let document = serde_json::to_string(config)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO spend_configurations (customer_id, document, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (customer_id)
             DO UPDATE SET document = excluded.document, updated_at = excluded.updated_at",
            params![customer_id, document, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn customer_ids(&self) -> Result<Vec<String>, AppError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT customer_id FROM billing_accounts
             WHERE status = ? ORDER BY customer_id",
        )?;
        let ids = stmt
            .query_map([AccountStatus::Active.as_label()], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }
}

#[async_trait]
impl ConfigurationStore for Storage {
    async fn get(&self, customer_id: &str) -> Result<Option<PersistedConfiguration>, AppError> {
        let customer_id = customer_id.to_string();
        self.blocking(move |s| s.load_configuration(&customer_id)).await
    }

    async fn update(
        &self,
        customer_id: &str,
        config: &PersistedConfiguration,
    ) -> Result<(), AppError> {
        let customer_id = customer_id.to_string();
        let config = config.clone();
        self.blocking(move |s| s.save_configuration(&customer_id, &config)).await
    }
}

#[async_trait]
impl BillingAccountSource for Storage {
    async fn active_accounts(&self, customer_id: &str) -> Result<Vec<BillingAccount>, AppError> {
        let customer_id = customer_id.to_string();
        let accounts = self.blocking(move |s| s.accounts_for(&customer_id)).await?;
        Ok(accounts
            .into_iter()
            .filter(|a| a.status == AccountStatus::Active)
            .collect())
    }

    async fn customers_with_active_accounts(&self) -> Result<Vec<String>, AppError> {
        self.blocking(|s| s.customer_ids()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MonthSummary, SavingsSummary};
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn fixed_ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 1, day, 0, 0, 0)
            .single()
            .expect("valid fixed timestamp")
    }

    fn account(customer: &str, id: &str, status: AccountStatus) -> BillingAccount {
        BillingAccount {
            customer_id: customer.into(),
            account_id: id.into(),
            status,
            time_enabled: Some(fixed_ts(4)),
        }
    }

    #[tokio::test]
    async fn only_active_accounts_are_listed() {
        let tmp = TempDir::new().expect("tempdir");
        let storage = Storage::open(&tmp.path().join("state.sqlite")).expect("open storage");
        storage
            .upsert_account(&account("cust", "111", AccountStatus::Active))
            .expect("upsert");
        storage
            .upsert_account(&account("cust", "222", AccountStatus::Pending))
            .expect("upsert");
        storage
            .upsert_account(&account("other", "333", AccountStatus::Disabled))
            .expect("upsert");

        let active = storage.active_accounts("cust").await.expect("active");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].account_id, "111");
        assert_eq!(active[0].time_enabled, Some(fixed_ts(4)));
        assert_eq!(
            storage.customers_with_active_accounts().await.expect("customers"),
            vec!["cust".to_string()]
        );
    }

    #[test]
    fn upsert_updates_status_in_place() {
        let tmp = TempDir::new().expect("tempdir");
        let storage = Storage::open(&tmp.path().join("state.sqlite")).expect("open storage");
        storage
            .upsert_account(&account("cust", "111", AccountStatus::Pending))
            .expect("upsert");
        let mut updated = account("cust", "111", AccountStatus::Active);
        updated.time_enabled = None;
        storage.upsert_account(&updated).expect("upsert");

        let accounts = storage.accounts_for("cust").expect("accounts");
        assert_eq!(accounts, vec![updated]);
    }

    #[tokio::test]
    async fn configuration_round_trips_and_missing_is_none() {
        let tmp = TempDir::new().expect("tempdir");
        let storage = Storage::open(&tmp.path().join("state.sqlite")).expect("open storage");
        assert!(storage.get("cust").await.expect("get").is_none());

        let config = PersistedConfiguration {
            enabled: true,
            time_enabled: Some(fixed_ts(4)),
            savings_history: BTreeMap::from([(
                "5_2022".to_string(),
                MonthSummary {
                    on_demand_spend: 8.0,
                    savings: 2.0,
                    savings_rate: 20.0,
                },
            )]),
            savings_summary: Some(SavingsSummary::default()),
        };
        storage.update("cust", &config).await.expect("update");
        storage.update("cust", &config).await.expect("second update");

        assert_eq!(storage.get("cust").await.expect("get"), Some(config));
        assert!(storage.get("other").await.expect("get").is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_writers_share_one_store() {
        let tmp = TempDir::new().expect("tempdir");
        let storage = Storage::open(&tmp.path().join("state.sqlite")).expect("open storage");

        let mut tasks = tokio::task::JoinSet::new();
        for n in 0..8 {
            let storage = storage.clone();
            tasks.spawn(async move {
                let customer = format!("cust-{n}");
                let config = PersistedConfiguration {
                    enabled: true,
                    ..PersistedConfiguration::default()
                };
                storage.update(&customer, &config).await?;
                storage.get(&customer).await
            });
        }

        let mut written = 0;
        while let Some(joined) = tasks.join_next().await {
            let stored = joined.expect("task").expect("round trip");
            assert!(stored.expect("document").enabled);
            written += 1;
        }
        assert_eq!(written, 8);
    }
}
