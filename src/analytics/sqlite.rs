use crate::analytics::{AnalyticsStore, RowIter};
use crate::error::AppError;
use crate::models::DailyCostPoint;
use crate::query::{BillingTable, SpendQuery, DATE_FORMAT};
use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::{types::Type, Connection, OpenFlags, ToSql};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct SqliteAnalytics {
    path: PathBuf,
}

impl SqliteAnalytics {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn connect(path: &Path) -> Result<Connection, AppError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(conn)
    }

    fn lookup_table(path: &Path, table: &BillingTable) -> Result<bool, AppError> {
        if !path.exists() {
            return Ok(false);
        }
        let conn = Self::connect(path)?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [&table.name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn read_rows(
        path: &Path,
        query: &SpendQuery,
    ) -> Result<Vec<Result<DailyCostPoint, AppError>>, AppError> {
        if !path.exists() {
            return Err(no_table(&query.table));
        }
        let conn = Self::connect(path)?;
        let mut stmt = conn
            .prepare(&query.sql)
            .map_err(|e| classify(e, &query.table))?;
        let params: Vec<(&str, &dyn ToSql)> = query
            .params
            .iter()
            .map(|(name, value)| (*name, value as &dyn ToSql))
            .collect();

        let rows = stmt
            .query_map(params.as_slice(), |row| {
                let raw_date: String = row.get(1)?;
                let date = NaiveDate::parse_from_str(&raw_date, DATE_FORMAT).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e))
                })?;
                Ok(DailyCostPoint {
                    account_id: row.get(0)?,
                    date,
                    cost: row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                })
            })
            .map_err(|e| classify(e, &query.table))?
            .map(|row| {
                row.map_err(|e| AppError::Query(format!("{} row: {e}", query.stream.as_label())))
            })
            .collect();

        Ok(rows)
    }
}

fn no_table(table: &BillingTable) -> AppError {
    AppError::NoTable {
        customer_id: table.customer_id.clone(),
    }
}

fn classify(err: rusqlite::Error, table: &BillingTable) -> AppError {
    match &err {
        rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.starts_with("no such table") => {
            no_table(table)
        }
        _ => AppError::Sql(err),
    }
}

#[async_trait]
impl AnalyticsStore for SqliteAnalytics {
    async fn table_exists(&self, table: &BillingTable) -> Result<bool, AppError> {
        let path = self.path.clone();
        let table = table.clone();
        tokio::task::spawn_blocking(move || Self::lookup_table(&path, &table)).await?
    }

    async fn read(&self, query: &SpendQuery) -> Result<RowIter, AppError> {
        let path = self.path.clone();
        let query = query.clone();
        let rows = tokio::task::spawn_blocking(move || Self::read_rows(&path, &query)).await??;
        Ok(Box::new(rows.into_iter()))
    }
}
