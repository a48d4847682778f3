use crate::analytics::AnalyticsStore;
use crate::clock::{day_start, month_key};
use crate::error::AppError;
use crate::models::{AggregateResult, DailyCostPoint};
use crate::query::{SpendQuery, SpendStream};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;

const TASK_COUNT: usize = 3;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSpend {
    pub on_demand: AggregateResult,
    pub savings: AggregateResult,
    pub recurring_fee: AggregateResult,
}

#[derive(Debug)]
struct StreamFailure {
    stream: SpendStream,
    error: AppError,
}

pub fn bucket_rows<I>(rows: I, forecast_from: DateTime<Utc>) -> Result<AggregateResult, AppError>
where
    I: IntoIterator<Item = Result<DailyCostPoint, AppError>>,
{
    let mut result = AggregateResult::default();
    for row in rows {
        let row = row?;
        *result.monthly.entry(month_key(row.date)).or_insert(0.0) += row.cost;

        let daily = result.daily.entry(row.account_id).or_default();
        if day_start(row.date) > forecast_from {
            *daily.entry(row.date).or_insert(0.0) += row.cost;
        }
    }
    Ok(result)
}

async fn run_stream(
    store: &dyn AnalyticsStore,
    query: &SpendQuery,
    forecast_from: DateTime<Utc>,
) -> Result<AggregateResult, AppError> {
    let rows = store.read(query).await?;
    bucket_rows(rows, forecast_from)
}

fn spawn_stream(
    store: Arc<dyn AnalyticsStore>,
    query: SpendQuery,
    forecast_from: DateTime<Utc>,
    errors: mpsc::Sender<StreamFailure>,
) -> mpsc::Receiver<AggregateResult> {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        match run_stream(store.as_ref(), &query, forecast_from).await {
            Ok(result) => {
                tracing::debug!(
                    "{} stream aggregated {} months",
                    query.stream.as_label(),
                    result.monthly.len()
                );
                let _ = tx.send(result).await;
            }
            Err(error) => {
                let _ = errors
                    .send(StreamFailure {
                        stream: query.stream,
                        error,
                    })
                    .await;
            }
        }
    });
    rx
}

pub async fn aggregate_spend(
    store: Arc<dyn AnalyticsStore>,
    on_demand: SpendQuery,
    savings: SpendQuery,
    recurring_fee: SpendQuery,
    forecast_from: DateTime<Utc>,
) -> RawSpend {
    let (err_tx, mut err_rx) = mpsc::channel(TASK_COUNT);
    let mut on_demand_rx = spawn_stream(store.clone(), on_demand, forecast_from, err_tx.clone());
    let mut savings_rx = spawn_stream(store.clone(), savings, forecast_from, err_tx.clone());
    let mut fee_rx = spawn_stream(store, recurring_fee, forecast_from, err_tx);

    let mut raw = RawSpend::default();
    for _ in 0..TASK_COUNT {
        tokio::select! {
            Some(result) = on_demand_rx.recv() => raw.on_demand = result,
            Some(result) = savings_rx.recv() => raw.savings = result,
            Some(result) = fee_rx.recv() => raw.recurring_fee = result,
            Some(failure) = err_rx.recv() => {
                tracing::error!(
                    "{} query failed, continuing without it: {}",
                    failure.stream.as_label(),
                    failure.error
                );
            }
            else => {
                tracing::warn!("spend query tasks exited without reporting");
                break;
            }
        }
    }
    raw
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::RowIter;
    use crate::query::BillingTable;
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone};
    use std::collections::HashMap;
    use std::time::Duration;

    fn day(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, m, d).expect("date")
    }

    fn point(account: &str, date: NaiveDate, cost: f64) -> DailyCostPoint {
        DailyCostPoint {
            account_id: account.into(),
            date,
            cost,
        }
    }

    fn forecast_from() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 4, 4, 4, 10, 30)
            .single()
            .expect("valid fixed timestamp")
    }

    fn query(stream: SpendStream) -> SpendQuery {
        SpendQuery {
            stream,
            table: BillingTable::for_customer("cust").expect("table"),
            sql: String::new(),
            params: vec![],
        }
    }

    enum Scripted {
        Rows(Vec<DailyCostPoint>),
        RowError(Vec<DailyCostPoint>),
        Fail,
        Panic,
        Slow(Vec<DailyCostPoint>),
    }

    struct ScriptedStore {
        streams: HashMap<SpendStream, Scripted>,
    }

    #[async_trait]
    impl AnalyticsStore for ScriptedStore {
        async fn table_exists(&self, _table: &BillingTable) -> Result<bool, AppError> {
            Ok(true)
        }

        async fn read(&self, query: &SpendQuery) -> Result<RowIter, AppError> {
            match self.streams.get(&query.stream) {
                Some(Scripted::Rows(rows)) => Ok(Box::new(rows.clone().into_iter().map(Ok))),
                Some(Scripted::RowError(rows)) => {
                    let mut items: Vec<Result<DailyCostPoint, AppError>> =
                        rows.clone().into_iter().map(Ok).collect();
                    items.push(Err(AppError::Query("row decode failed".into())));
                    Ok(Box::new(items.into_iter()))
                }
                Some(Scripted::Slow(rows)) => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(Box::new(rows.clone().into_iter().map(Ok)))
                }
                Some(Scripted::Panic) => panic!("analytics backend crashed"),
                Some(Scripted::Fail) | None => Err(AppError::Query("backend unavailable".into())),
            }
        }
    }

    async fn run(streams: HashMap<SpendStream, Scripted>) -> RawSpend {
        let store: Arc<dyn AnalyticsStore> = Arc::new(ScriptedStore { streams });
        aggregate_spend(
            store,
            query(SpendStream::OnDemand),
            query(SpendStream::Savings),
            query(SpendStream::RecurringFee),
            forecast_from(),
        )
        .await
    }

    #[test]
    fn bucket_rows_limits_daily_index_to_forecast_window() {
        let rows = vec![
            Ok(point("a", day(3, 10), 10.0)),
            Ok(point("a", day(4, 4), 1.0)),
            Ok(point("a", day(4, 5), 2.0)),
            Ok(point("a", day(5, 1), 3.0)),
            Ok(point("b", day(5, 1), 4.0)),
        ];
        let result = bucket_rows(rows, forecast_from()).expect("bucket");

        assert_eq!(result.month("3_2022"), 10.0);
        assert_eq!(result.month("4_2022"), 3.0);
        assert_eq!(result.month("5_2022"), 7.0);
        let a = &result.daily["a"];
        assert_eq!(a.len(), 2);
        assert!(!a.contains_key(&day(4, 4)));
        assert_eq!(a[&day(4, 5)], 2.0);
        assert_eq!(result.daily["b"][&day(5, 1)], 4.0);
    }

    #[test]
    fn bucket_rows_stops_on_row_error() {
        let rows = vec![
            Ok(point("a", day(5, 1), 3.0)),
            Err(AppError::Query("bad row".into())),
        ];
        assert!(bucket_rows(rows, forecast_from()).is_err());
    }

    #[test_log::test(tokio::test)]
    async fn collects_all_three_streams() {
        let raw = run(HashMap::from([
            (SpendStream::OnDemand, Scripted::Slow(vec![point("a", day(5, 1), 10.0)])),
            (SpendStream::Savings, Scripted::Rows(vec![point("a", day(5, 1), -2.0)])),
            (SpendStream::RecurringFee, Scripted::Rows(vec![point("a", day(5, 1), 0.5)])),
        ]))
        .await;

        assert_eq!(raw.on_demand.month("5_2022"), 10.0);
        assert_eq!(raw.savings.month("5_2022"), -2.0);
        assert_eq!(raw.recurring_fee.month("5_2022"), 0.5);
    }

    #[test_log::test(tokio::test)]
    async fn failed_stream_is_left_empty() {
        let raw = run(HashMap::from([
            (SpendStream::OnDemand, Scripted::Rows(vec![point("a", day(5, 1), 10.0)])),
            (SpendStream::Savings, Scripted::Fail),
            (SpendStream::RecurringFee, Scripted::RowError(vec![point("a", day(5, 1), 0.5)])),
        ]))
        .await;

        assert_eq!(raw.on_demand.month("5_2022"), 10.0);
        assert_eq!(raw.savings, AggregateResult::default());
        assert_eq!(raw.recurring_fee, AggregateResult::default());
    }

    #[test_log::test(tokio::test)]
    async fn panicking_stream_is_left_empty() {
        let raw = tokio::time::timeout(
            Duration::from_secs(5),
            run(HashMap::from([
                (SpendStream::OnDemand, Scripted::Rows(vec![point("a", day(5, 1), 1.0)])),
                (SpendStream::Savings, Scripted::Panic),
                (SpendStream::RecurringFee, Scripted::Slow(vec![point("a", day(5, 1), 1.0)])),
            ])),
        )
        .await
        .expect("aggregation finishes despite the panic");

        assert_eq!(raw.on_demand.month("5_2022"), 1.0);
        assert_eq!(raw.savings, AggregateResult::default());
        assert_eq!(raw.recurring_fee.month("5_2022"), 1.0);
    }

    #[tokio::test]
    async fn all_streams_failing_yields_empty_spend() {
        let raw = run(HashMap::new()).await;
        assert_eq!(raw, RawSpend::default());
    }
}
