mod aggregate;
mod analytics;
mod clock;
mod config;
mod error;
mod fallback;
mod forecast;
mod merge;
mod models;
mod netting;
mod providers;
mod query;
mod service;
mod storage;

use analytics::sqlite::SqliteAnalytics;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use clock::{FixedClock, SystemClock, TimeSource};
use config::{
    analytics_db_path, db_path, ensure_initialized, load_config, AppConfig, MAX_MONTHS,
};
use error::AppError;
use models::{AccountStatus, BillingAccount, PersistedConfiguration};
use providers::cost_explorer::CostExplorerClient;
use providers::http_client;
use service::{ServiceSettings, SpendSummaryService};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use storage::{ConfigurationStore, Storage};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const MAX_RETRY_DELAY_MS: u64 = 60_000;

#[derive(Debug, Parser)]
#[command(name = "spend-forecast")]
#[command(about = "Spend and savings forecasts for savings-plan customers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Init,
    AddAccount {
        #[arg(long)]
        customer: String,
        #[arg(long)]
        account: String,
        #[arg(long, default_value = "active")]
        status: String,
        /// RFC 3339 timestamp; defaults to now for active accounts.
        #[arg(long)]
        enabled_at: Option<String>,
    },
    Run {
        #[arg(long)]
        customer: String,
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_MONTHS)))]
        months: Option<u32>,
        /// Recompute as of this RFC 3339 instant instead of now.
        #[arg(long)]
        as_of: Option<String>,
    },
    RunAll {
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_MONTHS)))]
        months: Option<u32>,
        #[arg(long)]
        as_of: Option<String>,
    },
    Show {
        #[arg(long)]
        customer: String,
        #[arg(long, default_value = "json")]
        format: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RetryPolicy {
    attempts: u32,
    delay_ms: u64,
}

impl RetryPolicy {
    fn from_config(cfg: &AppConfig) -> Self {
        Self {
            attempts: cfg.retry_attempts.max(1),
            delay_ms: cfg.retry_delay_ms,
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        Duration::from_millis(self.delay_ms.saturating_mul(factor).min(MAX_RETRY_DELAY_MS))
    }
}

async fn retry_with_backoff<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < policy.attempts => {
                let delay = policy.delay(attempt);
                tracing::warn!(
                    "attempt {} of {} failed: {}; retrying in {:?}",
                    attempt + 1,
                    policy.attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn parse_timestamp(flag: &str, raw: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| AppError::Config(format!("Invalid --{flag} '{raw}': {e}")))
}

fn clock_for(as_of: Option<String>) -> Result<Arc<dyn TimeSource>, AppError> {
    match as_of {
        Some(raw) => Ok(Arc::new(FixedClock(parse_timestamp("as-of", &raw)?))),
        None => Ok(Arc::new(SystemClock)),
    }
}

fn parse_status(raw: &str) -> Result<AccountStatus, AppError> {
    AccountStatus::parse(raw).ok_or_else(|| {
        AppError::Config("Unsupported status. Use active, pending, or disabled.".into())
    })
}

/// Orders `M_YYYY` keys chronologically.
fn month_sort_key(key: &str) -> (i32, u32) {
    let mut parts = key.splitn(2, '_');
    let month = parts.next().and_then(|m| m.parse().ok()).unwrap_or(0);
    let year = parts.next().and_then(|y| y.parse().ok()).unwrap_or(0);
    (year, month)
}

fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

fn render_csv(config: &PersistedConfiguration) -> String {
    let mut months: Vec<(&String, _)> = config.savings_history.iter().collect();
    months.sort_by_key(|(key, _)| month_sort_key(key));

    let mut out = String::from("month,on_demand_spend,savings,savings_rate\n");
    for (key, summary) in months {
        out.push_str(&format!(
            "{},{:.2},{:.2},{:.2}\n",
            csv_field(key),
            summary.on_demand_spend,
            summary.savings,
            summary.savings_rate
        ));
    }
    out
}

fn build_service(
    cfg: &AppConfig,
    storage: Arc<Storage>,
    clock: Arc<dyn TimeSource>,
) -> Result<SpendSummaryService, AppError> {
    let analytics = Arc::new(SqliteAnalytics::new(analytics_db_path(cfg)?));
    let recommendations = Arc::new(CostExplorerClient::new(http_client()?, &cfg.recommendation)?);
    Ok(SpendSummaryService::new(
        analytics,
        recommendations,
        storage.clone(),
        storage,
        clock,
        ServiceSettings::from_config(cfg),
    ))
}

async fn run_all(
    service: Arc<SpendSummaryService>,
    cfg: &AppConfig,
    months: u32,
) -> Result<(), AppError> {
    let customers = service.active_customers().await?;
    let total = customers.len();
    let semaphore = Arc::new(Semaphore::new(cfg.max_concurrent_customers.max(1)));
    let policy = RetryPolicy::from_config(cfg);
    let mut tasks = JoinSet::new();

    for customer in customers {
        let service = service.clone();
        let semaphore = semaphore.clone();
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let result = retry_with_backoff(policy, || {
                service.update_customer_spend_summary(&customer, months)
            })
            .await;
            (customer, result)
        });
    }

    let mut failed = 0;
    while let Some(joined) = tasks.join_next().await {
        let (customer, result) = joined?;
        match result {
            Ok(Some(_)) => println!("Updated spend summary for '{customer}'."),
            Ok(None) => println!("Skipped '{customer}': no active accounts."),
            Err(e) => {
                tracing::error!("spend summary update for {} failed: {}", customer, e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(AppError::Partial { failed, total });
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            ensure_initialized()?;
            Storage::open(&db_path()?)?;
            println!("Initialized spend-forecast config and data directories.");
        }
        Commands::AddAccount {
            customer,
            account,
            status,
            enabled_at,
        } => {
            ensure_initialized()?;
            let status = parse_status(&status)?;
            let time_enabled = match enabled_at {
                Some(raw) => Some(parse_timestamp("enabled-at", &raw)?),
                None if status == AccountStatus::Active => Some(Utc::now()),
                None => None,
            };
            let storage = Storage::open(&db_path()?)?;
            storage.upsert_account(&BillingAccount {
                customer_id: customer.clone(),
                account_id: account.clone(),
                status,
                time_enabled,
            })?;
            println!(
                "Account '{}' for customer '{}' is {}.",
                account,
                customer,
                status.as_label()
            );
        }
        Commands::Run {
            customer,
            months,
            as_of,
        } => {
            ensure_initialized()?;
            let cfg = load_config()?;
            let storage = Arc::new(Storage::open(&db_path()?)?);
            let service = build_service(&cfg, storage, clock_for(as_of)?)?;
            let months = months.unwrap_or(cfg.default_months);
            let policy = RetryPolicy::from_config(&cfg);
            let stored = retry_with_backoff(policy, || {
                service.update_customer_spend_summary(&customer, months)
            })
            .await?;
            match stored {
                Some(config) => println!(
                    "Updated spend summary for '{}' ({} months stored).",
                    customer,
                    config.savings_history.len()
                ),
                None => println!("Customer '{customer}' has no active accounts; nothing updated."),
            }
        }
        Commands::RunAll { months, as_of } => {
            ensure_initialized()?;
            let cfg = load_config()?;
            let storage = Arc::new(Storage::open(&db_path()?)?);
            let service = Arc::new(build_service(&cfg, storage, clock_for(as_of)?)?);
            let months = months.unwrap_or(cfg.default_months);
            run_all(service, &cfg, months).await?;
        }
        Commands::Show { customer, format } => {
            ensure_initialized()?;
            let storage = Storage::open(&db_path()?)?;
            let Some(config) = storage.get(&customer).await? else {
                return Err(AppError::Config(format!(
                    "No spend summary stored for customer '{customer}'."
                )));
            };
            if format.eq_ignore_ascii_case("json") {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else if format.eq_ignore_ascii_case("csv") {
                print!("{}", render_csv(&config));
            } else {
                return Err(AppError::Config(
                    "Unsupported show format. Use json or csv".into(),
                ));
            }
        }
    }

    Ok(())
}
