use crate::error::AppError;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const SERVICE_NAME: &str = "spend-forecast";
pub const HOME_ENV: &str = "SPEND_FORECAST_HOME";
const ENV_PREFIX: &str = "SPEND_FORECAST";
pub const MAX_MONTHS: u32 = 120;

fn app_home_dir() -> Result<PathBuf, AppError> {
    if let Ok(custom) = std::env::var(HOME_ENV) {
        return Ok(PathBuf::from(custom));
    }

    if let Some(dirs) = ProjectDirs::from("com", "flexsave", SERVICE_NAME) {
        let candidate = dirs.data_local_dir().to_path_buf();
        if fs::create_dir_all(&candidate).is_ok() {
            return Ok(candidate);
        }
    }

    let cwd = std::env::current_dir()?;
    Ok(cwd.join(".spend-forecast"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Months reported per run, current month included.
    pub default_months: u32,
    pub forecast_window_days: i64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub max_concurrent_customers: usize,
    pub analytics_db: Option<PathBuf>,
    pub recommendation: RecommendationSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationSettings {
    pub base_url: Option<String>,
    pub term_in_years: String,
    pub payment_option: String,
    pub lookback_period_in_days: String,
    pub savings_plans_type: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_months: 6,
            forecast_window_days: 31,
            retry_attempts: 5,
            retry_delay_ms: 3000,
            max_concurrent_customers: 4,
            analytics_db: None,
            recommendation: RecommendationSettings::default(),
        }
    }
}

impl Default for RecommendationSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            term_in_years: "ONE_YEAR".into(),
            payment_option: "NO_UPFRONT".into(),
            lookback_period_in_days: "THIRTY_DAYS".into(),
            savings_plans_type: "COMPUTE_SP".into(),
        }
    }
}

pub fn config_dir() -> Result<PathBuf, AppError> {
    Ok(app_home_dir()?.join("config"))
}

pub fn data_dir() -> Result<PathBuf, AppError> {
    Ok(app_home_dir()?.join("data"))
}

pub fn config_path() -> Result<PathBuf, AppError> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn db_path() -> Result<PathBuf, AppError> {
    Ok(data_dir()?.join("state.sqlite"))
}

pub fn analytics_db_path(config: &AppConfig) -> Result<PathBuf, AppError> {
    match &config.analytics_db {
        Some(path) => Ok(path.clone()),
        None => Ok(data_dir()?.join("analytics.sqlite")),
    }
}

pub fn ensure_dirs() -> Result<(), AppError> {
    fs::create_dir_all(config_dir()?)?;
    fs::create_dir_all(data_dir()?)?;
    Ok(())
}

fn normalize_config(config: &mut AppConfig) -> bool {
    let mut changed = false;

    if config.default_months == 0 {
        config.default_months = 1;
        changed = true;
    }
    if config.default_months > MAX_MONTHS {
        config.default_months = MAX_MONTHS;
        changed = true;
    }
    if config.forecast_window_days < 1 {
        config.forecast_window_days = 31;
        changed = true;
    }
    if config.retry_attempts == 0 {
        config.retry_attempts = 1;
        changed = true;
    }
    if config.max_concurrent_customers == 0 {
        config.max_concurrent_customers = 1;
        changed = true;
    }
    if let Some(base) = &config.recommendation.base_url {
        let trimmed = base.trim();
        if trimmed.is_empty() {
            config.recommendation.base_url = None;
            changed = true;
        } else if trimmed != base {
            config.recommendation.base_url = Some(trimmed.to_string());
            changed = true;
        }
    }

    changed
}

/// File layer first, then `<PREFIX>__*` environment overrides, e.g.
/// `SPEND_FORECAST__RECOMMENDATION__BASE_URL`.
fn load_layered(path: &Path, env_prefix: &str) -> Result<AppConfig, AppError> {
    let settings = ::config::Config::builder()
        .add_source(::config::File::from(path).required(false))
        .add_source(
            ::config::Environment::with_prefix(env_prefix)
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    let mut parsed: AppConfig = settings.try_deserialize()?;
    if normalize_config(&mut parsed) {
        tracing::warn!("config at {} had invalid values; using clamped settings", path.display());
    }
    Ok(parsed)
}

pub fn load_config() -> Result<AppConfig, AppError> {
    load_layered(&config_path()?, ENV_PREFIX)
}

pub fn save_config(config: &AppConfig) -> Result<(), AppError> {
    ensure_dirs()?;
    let path = config_path()?;
    let raw = toml::to_string_pretty(config)?;
    fs::write(path, raw)?;
    Ok(())
}

pub fn ensure_initialized() -> Result<(), AppError> {
    ensure_dirs()?;
    let cfg_path = config_path()?;
    if !Path::new(&cfg_path).exists() {
        save_config(&AppConfig::default())?;
    }
    Ok(())
}
