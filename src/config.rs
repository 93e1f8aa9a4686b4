use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub scraper: ScraperConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Only urls with this prefix are accepted into the registry.
    pub marketplace_prefix: String,
    /// Concurrency ceiling K: sessions in flight per chunk.
    pub max_concurrent_pages: usize,
    /// Bounded wait for each required page field, seconds.
    pub field_wait_secs: u64,
    /// Navigation timeout, seconds.
    pub nav_timeout_secs: u64,
    /// Randomized pause between chunks, seconds.
    pub chunk_pause_min_secs: u64,
    pub chunk_pause_max_secs: u64,
    /// Chance of wiping the shared cookie jar after a full cycle.
    pub jar_clear_probability: f64,
    pub cookie_jar_path: String,
    /// Multiplier on all simulated-browsing delays. Tests run at 0.
    pub behavior_time_scale: f64,
    pub chrome_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Six-field cron expression (with seconds).
    pub cron: String,
    pub timezone: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            database: DatabaseConfig {
                url: "sqlite://data/argus.db".to_string(),
                max_connections: 5,
            },
            scraper: ScraperConfig {
                marketplace_prefix: "https://www.farpost.ru/".to_string(),
                max_concurrent_pages: 20,
                field_wait_secs: 60,
                nav_timeout_secs: 60,
                chunk_pause_min_secs: 20,
                chunk_pause_max_secs: 40,
                jar_clear_probability: 0.33,
                cookie_jar_path: "cookies.json".to_string(),
                behavior_time_scale: 1.0,
                chrome_path: None,
            },
            scheduler: SchedulerConfig {
                cron: "0 0 */6 * * *".to_string(),
                timezone: "Asia/Vladivostok".to_string(),
            },
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
        let defaults = Config::try_from(&AppConfig::default())?;

        let s = Config::builder()
            .add_source(defaults)
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Environment variables with prefix "ARGUS_", e.g. ARGUS__SERVER__PORT
            .add_source(Environment::with_prefix("ARGUS").separator("__"))
            .build()?;

        let mut config: AppConfig = s.try_deserialize()?;

        if config.scraper.chrome_path.is_none() {
            config.scraper.chrome_path = env::var("CHROME_PATH").ok();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Message("Server port must be greater than 0".into()));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Message(
                "Database max_connections must be greater than 0".into(),
            ));
        }

        if !self.scraper.marketplace_prefix.starts_with("http") {
            return Err(ConfigError::Message(
                "scraper.marketplace_prefix must be an http(s) URL prefix".into(),
            ));
        }

        if self.scraper.max_concurrent_pages == 0 {
            return Err(ConfigError::Message(
                "scraper.max_concurrent_pages must be greater than 0".into(),
            ));
        }

        if self.scraper.chunk_pause_min_secs > self.scraper.chunk_pause_max_secs {
            return Err(ConfigError::Message(
                "scraper.chunk_pause_min_secs cannot exceed chunk_pause_max_secs".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.scraper.jar_clear_probability) {
            return Err(ConfigError::Message(
                "scraper.jar_clear_probability must be between 0.0 and 1.0".into(),
            ));
        }

        if self.scraper.behavior_time_scale < 0.0 {
            return Err(ConfigError::Message(
                "scraper.behavior_time_scale cannot be negative".into(),
            ));
        }

        if !is_valid_cron(&self.scheduler.cron) {
            return Err(ConfigError::Message(
                "Invalid cron expression in scheduler.cron".into(),
            ));
        }

        if chrono_tz::Tz::from_str(&self.scheduler.timezone).is_err() {
            return Err(ConfigError::Message(
                "scheduler.timezone is not a known IANA timezone".into(),
            ));
        }

        Ok(())
    }
}

// tokio-cron-scheduler expressions carry a seconds field, so six parts.
fn is_valid_cron(cron_expr: &str) -> bool {
    let parts: Vec<&str> = cron_expr.split_whitespace().collect();
    if parts.len() != 6 {
        return false;
    }

    for part in parts {
        if part.is_empty() {
            return false;
        }
        if !part
            .chars()
            .all(|c| c.is_ascii_digit() || c == '*' || c == '-' || c == ',' || c == '/')
        {
            return false;
        }
    }

    true
}
