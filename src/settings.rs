use std::time::Duration;

use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;
use url::Url;

use crate::db::SiteDescriptor;
use crate::error::ConfigError;

const DEFAULT_DB_PATH: &str = "data/vinyl.sqlite";
const DEFAULT_TARGET_URL: &str =
    "https://www.mascom.rs/sr/muzika.1.90.html?pack[]=4&sorting_list=pd&_limit=12";
const DEFAULT_SITE_NAME: &str = "Mascom";
const DEFAULT_SITE_BASE_URL: &str = "https://www.mascom.rs";
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub db_path: String,
    pub target_url: String,
    pub site_name: String,
    pub site_base_url: String,
    pub user_agent: String,
    pub fetch_timeout_secs: u64,
    pub store_timeout_secs: u64,
}

/// Values given on the command line. They win over file and environment.
#[derive(Debug, Default)]
pub struct Overrides {
    pub db_path: Option<String>,
    pub target_url: Option<String>,
}

impl Settings {
    /// Defaults, then `vinyl_scraper.toml` if present, then `SCRAPER_*`
    /// environment variables, then CLI overrides.
    pub fn load(overrides: Overrides) -> Result<Self, ConfigError> {
        let builder = defaults()?
            .add_source(File::with_name("vinyl_scraper").required(false))
            .add_source(Environment::with_prefix("SCRAPER"));
        Self::from_builder(builder, overrides)
    }

    fn from_builder(
        builder: ConfigBuilder<config::builder::DefaultState>,
        overrides: Overrides,
    ) -> Result<Self, ConfigError> {
        let settings: Settings = builder
            .set_override_option("db_path", overrides.db_path)?
            .set_override_option("target_url", overrides.target_url)?
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("db_path", &self.db_path),
            ("target_url", &self.target_url),
            ("site_name", &self.site_name),
            ("site_base_url", &self.site_base_url),
            ("user_agent", &self.user_agent),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing(key));
            }
        }
        parse_url("target_url", &self.target_url)?;
        parse_url("site_base_url", &self.site_base_url)?;
        Ok(())
    }

    pub fn site(&self) -> Result<SiteDescriptor, ConfigError> {
        Ok(SiteDescriptor {
            name: self.site_name.trim().to_string(),
            base_url: parse_url("site_base_url", &self.site_base_url)?,
        })
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}

fn defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError> {
    Ok(Config::builder()
        .set_default("db_path", DEFAULT_DB_PATH)?
        .set_default("target_url", DEFAULT_TARGET_URL)?
        .set_default("site_name", DEFAULT_SITE_NAME)?
        .set_default("site_base_url", DEFAULT_SITE_BASE_URL)?
        .set_default("user_agent", DEFAULT_USER_AGENT)?
        .set_default("fetch_timeout_secs", 30_i64)?
        .set_default("store_timeout_secs", 5_i64)?)
}

fn parse_url(key: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidUrl { key, source })
}
