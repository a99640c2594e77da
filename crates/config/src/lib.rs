use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use chrono_tz::Tz;
use log::LevelFilter;
use serde::{Deserialize, Deserializer};

pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

const CONFIG_NAME: &str = "config.toml";
const DEFAULT_CONFIG_FILE: &str = include_str!("../templates/config.toml");
const SECRET_ENV_VAR: &str = "NS_SECRET";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GlucoseUnit {
    #[default]
    Mmol,
    Mgdl,
}

impl GlucoseUnit {
    pub fn label(self) -> &'static str {
        match self {
            Self::Mmol => "mmol/L",
            Self::Mgdl => "mg/dL",
        }
    }

    /// Converts a Nightscout sgv (always mg/dL) into this unit.
    pub fn convert(self, mgdl: f64) -> f64 {
        match self {
            Self::Mmol => mgdl / 18.,
            Self::Mgdl => mgdl,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: LevelFilter,
    pub http_port: u16,

    pub enable_tls: bool,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,

    pub nightscout_url: String,
    pub nightscout_token: String,
    #[serde(deserialize_with = "deserialize_tz")]
    pub timezone: Tz,

    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub cache_ttl_secs: u64,

    pub glucose_unit: GlucoseUnit,
    pub title: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: LevelFilter::Info,
            http_port: 5252,
            enable_tls: false,
            cert_path: PathBuf::new(),
            key_path: PathBuf::new(),
            nightscout_url: String::new(),
            nightscout_token: String::new(),
            timezone: chrono_tz::Europe::Berlin,
            connect_timeout_secs: 6,
            read_timeout_secs: 15,
            cache_ttl_secs: 600,
            glucose_unit: GlucoseUnit::Mmol,
            title: "Looping Dashboard".to_string(),
        }
    }
}

impl Config {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Token to send to Nightscout, if any.
    pub fn token(&self) -> Option<&str> {
        Some(self.nightscout_token.as_str()).filter(|x| !x.is_empty())
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(secret) = lookup(SECRET_ENV_VAR).filter(|x| !x.is_empty()) {
            self.nightscout_token = secret;
        }
    }
}

fn deserialize_tz<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Tz, D::Error> {
    let name = String::deserialize(deserializer)?;

    name.parse::<Tz>()
        .map_err(|err| serde::de::Error::custom(format!("invalid timezone {name:?}: {err}")))
}

/// Reads the config file next to the executable, creating it if it doesn't exist.
pub fn get_config() -> Result<Config> {
    let mut cfgpath = std::env::current_exe().context("couldn't get path to executable")?;
    cfgpath.set_file_name(CONFIG_NAME);

    let mut config = read_config(&cfgpath)?;
    config.apply_env(|key| std::env::var(key).ok());

    Ok(config)
}

fn read_config(cfgpath: &Path) -> Result<Config> {
    let config_str = match fs::read_to_string(cfgpath) {
        Ok(config_str) => config_str,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            // If config file doesn't exist, create a new default configuration
            fs::write(cfgpath, DEFAULT_CONFIG_FILE).context("failed to create new config file")?;
            return Ok(Config::default());
        }
        Err(e) => return Err(e).context("failed to read config file"),
    };

    basic_toml::from_str(&config_str).context("failed to parse config file")
}
