use chrono_tz::Tz;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    pub debug: bool,
    pub auth_token: String,
    pub enable_swagger: bool,
    pub enable_cors: bool,
    pub port: u16,
    /// IANA zone that decides what "today" is for occurrence status.
    pub timezone: String,
    pub calendar_name: String,
    pub max_window_days: u32,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let config = Config::builder()
            .add_source(File::with_name("config").required(false))
            // APP_AUTH_TOKEN, APP_MAX_WINDOW_DAYS, ...
            .add_source(Environment::with_prefix("APP").try_parsing(true))
            .set_default("debug", false)?
            .set_default("auth_token", "default-token-change-me")?
            .set_default("enable_swagger", true)?
            .set_default("enable_cors", false)?
            .set_default("port", 8080)?
            .set_default("timezone", "UTC")?
            .set_default("calendar_name", "Coaching Calendar")?
            .set_default("max_window_days", 62)?
            .build()?;

        config.try_deserialize()
    }

    pub fn time_zone(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|err| ConfigError::Message(format!("invalid timezone {}: {err}", self.timezone)))
    }
}
