//! Service configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `DATABASE_URL` - Postgres with catalog, promo codes and loyalty data
//! - `PAYMENT_API_URL`, `PAYMENT_SHOP_ID`, `PAYMENT_SECRET_KEY` - payment provider
//! - `DELIVERY_API_URL` - delivery tariff calculator
//!
//! ## Optional
//! - `NATS_URL` - domain event bus (events are dropped when unset)
//! - `PORT` - listen port (default: 8083)
//! - `CART_TTL_MINUTES` (30), `DELIVERY_TIMEOUT_MS` (5000),
//!   `DELIVERY_CACHE_SECONDS` (600), `DELIVERY_STALE_SECONDS` (21600),
//!   `DELIVERY_CACHE_CAPACITY` (10000), `PAYMENT_TIMEOUT_MS` (10000),
//!   `PAYMENT_PENDING_TIMEOUT_MINUTES` (60), `RECONCILE_INTERVAL_SECONDS` (300),
//!   `SETTLED_RETENTION_MINUTES` (1440)
//! - `LOYALTY_{BRONZE,SILVER,GOLD}_THRESHOLD` (10000 / 30000 / 50000)
//! - `LOYALTY_{BRONZE,SILVER,GOLD}_PERCENT` (5 / 7 / 10)

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::collaborators::http::PaymentApiConfig;
use crate::domain::loyalty::{LoyaltyTiers, Tier};
use crate::domain::value_objects::{Money, Percent};
use crate::engine::EngineSettings;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub database_url: String,
    pub nats_url: Option<String>,
    pub port: u16,
    pub engine: EngineSettings,
    pub reconcile_interval: Duration,
    pub payment: PaymentApiConfig,
    pub delivery_api_url: String,
    pub loyalty: LoyaltyTiers,
}

impl EngineConfig {
    /// Reads the process environment. `.env` is expected to be loaded already.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let delivery_timeout = Duration::from_millis(env.positive("DELIVERY_TIMEOUT_MS", 5_000)?);
        let payment_timeout = Duration::from_millis(env.positive("PAYMENT_TIMEOUT_MS", 10_000)?);

        let engine = EngineSettings {
            cart_ttl: chrono::Duration::minutes(env.positive("CART_TTL_MINUTES", 30)?),
            delivery_timeout,
            delivery_cache_ttl: Duration::from_secs(env.parsed("DELIVERY_CACHE_SECONDS", 600)?),
            delivery_stale_ttl: Duration::from_secs(env.positive("DELIVERY_STALE_SECONDS", 21_600)?),
            delivery_cache_capacity: env.positive("DELIVERY_CACHE_CAPACITY", 10_000)?,
            payment_timeout,
            payment_pending_timeout: chrono::Duration::minutes(env.positive("PAYMENT_PENDING_TIMEOUT_MINUTES", 60)?),
            settled_retention: chrono::Duration::minutes(env.positive("SETTLED_RETENTION_MINUTES", 1_440)?),
        };

        Ok(Self {
            database_url: env.required("DATABASE_URL")?,
            nats_url: env.optional("NATS_URL"),
            port: env.parsed("PORT", 8083)?,
            engine,
            reconcile_interval: Duration::from_secs(env.positive("RECONCILE_INTERVAL_SECONDS", 300)?),
            payment: PaymentApiConfig {
                base_url: env.required("PAYMENT_API_URL")?,
                shop_id: env.required("PAYMENT_SHOP_ID")?,
                secret_key: env.required("PAYMENT_SECRET_KEY")?,
                timeout: payment_timeout,
            },
            delivery_api_url: env.required("DELIVERY_API_URL")?,
            loyalty: loyalty_tiers(&env)?,
        })
    }
}

fn loyalty_tiers<F: Fn(&str) -> Option<String>>(env: &Env<F>) -> Result<LoyaltyTiers, ConfigError> {
    let tier = |name: &str, threshold: i64, percent: u32| -> Result<Tier, ConfigError> {
        let threshold_key = format!("LOYALTY_{name}_THRESHOLD");
        let percent_key = format!("LOYALTY_{name}_PERCENT");
        let threshold: i64 = env.parsed(&threshold_key, threshold)?;
        if threshold < 0 {
            return Err(ConfigError::InvalidEnvVar(threshold_key, "must not be negative".to_string()));
        }
        let percent = Percent::from_int(env.parsed(&percent_key, percent)?)
            .map_err(|e| ConfigError::InvalidEnvVar(percent_key, e.to_string()))?;
        Ok(Tier { threshold: Money::from_major(threshold), percent })
    };

    let tiers = LoyaltyTiers {
        bronze: tier("BRONZE", 10_000, 5)?,
        silver: tier("SILVER", 30_000, 7)?,
        gold: tier("GOLD", 50_000, 10)?,
    };
    if tiers.bronze.threshold >= tiers.silver.threshold || tiers.silver.threshold >= tiers.gold.threshold {
        return Err(ConfigError::InvalidEnvVar(
            "LOYALTY_*_THRESHOLD".to_string(),
            "thresholds must increase from bronze to gold".to_string(),
        ));
    }
    Ok(tiers)
}

// =============================================================================
// Helpers
// =============================================================================

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    fn parsed<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidEnvVar(key.to_string(), e.to_string())),
            None => Ok(default),
        }
    }

    fn positive<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialOrd + Default,
        T::Err: std::fmt::Display,
    {
        let value = self.parsed(key, default)?;
        if value <= T::default() {
            return Err(ConfigError::InvalidEnvVar(key.to_string(), "must be greater than zero".to_string()));
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("DATABASE_URL", "postgres://localhost/shop"),
            ("PAYMENT_API_URL", "https://pay.example/v3"),
            ("PAYMENT_SHOP_ID", "123456"),
            ("PAYMENT_SECRET_KEY", "live_abcdef"),
            ("DELIVERY_API_URL", "https://delivery.example"),
        ])
    }

    fn load(vars: &HashMap<&'static str, &'static str>) -> Result<EngineConfig, ConfigError> {
        EngineConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn test_defaults() {
        let config = load(&base()).unwrap();
        assert_eq!(config.port, 8083);
        assert_eq!(config.nats_url, None);
        assert_eq!(config.engine.cart_ttl, chrono::Duration::minutes(30));
        assert_eq!(config.engine.delivery_timeout, Duration::from_millis(5_000));
        assert_eq!(config.engine.delivery_cache_ttl, Duration::from_secs(600));
        assert_eq!(config.engine.delivery_stale_ttl, Duration::from_secs(21_600));
        assert_eq!(config.engine.delivery_cache_capacity, 10_000);
        assert_eq!(config.engine.settled_retention, chrono::Duration::hours(24));
        assert_eq!(config.payment.timeout, Duration::from_millis(10_000));
        assert_eq!(config.engine.payment_pending_timeout, chrono::Duration::minutes(60));
        assert_eq!(config.reconcile_interval, Duration::from_secs(300));
        assert_eq!(config.loyalty, LoyaltyTiers::default());
    }

    #[test]
    fn test_overrides() {
        let mut vars = base();
        vars.insert("PORT", "9000");
        vars.insert("CART_TTL_MINUTES", "15");
        vars.insert("NATS_URL", "nats://localhost:4222");
        vars.insert("LOYALTY_GOLD_PERCENT", "12");
        let config = load(&vars).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.engine.cart_ttl, chrono::Duration::minutes(15));
        assert_eq!(config.nats_url.as_deref(), Some("nats://localhost:4222"));
        assert_eq!(config.loyalty.gold.percent, Percent::from_int(12).unwrap());
    }

    #[test]
    fn test_missing_required() {
        let mut vars = base();
        vars.remove("PAYMENT_SECRET_KEY");
        assert_eq!(load(&vars).unwrap_err(), ConfigError::MissingEnvVar("PAYMENT_SECRET_KEY".into()));
    }

    #[test]
    fn test_invalid_values() {
        let mut vars = base();
        vars.insert("CART_TTL_MINUTES", "0");
        assert!(matches!(load(&vars), Err(ConfigError::InvalidEnvVar(key, _)) if key == "CART_TTL_MINUTES"));

        let mut vars = base();
        vars.insert("PORT", "http");
        assert!(matches!(load(&vars), Err(ConfigError::InvalidEnvVar(key, _)) if key == "PORT"));

        let mut vars = base();
        vars.insert("LOYALTY_SILVER_THRESHOLD", "60000");
        assert!(matches!(load(&vars), Err(ConfigError::InvalidEnvVar(..))));

        let mut vars = base();
        vars.insert("LOYALTY_BRONZE_PERCENT", "150");
        assert!(matches!(load(&vars), Err(ConfigError::InvalidEnvVar(key, _)) if key == "LOYALTY_BRONZE_PERCENT"));
    }
}
