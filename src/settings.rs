use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::rewards::RewardPolicy;

#[derive(Debug, Deserialize)]
pub struct Server {
    pub listen: String,
    pub admin_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Postgres {
    pub url: String,
    pub max_connections: u32,
    pub run_migrations: bool,
}

#[derive(Debug, Deserialize)]
pub struct Stripe {
    pub webhook_secret: String,
    pub signature_tolerance_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct Rewards {
    pub platform_fee_percent: Decimal,
    pub cashback_percent: Decimal,
    pub referral_percent: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub server: Server,
    pub postgres: Postgres,
    pub stripe: Stripe,
    pub rewards: Rewards,
}

impl Settings {
    /// Loads `path` (extension optional) and overlays `LOYA__SECTION__KEY`
    /// environment variables on top of it.
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("server.listen", "0.0.0.0:8080")?
            .set_default("postgres.max_connections", 5)?
            .set_default("postgres.run_migrations", true)?
            .set_default("stripe.signature_tolerance_secs", 300)?
            .set_default("rewards.platform_fee_percent", "10")?
            .set_default("rewards.cashback_percent", "5")?
            .set_default("rewards.referral_percent", "1")?
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("LOYA").separator("__"))
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;

        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.stripe.webhook_secret.trim().is_empty() {
            return Err(ConfigError::Message(
                "stripe.webhook_secret must not be empty".to_string(),
            ));
        }

        self.reward_policy()
            .map(|_| ())
            .map_err(|e| ConfigError::Message(e.to_string()))
    }

    pub fn reward_policy(&self) -> Result<RewardPolicy, crate::rewards::PolicyError> {
        RewardPolicy::new(
            self.rewards.platform_fee_percent,
            self.rewards.cashback_percent,
            self.rewards.referral_percent,
        )
    }
}
