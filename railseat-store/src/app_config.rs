use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub ticketing: TicketingRules,
}

/// Knobs of the ticketing core. Every field has a default so the section is optional.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TicketingRules {
    pub ledger_ttl_seconds: u64,
    pub token_bucket_ttl_seconds: u64,
    pub reconcile_grace_millis: u64,
    pub reconcile_marker_ttl_seconds: u64,
    pub lock_wait_millis: u64,
    pub lock_lease_millis: u64,
    pub local_lock_ttl_seconds: u64,
    pub local_lock_capacity: usize,
    pub auto_cancel_delay_seconds: u64,
    pub max_passengers: usize,
}

impl Default for TicketingRules {
    fn default() -> Self {
        Self {
            ledger_ttl_seconds: 86_400,
            token_bucket_ttl_seconds: 86_400,
            reconcile_grace_millis: 10_000,
            reconcile_marker_ttl_seconds: 30,
            lock_wait_millis: 3_000,
            lock_lease_millis: 30_000,
            local_lock_ttl_seconds: 86_400,
            local_lock_capacity: 10_000,
            auto_cancel_delay_seconds: 600,
            max_passengers: 5,
        }
    }
}

impl TicketingRules {
    pub fn ledger_ttl(&self) -> Duration {
        Duration::from_secs(self.ledger_ttl_seconds)
    }

    pub fn token_bucket_ttl(&self) -> Duration {
        Duration::from_secs(self.token_bucket_ttl_seconds)
    }

    pub fn reconcile_grace(&self) -> Duration {
        Duration::from_millis(self.reconcile_grace_millis)
    }

    pub fn reconcile_marker_ttl(&self) -> Duration {
        Duration::from_secs(self.reconcile_marker_ttl_seconds)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_millis)
    }

    pub fn lock_lease(&self) -> Duration {
        Duration::from_millis(self.lock_lease_millis)
    }

    pub fn local_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.local_lock_ttl_seconds)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_key_prefix() -> String {
    "railseat:".into()
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    #[serde(default = "default_auto_cancel_topic")]
    pub auto_cancel_topic: String,
    #[serde(default = "default_group_id")]
    pub group_id: String,
}

fn default_auto_cancel_topic() -> String {
    "ticket.auto-cancel".into()
}

fn default_group_id() -> String {
    "railseat-auto-cancel".into()
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Optional per-environment overrides
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `RAILSEAT__TICKETING__MAX_PASSENGERS=4`
            .add_source(config::Environment::with_prefix("RAILSEAT").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticketing_section_is_optional() {
        let cfg: Config = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                [server]
                port = 3000
                [database]
                url = "postgres://localhost/railseat"
                [redis]
                url = "redis://127.0.0.1/"
                [kafka]
                brokers = "localhost:9092"
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.ticketing.max_passengers, 5);
        assert_eq!(cfg.redis.key_prefix, "railseat:");
        assert_eq!(cfg.database.max_connections, 5);
        assert_eq!(cfg.ticketing.reconcile_grace(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_ticketing_override() {
        let rules: TicketingRules = config::Config::builder()
            .add_source(config::File::from_str(
                "lock_wait_millis = 250",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(rules.lock_wait(), Duration::from_millis(250));
        assert_eq!(rules.local_lock_capacity, 10_000);
    }
}
