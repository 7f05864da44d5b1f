use std::env;
use std::str::FromStr;
use std::time::Duration;
use log::{info, warn};

// Server Configuration
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8080";
pub const DEFAULT_API_BIND_ADDRESS: &str = "127.0.0.1:8081";
pub const STATS_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_MAX_CONNECTIONS: usize = 1000;

// Push Configuration
pub const DEFAULT_PUSH_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_OUTBOUND_BUFFER: usize = 100;

// Simulation Configuration
pub const DEFAULT_SERIES_CAPACITY: usize = 30;
pub const DEFAULT_SIM_FLOOR: f64 = 100.0;
pub const DEFAULT_SIM_STEP: f64 = 20.0;
// Spacing of the back-filled history the simulator starts with
pub const SERIES_SEED_SPACING_SECS: i64 = 60;

// Downstream Configuration
pub const DEFAULT_DOWNSTREAM_URL: &str = "http://localhost:3001";
pub const DEFAULT_DOWNSTREAM_TIMEOUT_SECS: u64 = 4;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub api_bind_address: String,
    pub push_interval_secs: u64,
    pub series_capacity: usize,
    pub sim_floor: f64,
    pub sim_step: f64,
    pub downstream_url: String,
    pub downstream_timeout_secs: u64,
    pub max_connections: usize,
    pub outbound_buffer: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            api_bind_address: DEFAULT_API_BIND_ADDRESS.to_string(),
            push_interval_secs: DEFAULT_PUSH_INTERVAL_SECS,
            series_capacity: DEFAULT_SERIES_CAPACITY,
            sim_floor: DEFAULT_SIM_FLOOR,
            sim_step: DEFAULT_SIM_STEP,
            downstream_url: DEFAULT_DOWNSTREAM_URL.to_string(),
            downstream_timeout_secs: DEFAULT_DOWNSTREAM_TIMEOUT_SECS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            log_level: "info".to_string(),
        }
    }
}

// Numeric settings fall back to their default when missing or unparseable
fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("{} has invalid value '{}', using default", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_address: env::var("BIND_ADDRESS")
                .unwrap_or(defaults.bind_address),
            api_bind_address: env::var("API_BIND_ADDRESS")
                .unwrap_or(defaults.api_bind_address),
            push_interval_secs: parse_env("PUSH_INTERVAL_SECS", defaults.push_interval_secs),
            series_capacity: parse_env("SERIES_CAPACITY", defaults.series_capacity),
            sim_floor: parse_env("SIM_FLOOR", defaults.sim_floor),
            sim_step: parse_env("SIM_STEP", defaults.sim_step),
            downstream_url: env::var("DOWNSTREAM_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.downstream_url),
            downstream_timeout_secs: parse_env("DOWNSTREAM_TIMEOUT_SECS", defaults.downstream_timeout_secs),
            max_connections: parse_env("MAX_CONNECTIONS", defaults.max_connections),
            outbound_buffer: parse_env("OUTBOUND_BUFFER", defaults.outbound_buffer),
            log_level: env::var("RUST_LOG")
                .unwrap_or(defaults.log_level),
        }
    }

    pub fn push_interval(&self) -> Duration {
        Duration::from_secs(self.push_interval_secs)
    }

    pub fn downstream_timeout(&self) -> Duration {
        Duration::from_secs(self.downstream_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.push_interval_secs == 0 {
            return Err("PUSH_INTERVAL_SECS must be greater than zero".to_string());
        }

        if self.series_capacity < 2 {
            return Err(format!("SERIES_CAPACITY must be at least 2, got {}", self.series_capacity));
        }

        if self.sim_floor <= 0.0 || self.sim_step <= 0.0 {
            return Err("SIM_FLOOR and SIM_STEP must be positive".to_string());
        }

        // A slow upstream must not hold a push cycle past one interval
        if self.downstream_timeout_secs == 0 || self.downstream_timeout_secs > self.push_interval_secs {
            return Err(format!(
                "DOWNSTREAM_TIMEOUT_SECS must be between 1 and the push interval ({}s)",
                self.push_interval_secs
            ));
        }

        if !self.downstream_url.starts_with("http://") && !self.downstream_url.starts_with("https://") {
            return Err(format!("Downstream URL must be http(s): {}", self.downstream_url));
        }

        if self.max_connections == 0 || self.outbound_buffer == 0 {
            return Err("MAX_CONNECTIONS and OUTBOUND_BUFFER must be greater than zero".to_string());
        }

        Ok(())
    }

    pub fn log_config(&self) {
        info!("Server Configuration:");
        info!("  Bind Address: {}", self.bind_address);
        info!("  API Bind Address: {}", self.api_bind_address);
        info!("  Push Interval: {}s", self.push_interval_secs);
        info!("  Series Capacity: {}", self.series_capacity);
        info!("  Simulation Floor/Step: {} / {}", self.sim_floor, self.sim_step);
        info!("  Downstream: {} (timeout {}s)", self.downstream_url, self.downstream_timeout_secs);
        info!("  Max Connections: {}", self.max_connections);
        info!("  Log Level: {}", self.log_level);
    }
}
