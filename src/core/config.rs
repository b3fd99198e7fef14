//! Configuration - engine parameters loaded from `tradebatch.toml`

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Cadence unit for periodic trade scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
}

impl ScheduleUnit {
    pub fn secs(&self) -> i64 {
        match self {
            ScheduleUnit::Seconds => 1,
            ScheduleUnit::Minutes => 60,
            ScheduleUnit::Hours => 3_600,
            ScheduleUnit::Days => 86_400,
            ScheduleUnit::Weeks => 604_800,
        }
    }
}

/// A periodic cadence: every N units at a fixed offset from the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub every: u32,
    pub unit: ScheduleUnit,
    /// Offset from the cadence boundary, in seconds
    #[serde(default)]
    pub offset_secs: i64,
}

impl ScheduleSpec {
    /// First cadence boundary strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let period = (self.every.max(1) as i64) * self.unit.secs();
        let ts = now.timestamp();
        let base = ts - (ts - self.offset_secs).rem_euclid(period);
        DateTime::from_timestamp(base + period, 0).unwrap_or(now)
    }
}

impl Default for ScheduleSpec {
    fn default() -> Self {
        Self {
            every: 1,
            unit: ScheduleUnit::Hours,
            offset_secs: 0,
        }
    }
}

/// Scheduler policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Master switch; `place_trade` refuses when disabled
    pub enabled: bool,

    /// Market used for trades that do not name one
    pub default_market: String,

    /// Minimum aggregate value per sell currency before a bundle submits
    #[serde(default)]
    pub min_values: HashMap<String, Decimal>,
}

impl TradingConfig {
    pub fn min_value(&self, currency: &str) -> Decimal {
        self.min_values.get(currency).copied().unwrap_or(Decimal::ZERO)
    }
}

/// Order engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Seconds between passes over the open-order set
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Confirmations a deposit needs before the leg completes
    #[serde(default = "default_min_confirmations")]
    pub min_confirmations: u32,
}

fn default_poll_interval() -> u64 {
    5
}
fn default_min_confirmations() -> u32 {
    2
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            min_confirmations: default_min_confirmations(),
        }
    }
}

/// Ledger storage location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub path: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("tradebatch.book"),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub trading: TradingConfig,

    /// Global cadence for `Schedule::OnSchedule` trades
    #[serde(default)]
    pub schedule: ScheduleSpec,

    /// Per-market cadence overrides
    #[serde(default)]
    pub market_schedules: HashMap<String, ScheduleSpec>,

    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub ledger: LedgerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            trading: TradingConfig {
                enabled: true,
                default_market: "paper".to_string(),
                min_values: HashMap::new(),
            },
            schedule: ScheduleSpec::default(),
            market_schedules: HashMap::new(),
            broker: BrokerConfig::default(),
            ledger: LedgerConfig::default(),
        }
    }
}

impl Config {
    /// Load config from the given TOML file path.
    pub fn load(path: &Path) -> crate::core::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::core::Error::Config(format!("failed to read config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| crate::core::Error::Config(format!("failed to parse config: {}", e)))
    }

    /// Load from the default location, falling back to defaults.
    pub fn load_default() -> Self {
        let candidates = [
            "tradebatch.toml",
            concat!(env!("CARGO_MANIFEST_DIR"), "/tradebatch.toml"),
        ];

        for path in &candidates {
            if let Ok(cfg) = Self::load(Path::new(path)) {
                tracing::info!("loaded config from {}", path);
                return cfg;
            }
        }

        tracing::warn!("no tradebatch.toml found, using defaults");
        Self::default()
    }

    /// Cadence for a market, falling back to the global schedule.
    pub fn schedule_for(&self, market: Option<&str>) -> ScheduleSpec {
        market
            .and_then(|m| self.market_schedules.get(m).copied())
            .unwrap_or(self.schedule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_after_is_strictly_later() {
        let spec = ScheduleSpec {
            every: 1,
            unit: ScheduleUnit::Hours,
            offset_secs: 0,
        };
        // Exactly on a boundary: next boundary must be one full period away.
        let on_boundary = DateTime::from_timestamp(7 * 3_600, 0).unwrap();
        assert_eq!(spec.next_after(on_boundary).timestamp(), 8 * 3_600);

        let mid = DateTime::from_timestamp(7 * 3_600 + 120, 0).unwrap();
        assert_eq!(spec.next_after(mid).timestamp(), 8 * 3_600);
    }

    #[test]
    fn test_next_after_respects_offset() {
        let spec = ScheduleSpec {
            every: 10,
            unit: ScheduleUnit::Minutes,
            offset_secs: 90,
        };
        let now = DateTime::from_timestamp(600 + 91, 0).unwrap();
        assert_eq!(spec.next_after(now).timestamp(), 1_200 + 90);
    }

    #[test]
    fn test_parse_toml() {
        let cfg: Config = toml::from_str(
            r#"
            [trading]
            enabled = true
            default_market = "paper"

            [trading.min_values]
            RTC = 5.0

            [schedule]
            every = 15
            unit = "minutes"

            [broker]
            poll_interval_secs = 2
            "#,
        )
        .unwrap();
        assert_eq!(cfg.trading.min_value("RTC"), Decimal::from(5));
        assert_eq!(cfg.trading.min_value("BTC"), Decimal::ZERO);
        assert_eq!(cfg.schedule.every, 15);
        assert_eq!(cfg.broker.poll_interval_secs, 2);
        assert_eq!(cfg.broker.min_confirmations, 2);
    }

    #[test]
    fn test_market_schedule_override() {
        let mut cfg = Config::default();
        cfg.market_schedules.insert(
            "fast".to_string(),
            ScheduleSpec {
                every: 30,
                unit: ScheduleUnit::Seconds,
                offset_secs: 0,
            },
        );
        assert_eq!(cfg.schedule_for(Some("fast")).unit, ScheduleUnit::Seconds);
        assert_eq!(cfg.schedule_for(Some("other")).unit, ScheduleUnit::Hours);
        assert_eq!(cfg.schedule_for(None).unit, ScheduleUnit::Hours);
    }
}
