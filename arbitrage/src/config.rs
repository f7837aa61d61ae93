use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use market::types::Pair;

use crate::types::Leg;

pub const TICK_MS_VAR: &str = "ARB_TICK_MS";
pub const DEPTH_STALENESS_MS_VAR: &str = "ARB_DEPTH_STALENESS_MS";
pub const PAIRS_JSON_VAR: &str = "ARB_PAIRS_JSON";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{key} must be a positive integer, got '{value}'")]
    InvalidNumber { key: &'static str, value: String },

    #[error("invalid pair list: {0}")]
    InvalidPairs(#[from] serde_json::Error),

    #[error("{pair}: {reason}")]
    InvalidThresholds { pair: Pair, reason: &'static str },
}

/// Trading parameters of one cross-venue pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairThresholds {
    pub pair: Pair,

    /// Leg A and leg B. Divergence is measured as A relative to B.
    pub legs: [Leg; 2],

    /// Open when |divergence| exceeds this, in percent.
    pub open_threshold: Decimal,

    /// Close when |divergence| falls below this, in percent.
    pub close_threshold: Decimal,

    /// Stop-loss: close when either leg moved this many percent against
    /// its open price.
    pub limit_close: Decimal,

    /// Base amount per leg.
    pub amount: Decimal,

    /// Allowed deviation from the decision price, as a ratio.
    pub slippage_limit: Decimal,
}

impl PairThresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |reason| ConfigError::InvalidThresholds {
            pair: self.pair.clone(),
            reason,
        };

        if self.legs[0].venue == self.legs[1].venue {
            return Err(fail("legs must be on different venues"));
        }
        if self.close_threshold < Decimal::ZERO || self.open_threshold <= self.close_threshold {
            return Err(fail("open_threshold must exceed close_threshold >= 0"));
        }
        if self.limit_close <= Decimal::ZERO {
            return Err(fail("limit_close must be positive"));
        }
        if self.amount <= Decimal::ZERO {
            return Err(fail("amount must be positive"));
        }
        if self.slippage_limit < Decimal::ZERO || self.slippage_limit >= Decimal::ONE {
            return Err(fail("slippage_limit must be a ratio in [0, 1)"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ArbitrageConfig {
    /// Delay between two watch ticks.
    pub tick_interval: Duration,

    /// Reference prices older than this are ignored.
    pub depth_staleness: Duration,

    pub pairs: Vec<PairThresholds>,
}

impl ArbitrageConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value source; missing numeric keys take defaults,
    /// the pair list is required.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let tick_ms = millis(&lookup, TICK_MS_VAR, 1_000)?;
        let staleness_ms = millis(&lookup, DEPTH_STALENESS_MS_VAR, 5_000)?;

        let pairs_json = lookup(PAIRS_JSON_VAR).ok_or(ConfigError::Missing(PAIRS_JSON_VAR))?;
        let pairs = parse_pairs(&pairs_json)?;

        Ok(Self {
            tick_interval: Duration::from_millis(tick_ms),
            depth_staleness: Duration::from_millis(staleness_ms),
            pairs,
        })
    }

    pub fn thresholds(&self, pair: &Pair) -> Option<&PairThresholds> {
        self.pairs.iter().find(|t| &t.pair == pair)
    }
}

pub fn parse_pairs(json: &str) -> Result<Vec<PairThresholds>, ConfigError> {
    let pairs: Vec<PairThresholds> = serde_json::from_str(json)?;
    for p in &pairs {
        p.validate()?;
    }
    Ok(pairs)
}

fn millis(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => match value.trim().parse::<u64>() {
            Ok(ms) if ms > 0 => Ok(ms),
            _ => Err(ConfigError::InvalidNumber { key, value }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    const PAIRS: &str = r#"[{
        "pair": "ETH/USDT",
        "legs": [
            { "venue": "okex", "kind": "futures" },
            { "venue": "huobi", "kind": "futures" }
        ],
        "open_threshold": "1.6",
        "close_threshold": "0.5",
        "limit_close": "5",
        "amount": "0.1",
        "slippage_limit": "0.002"
    }]"#;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn parses_pairs_and_defaults() {
        let cfg = ArbitrageConfig::from_lookup(lookup(&[(PAIRS_JSON_VAR, PAIRS)])).unwrap();

        assert_eq!(cfg.tick_interval, Duration::from_secs(1));
        assert_eq!(cfg.depth_staleness, Duration::from_secs(5));

        let t = cfg.thresholds(&Pair::new("eth", "usdt")).unwrap();
        assert_eq!(t.open_threshold, dec!(1.6));
        assert_eq!(t.legs[1], Leg::new("huobi", market::venue::LegKind::Futures));
    }

    #[test]
    fn numeric_overrides() {
        let cfg = ArbitrageConfig::from_lookup(lookup(&[
            (PAIRS_JSON_VAR, PAIRS),
            (TICK_MS_VAR, "250"),
            (DEPTH_STALENESS_MS_VAR, "2000"),
        ]))
        .unwrap();

        assert_eq!(cfg.tick_interval, Duration::from_millis(250));
        assert_eq!(cfg.depth_staleness, Duration::from_secs(2));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(
            ArbitrageConfig::from_lookup(lookup(&[])),
            Err(ConfigError::Missing(PAIRS_JSON_VAR))
        ));
        assert!(matches!(
            ArbitrageConfig::from_lookup(lookup(&[(PAIRS_JSON_VAR, PAIRS), (TICK_MS_VAR, "0")])),
            Err(ConfigError::InvalidNumber { .. })
        ));
        assert!(matches!(
            ArbitrageConfig::from_lookup(lookup(&[(PAIRS_JSON_VAR, "{")])),
            Err(ConfigError::InvalidPairs(_))
        ));
    }

    #[test]
    fn thresholds_must_be_ordered() {
        let inverted = PAIRS.replace("\"1.6\"", "\"0.4\"");
        let err = parse_pairs(&inverted).unwrap_err();
        assert!(err.to_string().contains("open_threshold"));

        let same_venue = PAIRS.replace("huobi", "okex");
        assert!(parse_pairs(&same_venue).is_err());
    }
}
