use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use crate::money::{MoneyError, parse_percentage};
use crate::transaction::{Actor, CommissionRule};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    #[serde(default)]
    pub rotation: LogRotation,
    #[serde(default)]
    pub engine: EngineConfig,
    /// PostgreSQL connection URL. In-memory store when absent.
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub postgres_max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

/// Log file rollover period
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Never,
    Hourly,
    #[default]
    Daily,
}

/// Transaction engine settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on waiting for a transaction or document lease
    pub lease_timeout_ms: u64,
    /// Role required to close a transaction
    pub manager_role: String,
    /// Role required to override a compliance requirement
    pub compliance_override_role: String,
    pub reference_prefix: String,
    /// Zero-padded width of the numeric part of a reference
    pub reference_padding: usize,
    /// Rules loaded into the in-process rule source at startup
    pub commission_rules: Vec<CommissionRuleConfig>,
}

/// A commission rule as written in YAML. The percentage is a string so it
/// never passes through a float.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CommissionRuleConfig {
    pub code: String,
    /// Fraction of gross margin, e.g. "0.075"
    pub percentage: String,
    #[serde(default)]
    pub sales_rep: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl CommissionRuleConfig {
    pub fn to_rule(&self) -> Result<CommissionRule, MoneyError> {
        let mut rule = CommissionRule::new(self.code.trim(), parse_percentage(&self.percentage)?);
        rule.sales_rep = self.sales_rep.as_deref().map(Actor::from);
        rule.active = self.active;
        Ok(rule)
    }
}

impl EngineConfig {
    pub fn lease_timeout(&self) -> Duration {
        Duration::from_millis(self.lease_timeout_ms)
    }

    pub fn commission_rules(&self) -> anyhow::Result<Vec<CommissionRule>> {
        self.commission_rules
            .iter()
            .map(|r| {
                r.to_rule()
                    .with_context(|| format!("Invalid commission rule {}", r.code))
            })
            .collect()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lease_timeout_ms: 5_000,
            manager_role: "transaction_manager".to_string(),
            compliance_override_role: "compliance_manager".to_string(),
            reference_prefix: "TX-".to_string(),
            reference_padding: 6,
            commission_rules: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", config_path))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        if config.engine.lease_timeout_ms == 0 {
            anyhow::bail!("engine.lease_timeout_ms must be positive");
        }
        if config.engine.manager_role.trim().is_empty() {
            anyhow::bail!("engine.manager_role must not be empty");
        }
        if config
            .engine
            .commission_rules
            .iter()
            .any(|r| r.code.trim().is_empty())
        {
            anyhow::bail!("engine.commission_rules: rule code must not be empty");
        }
        config.engine.commission_rules()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    const MINIMAL: &str = r#"
log_level: info
log_dir: ./logs
log_file: deal_ledger.log
use_json: false
rotation: daily
"#;

    #[test]
    fn test_engine_defaults_when_absent() {
        let config = AppConfig::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.engine.lease_timeout(), Duration::from_secs(5));
        assert_eq!(config.rotation, LogRotation::Daily);
        assert!(config.postgres_url.is_none());
        assert_eq!(config.postgres_max_connections, 10);
    }

    #[test]
    fn test_partial_engine_section() {
        let yaml = format!("{}engine:\n  lease_timeout_ms: 250\n  reference_prefix: DL/\n", MINIMAL);
        let config = AppConfig::from_yaml(&yaml).unwrap();
        assert_eq!(config.engine.lease_timeout_ms, 250);
        assert_eq!(config.engine.reference_prefix, "DL/");
        assert_eq!(config.engine.manager_role, "transaction_manager");
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let yaml = format!("{}engine:\n  lease_timeout_ms: 0\n", MINIMAL);
        assert!(AppConfig::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_unknown_rotation_rejected() {
        let yaml = MINIMAL.replace("rotation: daily", "rotation: weekly");
        assert!(AppConfig::from_yaml(&yaml).is_err());

        let yaml = MINIMAL.replace("rotation: daily", "rotation: never");
        assert_eq!(AppConfig::from_yaml(&yaml).unwrap().rotation, LogRotation::Never);
    }

    #[test]
    fn test_commission_rules_parsed() {
        let yaml = format!(
            "{}engine:\n  commission_rules:\n    - code: STD\n      percentage: \"0.075\"\n    - code: OLD\n      percentage: \"0.2\"\n      sales_rep: rep@example.com\n      active: false\n",
            MINIMAL
        );
        let config = AppConfig::from_yaml(&yaml).unwrap();
        let rules = config.engine.commission_rules().unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].code, "STD");
        assert_eq!(rules[0].percentage, Decimal::new(75, 3));
        assert!(rules[0].active);
        assert_eq!(rules[1].sales_rep, Some(Actor::from("rep@example.com")));
        assert!(!rules[1].active);
    }

    #[test]
    fn test_out_of_range_commission_rule_rejected() {
        for pct in ["\"3.0\"", "\"-0.5\"", "\"0.1.2\"", "\"0.12345\""] {
            let yaml = format!(
                "{}engine:\n  commission_rules:\n    - code: BAD\n      percentage: {}\n",
                MINIMAL, pct
            );
            let err = AppConfig::from_yaml(&yaml).unwrap_err();
            assert!(format!("{:#}", err).contains("BAD"), "{:#}", err);
        }
    }
}
