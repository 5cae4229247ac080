//! Ledger configuration.
//!
//! Layered with figment: built-in defaults, then an optional TOML file, then
//! `MEDLEDGER_*` environment variables (`__` separates nested keys, e.g.
//! `MEDLEDGER_DOCUMENTS__DEFAULT_TAX_RATE=0.15`).

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default file looked up by [`LedgerConfig::load`].
pub const DEFAULT_CONFIG_FILE: &str = "medledger.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(#[from] figment::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Document numbering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberingConfig {
    pub quote_prefix: String,
    pub invoice_prefix: String,
    /// First sequence value handed out for quotes.
    pub next_quote: u64,
    pub next_invoice: u64,
}

impl Default for NumberingConfig {
    fn default() -> Self {
        Self {
            quote_prefix: "QT".into(),
            invoice_prefix: "INV".into(),
            next_quote: 1,
            next_invoice: 1,
        }
    }
}

/// Defaults applied when a document is created without explicit values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentsConfig {
    /// Fraction, e.g. `0.15` for 15 %.
    pub default_tax_rate: Decimal,
    pub quote_validity_days: u32,
    /// Used when a client has no terms of its own.
    pub payment_terms_days: u32,
    pub default_quote_terms: Option<String>,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            default_tax_rate: Decimal::ZERO,
            quote_validity_days: 14,
            payment_terms_days: 30,
            default_quote_terms: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryConfig {
    /// Permit movements that take stock below zero.
    pub allow_negative_stock: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub numbering: NumberingConfig,
    pub documents: DocumentsConfig,
    pub inventory: InventoryConfig,
    pub telemetry: TelemetryConfig,
}

impl LedgerConfig {
    /// Load from [`DEFAULT_CONFIG_FILE`] (if present) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load from a specific TOML file (if present) and the environment.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: Self = Self::figment(path).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// The provider stack, for callers that want to merge their own layers.
    pub fn figment(path: impl AsRef<Path>) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("MEDLEDGER_").split("__"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let rate = self.documents.default_tax_rate;
        if rate < Decimal::ZERO || rate > Decimal::ONE {
            return Err(ConfigError::Invalid(format!(
                "documents.default_tax_rate must be within [0, 1], got {rate}"
            )));
        }
        for (key, prefix) in [
            ("numbering.quote_prefix", &self.numbering.quote_prefix),
            ("numbering.invoice_prefix", &self.numbering.invoice_prefix),
        ] {
            if prefix.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{key} must not be empty")));
            }
        }
        if self.numbering.quote_prefix == self.numbering.invoice_prefix {
            return Err(ConfigError::Invalid(
                "quote and invoice prefixes must differ".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rust_decimal_macros::dec;

    #[test]
    fn defaults_without_file_or_env() {
        Jail::expect_with(|_jail| {
            let config = LedgerConfig::load_from("missing.toml").unwrap();
            assert_eq!(config, LedgerConfig::default());
            assert_eq!(config.documents.quote_validity_days, 14);
            assert_eq!(config.numbering.invoice_prefix, "INV");
            Ok(())
        });
    }

    #[test]
    fn file_then_env_override_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "medledger.toml",
                r#"
                [numbering]
                quote_prefix = "Q"
                invoice_prefix = "INV"
                next_quote = 1001
                next_invoice = 1001

                [documents]
                default_tax_rate = "0.125"
                quote_validity_days = 14
                payment_terms_days = 45
                "#,
            )?;
            jail.set_env("MEDLEDGER_DOCUMENTS__PAYMENT_TERMS_DAYS", "60");
            jail.set_env("MEDLEDGER_INVENTORY__ALLOW_NEGATIVE_STOCK", "true");

            let config = LedgerConfig::load().unwrap();
            assert_eq!(config.numbering.quote_prefix, "Q");
            assert_eq!(config.numbering.next_invoice, 1001);
            assert_eq!(config.documents.default_tax_rate, dec!(0.125));
            assert_eq!(config.documents.payment_terms_days, 60);
            assert!(config.inventory.allow_negative_stock);
            assert_eq!(config.telemetry.log_filter, "info");
            Ok(())
        });
    }

    #[test]
    fn tax_rate_above_one_is_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("MEDLEDGER_DOCUMENTS__DEFAULT_TAX_RATE", "\"1.5\"");
            let err = LedgerConfig::load().unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)));
            Ok(())
        });
    }
}
