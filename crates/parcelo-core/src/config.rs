use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::registry::CarrierId;
use crate::ValidationError;

/// API credentials for one carrier account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_number: Option<String>,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            account_number: None,
        }
    }

    pub fn with_account_number(mut self, account_number: impl Into<String>) -> Self {
        self.account_number = Some(account_number.into());
        self
    }

    /// Both key and secret present. Adapters fall back to mock mode otherwise.
    pub fn is_complete(&self) -> bool {
        !self.api_key.trim().is_empty() && !self.api_secret.trim().is_empty()
    }
}

/// Construction-time configuration for one carrier adapter.
///
/// Missing credentials never crash the process: the adapter logs a warning
/// and serves clearly-marked placeholder data instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarrierConfig {
    #[serde(default)]
    pub sandbox: bool,
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl CarrierConfig {
    pub fn sandbox_with(credentials: Credentials) -> Self {
        Self {
            sandbox: true,
            credentials,
            base_url: None,
        }
    }
}

/// Rate aggregation policy: which carriers to fan out to, the business
/// margin, and the per-carrier quote deadline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    pub active_carriers: Vec<CarrierId>,
    pub margin_multiplier: f64,
    #[serde(default = "default_quote_timeout_ms")]
    pub quote_timeout_ms: u64,
}

impl AggregatorConfig {
    pub fn new(
        active_carriers: Vec<CarrierId>,
        margin_multiplier: f64,
    ) -> Result<Self, ValidationError> {
        if !margin_multiplier.is_finite() || margin_multiplier < 1.0 {
            return Err(ValidationError::InvalidMarginMultiplier {
                value: margin_multiplier,
            });
        }
        Ok(Self {
            active_carriers,
            margin_multiplier,
            quote_timeout_ms: default_quote_timeout_ms(),
        })
    }

    pub fn with_quote_timeout(mut self, timeout: Duration) -> Self {
        self.quote_timeout_ms = timeout.as_millis().min(u128::from(u64::MAX)) as u64;
        self
    }

    pub fn quote_timeout(&self) -> Duration {
        Duration::from_millis(self.quote_timeout_ms)
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            active_carriers: CarrierId::ALL.to_vec(),
            // 15% markup.
            margin_multiplier: 1.15,
            quote_timeout_ms: default_quote_timeout_ms(),
        }
    }
}

const fn default_quote_timeout_ms() -> u64 {
    15_000
}
