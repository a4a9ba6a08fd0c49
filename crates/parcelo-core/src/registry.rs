//! Carrier identifiers, the adapter registry and its builder.

use std::collections::HashMap;
use std::env;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::adapters::{DhlAdapter, EstafetaAdapter, FedexAdapter, UpsAdapter};
use crate::carrier::CarrierService;
use crate::config::{CarrierConfig, Credentials};
use crate::http_client::ReqwestHttpClient;
use crate::ValidationError;

/// Canonical carrier identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CarrierId {
    Dhl,
    Fedex,
    Ups,
    Estafeta,
}

impl CarrierId {
    pub const ALL: [Self; 4] = [Self::Dhl, Self::Fedex, Self::Ups, Self::Estafeta];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dhl => "dhl",
            Self::Fedex => "fedex",
            Self::Ups => "ups",
            Self::Estafeta => "estafeta",
        }
    }

    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Dhl => "DHL",
            Self::Fedex => "FedEx",
            Self::Ups => "UPS",
            Self::Estafeta => "Estafeta",
        }
    }
}

impl Display for CarrierId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CarrierId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dhl" => Ok(Self::Dhl),
            "fedex" => Ok(Self::Fedex),
            "ups" => Ok(Self::Ups),
            "estafeta" => Ok(Self::Estafeta),
            other => Err(ValidationError::InvalidCarrier {
                value: other.to_owned(),
            }),
        }
    }
}

/// Adapter registry: resolves a carrier id to its adapter instance.
pub struct CarrierRegistry {
    adapters: HashMap<CarrierId, Arc<dyn CarrierService>>,
}

impl CarrierRegistry {
    pub fn new(adapters: Vec<Arc<dyn CarrierService>>) -> Self {
        let adapters = adapters
            .into_iter()
            .map(|adapter| (adapter.id(), adapter))
            .collect();
        Self { adapters }
    }

    pub fn get(&self, carrier: CarrierId) -> Option<Arc<dyn CarrierService>> {
        self.adapters.get(&carrier).cloned()
    }

    pub fn contains(&self, carrier: CarrierId) -> bool {
        self.adapters.contains_key(&carrier)
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Registered carrier ids in deterministic (declaration) order.
    pub fn ids(&self) -> Vec<CarrierId> {
        CarrierId::ALL
            .into_iter()
            .filter(|carrier| self.adapters.contains_key(carrier))
            .collect()
    }
}

impl Default for CarrierRegistry {
    fn default() -> Self {
        Self::new(vec![
            Arc::new(DhlAdapter::new(CarrierConfig::default())),
            Arc::new(FedexAdapter::new(CarrierConfig::default())),
            Arc::new(UpsAdapter::new(CarrierConfig::default())),
            Arc::new(EstafetaAdapter::new(CarrierConfig::default())),
        ])
    }
}

/// Builder for a [`CarrierRegistry`] with real HTTP transports.
///
/// Reads carrier credentials from environment variables; a carrier without
/// complete credentials is still registered but serves placeholder data.
///
/// # Environment Variables
///
/// | Carrier | Key | Secret | Account |
/// |---------|-----|--------|---------|
/// | DHL | `PARCELO_DHL_API_KEY` | `PARCELO_DHL_API_SECRET` | `PARCELO_DHL_ACCOUNT` |
/// | FedEx | `PARCELO_FEDEX_API_KEY` | `PARCELO_FEDEX_API_SECRET` | `PARCELO_FEDEX_ACCOUNT` |
/// | UPS | `PARCELO_UPS_API_KEY` | `PARCELO_UPS_API_SECRET` | `PARCELO_UPS_ACCOUNT` |
/// | Estafeta | `PARCELO_ESTAFETA_API_KEY` | `PARCELO_ESTAFETA_API_SECRET` | - |
#[derive(Debug, Default)]
pub struct CarrierRegistryBuilder {
    use_mock: bool,
    sandbox: bool,
    configs: HashMap<CarrierId, CarrierConfig>,
    disabled: Vec<CarrierId>,
}

impl CarrierRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// All adapters use the no-op transport with deterministic data.
    pub fn with_mock_mode(mut self) -> Self {
        self.use_mock = true;
        self
    }

    /// Use each carrier's sandbox endpoints.
    pub fn with_sandbox(mut self) -> Self {
        self.sandbox = true;
        self
    }

    /// Reads credentials for every carrier from environment variables.
    pub fn with_env_credentials(mut self) -> Self {
        for carrier in CarrierId::ALL {
            let prefix = format!("PARCELO_{}", carrier.as_str().to_ascii_uppercase());
            let api_key = env::var(format!("{prefix}_API_KEY")).unwrap_or_default();
            let api_secret = env::var(format!("{prefix}_API_SECRET")).unwrap_or_default();
            let mut credentials = Credentials::new(api_key, api_secret);
            if let Ok(account) = env::var(format!("{prefix}_ACCOUNT")) {
                credentials = credentials.with_account_number(account);
            }

            self.configs.insert(
                carrier,
                CarrierConfig {
                    sandbox: self.sandbox,
                    credentials,
                    base_url: None,
                },
            );
        }
        self
    }

    /// Explicit configuration for one carrier, overriding env credentials.
    pub fn with_config(mut self, carrier: CarrierId, config: CarrierConfig) -> Self {
        self.configs.insert(carrier, config);
        self
    }

    pub fn without_carrier(mut self, carrier: CarrierId) -> Self {
        self.disabled.push(carrier);
        self
    }

    pub fn build(self) -> CarrierRegistry {
        let mut adapters: Vec<Arc<dyn CarrierService>> = Vec::new();

        for carrier in CarrierId::ALL {
            if self.disabled.contains(&carrier) {
                continue;
            }

            let mut config = self.configs.get(&carrier).cloned().unwrap_or_default();
            config.sandbox = config.sandbox || self.sandbox;

            if !self.use_mock && !config.credentials.is_complete() {
                warn!(carrier = carrier.as_str(), "carrier credentials incomplete; adapter will serve placeholder data");
            }

            let adapter: Arc<dyn CarrierService> = if self.use_mock {
                match carrier {
                    CarrierId::Dhl => Arc::new(DhlAdapter::new(config)),
                    CarrierId::Fedex => Arc::new(FedexAdapter::new(config)),
                    CarrierId::Ups => Arc::new(UpsAdapter::new(config)),
                    CarrierId::Estafeta => Arc::new(EstafetaAdapter::new(config)),
                }
            } else {
                let http_client = Arc::new(ReqwestHttpClient::new());
                match carrier {
                    CarrierId::Dhl => Arc::new(DhlAdapter::with_http_client(config, http_client)),
                    CarrierId::Fedex => {
                        Arc::new(FedexAdapter::with_http_client(config, http_client))
                    }
                    CarrierId::Ups => Arc::new(UpsAdapter::with_http_client(config, http_client)),
                    CarrierId::Estafeta => {
                        Arc::new(EstafetaAdapter::with_http_client(config, http_client))
                    }
                }
            };

            adapters.push(adapter);
        }

        CarrierRegistry::new(adapters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carrier_id_round_trips_through_strings() {
        for carrier in CarrierId::ALL {
            assert_eq!(carrier.as_str().parse::<CarrierId>().ok(), Some(carrier));
        }
        assert!("correos".parse::<CarrierId>().is_err());
    }

    #[test]
    fn default_registry_registers_all_carriers() {
        let registry = CarrierRegistry::default();
        assert_eq!(registry.len(), 4);
        for carrier in CarrierId::ALL {
            assert!(registry.contains(carrier));
        }
    }

    #[test]
    fn builder_skips_disabled_carriers() {
        let registry = CarrierRegistryBuilder::new()
            .with_mock_mode()
            .without_carrier(CarrierId::Ups)
            .build();

        assert_eq!(registry.len(), 3);
        assert!(!registry.contains(CarrierId::Ups));
        assert_eq!(
            registry.ids(),
            vec![CarrierId::Dhl, CarrierId::Fedex, CarrierId::Estafeta]
        );
    }
}
