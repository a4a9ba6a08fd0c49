//! Concurrent rate aggregation across the active carriers.
//!
//! Every active carrier is dispatched on its own task and every task is
//! awaited; a failed or timed-out carrier contributes a recorded failure,
//! never an error for the whole aggregation. Raw carrier prices are never
//! exposed: the business margin is applied exactly once, here.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::carrier::{
    CarrierError, CarrierService, Operation, RateRequest, ShipmentRequest,
};
use crate::circuit_breaker::{FaultIsolator, FaultIsolatorConfig};
use crate::config::AggregatorConfig;
use crate::registry::{CarrierId, CarrierRegistry};
use crate::{Address, CarrierRate, ShipmentResult, TrackingInfo};

/// One carrier's failure during aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarrierFailure {
    pub carrier: CarrierId,
    pub error: CarrierError,
}

/// Aggregation outcome: the merged quote list plus per-carrier failures.
///
/// An empty quote list with no failures means no carrier had an applicable
/// service; an empty list with failures means every carrier was down.
#[derive(Debug, Clone, PartialEq)]
pub struct RateSheet {
    pub quotes: Vec<CarrierRate>,
    pub failures: Vec<CarrierFailure>,
}

impl RateSheet {
    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Fans rate requests out to the active carriers and brokers the remaining
/// single-carrier operations through the per-carrier fault isolators.
pub struct RateAggregator {
    registry: Arc<CarrierRegistry>,
    config: AggregatorConfig,
    isolators: HashMap<CarrierId, Arc<FaultIsolator>>,
}

impl RateAggregator {
    pub fn new(registry: Arc<CarrierRegistry>, config: AggregatorConfig) -> Self {
        let isolators = registry
            .ids()
            .into_iter()
            .map(|carrier| {
                (
                    carrier,
                    Arc::new(FaultIsolator::new(FaultIsolatorConfig::default())),
                )
            })
            .collect();
        Self {
            registry,
            config,
            isolators,
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn registry(&self) -> &CarrierRegistry {
        &self.registry
    }

    /// Collects quotes from every active registered carrier.
    ///
    /// Waits for all carriers to settle. Prices in the returned sheet
    /// include the configured margin, rounded to two decimals.
    pub async fn get_rates(&self, req: RateRequest) -> RateSheet {
        let mut handles = Vec::new();

        for carrier in &self.config.active_carriers {
            let Some(adapter) = self.registry.get(*carrier) else {
                warn!(carrier = carrier.as_str(), "active carrier is not registered; skipping");
                continue;
            };
            let Some(isolator) = self.isolators.get(carrier).cloned() else {
                continue;
            };

            let carrier = *carrier;
            let request = req.clone();
            let deadline = self.config.quote_timeout();

            handles.push((
                carrier,
                tokio::spawn(async move {
                    quote_one_carrier(carrier, adapter, isolator, request, deadline).await
                }),
            ));
        }

        let mut quotes = Vec::new();
        let mut failures = Vec::new();

        for (carrier, handle) in handles {
            match handle.await {
                Ok(Ok(rates)) => {
                    debug!(
                        carrier = carrier.as_str(),
                        count = rates.len(),
                        "carrier returned quotes"
                    );
                    quotes.extend(rates);
                }
                Ok(Err(error)) => {
                    warn!(
                        carrier = carrier.as_str(),
                        code = error.code(),
                        "carrier failed during aggregation: {}",
                        error.message()
                    );
                    failures.push(CarrierFailure { carrier, error });
                }
                Err(join_error) => {
                    let error = CarrierError::internal(format!(
                        "carrier task failed to settle: {join_error}"
                    ));
                    warn!(carrier = carrier.as_str(), "carrier task panicked or was cancelled");
                    failures.push(CarrierFailure { carrier, error });
                }
            }
        }

        for quote in &mut quotes {
            quote.price = apply_margin(quote.price, self.config.margin_multiplier);
        }
        sort_quotes(&mut quotes);

        RateSheet { quotes, failures }
    }

    /// Creates a shipment with one carrier through its fault isolator.
    pub async fn create_shipment(
        &self,
        carrier: CarrierId,
        req: ShipmentRequest,
    ) -> Result<ShipmentResult, CarrierError> {
        let adapter = self.adapter(carrier, Operation::Shipments)?;
        let isolator = self.isolator(carrier)?;
        isolator
            .execute(|| adapter.create_shipment(req.clone()))
            .await
    }

    pub async fn get_tracking(
        &self,
        carrier: CarrierId,
        tracking_number: String,
    ) -> Result<TrackingInfo, CarrierError> {
        let adapter = self.adapter(carrier, Operation::Tracking)?;
        let isolator = self.isolator(carrier)?;
        isolator
            .execute(|| adapter.get_tracking(tracking_number.clone()))
            .await
    }

    pub async fn cancel_shipment(
        &self,
        carrier: CarrierId,
        tracking_number: String,
    ) -> Result<bool, CarrierError> {
        let adapter = self.adapter(carrier, Operation::Cancellation)?;
        let isolator = self.isolator(carrier)?;
        isolator
            .execute(|| adapter.cancel_shipment(tracking_number.clone()))
            .await
    }

    pub async fn validate_address(
        &self,
        carrier: CarrierId,
        address: Address,
    ) -> Result<Option<Address>, CarrierError> {
        let adapter = self.adapter(carrier, Operation::AddressValidation)?;
        let isolator = self.isolator(carrier)?;
        isolator
            .execute(|| adapter.validate_address(address.clone()))
            .await
    }

    fn adapter(
        &self,
        carrier: CarrierId,
        operation: Operation,
    ) -> Result<Arc<dyn CarrierService>, CarrierError> {
        let adapter = self.registry.get(carrier).ok_or_else(|| {
            CarrierError::invalid_request(format!("carrier {carrier} is not registered"))
        })?;
        if !adapter.capabilities().supports(operation) {
            return Err(CarrierError::not_supported(operation, carrier));
        }
        Ok(adapter)
    }

    fn isolator(&self, carrier: CarrierId) -> Result<Arc<FaultIsolator>, CarrierError> {
        self.isolators.get(&carrier).cloned().ok_or_else(|| {
            CarrierError::invalid_request(format!("carrier {carrier} is not registered"))
        })
    }
}

async fn quote_one_carrier(
    carrier: CarrierId,
    adapter: Arc<dyn CarrierService>,
    isolator: Arc<FaultIsolator>,
    request: RateRequest,
    deadline: std::time::Duration,
) -> Result<Vec<CarrierRate>, CarrierError> {
    let attempt = isolator.execute(|| adapter.get_rates(request.clone()));
    match tokio::time::timeout(deadline, attempt).await {
        Ok(result) => result,
        Err(_) => Err(CarrierError::unavailable(format!(
            "{carrier} did not answer within {} ms",
            deadline.as_millis()
        ))),
    }
}

/// Marks up a raw carrier price and rounds to two decimals.
fn apply_margin(raw: f64, multiplier: f64) -> f64 {
    (raw * multiplier * 100.0).round() / 100.0
}

/// Price ascending, then estimated days ascending, then carrier id.
fn sort_quotes(quotes: &mut [CarrierRate]) {
    quotes.sort_by(|a, b| {
        a.price
            .partial_cmp(&b.price)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.estimated_days.cmp(&b.estimated_days))
            .then_with(|| a.carrier.as_str().cmp(b.carrier.as_str()))
    });
}
