use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parcelo_core::{
    Address, AggregatorConfig, CapabilitySet, CarrierError, CarrierErrorKind, CarrierId,
    CarrierRate, CarrierRegistry, CarrierService, DimensionUnit, Package, RateAggregator,
    RateRequest, ShipmentRequest, ShipmentResult, TrackingInfo, WeightUnit,
};

/// Scripted carrier for aggregation behavior tests: returns a fixed quote
/// outcome, optionally after a delay, and counts rate calls.
struct ScriptedCarrier {
    id: CarrierId,
    outcome: Result<Vec<CarrierRate>, CarrierError>,
    delay: Option<Duration>,
    rate_calls: AtomicU32,
}

impl ScriptedCarrier {
    fn quoting(id: CarrierId, rates: Vec<CarrierRate>) -> Self {
        Self {
            id,
            outcome: Ok(rates),
            delay: None,
            rate_calls: AtomicU32::new(0),
        }
    }

    fn failing(id: CarrierId, error: CarrierError) -> Self {
        Self {
            id,
            outcome: Err(error),
            delay: None,
            rate_calls: AtomicU32::new(0),
        }
    }

    fn slow(id: CarrierId, rates: Vec<CarrierRate>, delay: Duration) -> Self {
        Self {
            id,
            outcome: Ok(rates),
            delay: Some(delay),
            rate_calls: AtomicU32::new(0),
        }
    }

    fn rate_calls(&self) -> u32 {
        self.rate_calls.load(Ordering::SeqCst)
    }
}

impl CarrierService for ScriptedCarrier {
    fn id(&self) -> CarrierId {
        self.id
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::core()
    }

    fn get_rates<'a>(
        &'a self,
        _req: RateRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<CarrierRate>, CarrierError>> + Send + 'a>> {
        self.rate_calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self.outcome.clone();
        let delay = self.delay;
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            outcome
        })
    }

    fn create_shipment<'a>(
        &'a self,
        _req: ShipmentRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ShipmentResult, CarrierError>> + Send + 'a>> {
        Box::pin(async move { Err(CarrierError::internal("not scripted")) })
    }

    fn get_tracking<'a>(
        &'a self,
        _tracking_number: String,
    ) -> Pin<Box<dyn Future<Output = Result<TrackingInfo, CarrierError>> + Send + 'a>> {
        Box::pin(async move { Err(CarrierError::internal("not scripted")) })
    }

    fn cancel_shipment<'a>(
        &'a self,
        _tracking_number: String,
    ) -> Pin<Box<dyn Future<Output = Result<bool, CarrierError>> + Send + 'a>> {
        Box::pin(async move { Err(CarrierError::internal("not scripted")) })
    }

    fn validate_address<'a>(
        &'a self,
        _address: Address,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Address>, CarrierError>> + Send + 'a>> {
        Box::pin(async move { Ok(None) })
    }
}

fn rate(carrier: CarrierId, price: f64, days: u32) -> CarrierRate {
    CarrierRate::new(carrier, "SVC", "Service", price, "MXN", days).expect("valid rate")
}

fn request() -> RateRequest {
    let origin =
        Address::new("Av. Reforma 123", "CDMX", "CMX", "06600", "MX").expect("valid address");
    let destination =
        Address::new("Calle 60 45", "Merida", "YUC", "97000", "MX").expect("valid address");
    let package = Package::new(2.0, WeightUnit::Kg, 30.0, 20.0, 10.0, DimensionUnit::Cm)
        .expect("valid package");
    RateRequest::new(origin, destination, vec![package]).expect("valid request")
}

fn aggregator_over(
    adapters: Vec<Arc<dyn CarrierService>>,
    active: Vec<CarrierId>,
    margin: f64,
) -> RateAggregator {
    let registry = Arc::new(CarrierRegistry::new(adapters));
    let config = AggregatorConfig::new(active, margin)
        .expect("valid config")
        .with_quote_timeout(Duration::from_secs(5));
    RateAggregator::new(registry, config)
}

#[tokio::test]
async fn one_failing_carrier_does_not_poison_the_sheet() {
    let dhl = Arc::new(ScriptedCarrier::quoting(
        CarrierId::Dhl,
        vec![rate(CarrierId::Dhl, 100.0, 2)],
    ));
    let ups = Arc::new(ScriptedCarrier::quoting(
        CarrierId::Ups,
        vec![rate(CarrierId::Ups, 90.0, 4)],
    ));
    let fedex = Arc::new(ScriptedCarrier::failing(
        CarrierId::Fedex,
        CarrierError::rejected("account suspended"),
    ));

    let aggregator = aggregator_over(
        vec![dhl, ups, fedex],
        vec![CarrierId::Dhl, CarrierId::Fedex, CarrierId::Ups],
        1.15,
    );

    let sheet = aggregator.get_rates(request()).await;

    assert_eq!(sheet.quotes.len(), 2);
    assert!(sheet.is_degraded());
    assert_eq!(sheet.failures.len(), 1);
    assert_eq!(sheet.failures[0].carrier, CarrierId::Fedex);
}

#[tokio::test]
async fn all_carriers_failing_yields_empty_quotes_not_an_error() {
    let dhl = Arc::new(ScriptedCarrier::failing(
        CarrierId::Dhl,
        CarrierError::rejected("bad postal code"),
    ));
    let ups = Arc::new(ScriptedCarrier::failing(
        CarrierId::Ups,
        CarrierError::rejected("bad postal code"),
    ));

    let aggregator = aggregator_over(
        vec![dhl, ups],
        vec![CarrierId::Dhl, CarrierId::Ups],
        1.15,
    );

    let sheet = aggregator.get_rates(request()).await;
    assert!(sheet.quotes.is_empty());
    assert_eq!(sheet.failures.len(), 2);
}

#[tokio::test]
async fn margin_is_applied_exactly_once() {
    let dhl = Arc::new(ScriptedCarrier::quoting(
        CarrierId::Dhl,
        vec![rate(CarrierId::Dhl, 100.0, 2)],
    ));

    let aggregator = aggregator_over(vec![dhl], vec![CarrierId::Dhl], 1.15);

    let sheet = aggregator.get_rates(request()).await;
    assert_eq!(sheet.quotes.len(), 1);
    assert_eq!(sheet.quotes[0].price, 115.0);
}

#[tokio::test]
async fn sheet_is_sorted_by_price_then_days_then_carrier() {
    let dhl = Arc::new(ScriptedCarrier::quoting(
        CarrierId::Dhl,
        vec![rate(CarrierId::Dhl, 200.0, 1)],
    ));
    let ups = Arc::new(ScriptedCarrier::quoting(
        CarrierId::Ups,
        vec![rate(CarrierId::Ups, 100.0, 3)],
    ));
    let estafeta = Arc::new(ScriptedCarrier::quoting(
        CarrierId::Estafeta,
        vec![rate(CarrierId::Estafeta, 100.0, 3)],
    ));

    let aggregator = aggregator_over(
        vec![dhl, ups, estafeta],
        vec![CarrierId::Dhl, CarrierId::Ups, CarrierId::Estafeta],
        1.0,
    );

    let sheet = aggregator.get_rates(request()).await;
    let order = sheet
        .quotes
        .iter()
        .map(|quote| quote.carrier)
        .collect::<Vec<_>>();
    // Equal price and days tie-break on carrier id: "estafeta" < "ups".
    assert_eq!(order, vec![CarrierId::Estafeta, CarrierId::Ups, CarrierId::Dhl]);
}

#[tokio::test]
async fn carrier_with_no_offers_contributes_nothing_and_no_failure() {
    let dhl = Arc::new(ScriptedCarrier::quoting(CarrierId::Dhl, vec![]));

    let aggregator = aggregator_over(vec![dhl], vec![CarrierId::Dhl], 1.15);

    let sheet = aggregator.get_rates(request()).await;
    assert!(sheet.quotes.is_empty());
    assert!(sheet.failures.is_empty());
}

#[tokio::test]
async fn slow_carrier_times_out_and_is_recorded_as_failure() {
    let slow = Arc::new(ScriptedCarrier::slow(
        CarrierId::Fedex,
        vec![rate(CarrierId::Fedex, 100.0, 3)],
        Duration::from_secs(5),
    ));
    let fast = Arc::new(ScriptedCarrier::quoting(
        CarrierId::Dhl,
        vec![rate(CarrierId::Dhl, 120.0, 2)],
    ));

    let registry = Arc::new(CarrierRegistry::new(vec![
        slow as Arc<dyn CarrierService>,
        fast,
    ]));
    let config = AggregatorConfig::new(vec![CarrierId::Dhl, CarrierId::Fedex], 1.0)
        .expect("valid config")
        .with_quote_timeout(Duration::from_millis(50));
    let aggregator = RateAggregator::new(registry, config);

    let sheet = aggregator.get_rates(request()).await;

    assert_eq!(sheet.quotes.len(), 1);
    assert_eq!(sheet.quotes[0].carrier, CarrierId::Dhl);
    assert_eq!(sheet.failures.len(), 1);
    assert_eq!(sheet.failures[0].carrier, CarrierId::Fedex);
    assert_eq!(
        sheet.failures[0].error.kind(),
        CarrierErrorKind::Unavailable
    );
}

#[tokio::test]
async fn retryable_failures_exhaust_the_isolator_budget() {
    let flaky = Arc::new(ScriptedCarrier::failing(
        CarrierId::Ups,
        CarrierError::unavailable("connection reset"),
    ));

    let aggregator = aggregator_over(vec![flaky.clone()], vec![CarrierId::Ups], 1.15);

    let sheet = aggregator.get_rates(request()).await;

    assert!(sheet.quotes.is_empty());
    assert_eq!(sheet.failures.len(), 1);
    assert_eq!(
        sheet.failures[0].error.kind(),
        CarrierErrorKind::ServiceUnavailable
    );
    // Default isolator budget is three attempts.
    assert_eq!(flaky.rate_calls(), 3);
}

#[tokio::test]
async fn non_retryable_failures_are_not_retried() {
    let rejected = Arc::new(ScriptedCarrier::failing(
        CarrierId::Dhl,
        CarrierError::rejected("invalid destination"),
    ));

    let aggregator = aggregator_over(vec![rejected.clone()], vec![CarrierId::Dhl], 1.15);

    let sheet = aggregator.get_rates(request()).await;
    assert_eq!(sheet.failures.len(), 1);
    assert_eq!(sheet.failures[0].error.kind(), CarrierErrorKind::Rejected);
    assert_eq!(rejected.rate_calls(), 1);
}
