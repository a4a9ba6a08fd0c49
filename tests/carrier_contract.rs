use std::sync::Arc;

use parcelo_core::{
    Address, CarrierConfig, CarrierErrorKind, CarrierId, CarrierRegistry, CarrierRegistryBuilder,
    CarrierService, DhlAdapter, DimensionUnit, EstafetaAdapter, FedexAdapter, Operation, Package,
    RateRequest, ShipmentRequest, ShipmentStatus, TrackingEvent, TrackingInfo, UpsAdapter,
    UtcDateTime, ValidationError, WeightUnit,
};

fn origin() -> Address {
    Address::new("Av. Reforma 123", "CDMX", "CMX", "06600", "MX").expect("valid address")
}

fn destination() -> Address {
    Address::new("Calle 60 45", "Merida", "YUC", "97000", "MX").expect("valid address")
}

fn package() -> Package {
    Package::new(2.5, WeightUnit::Kg, 30.0, 20.0, 10.0, DimensionUnit::Cm).expect("valid package")
}

fn all_adapters() -> Vec<Arc<dyn CarrierService>> {
    vec![
        Arc::new(DhlAdapter::new(CarrierConfig::default())),
        Arc::new(FedexAdapter::new(CarrierConfig::default())),
        Arc::new(UpsAdapter::new(CarrierConfig::default())),
        Arc::new(EstafetaAdapter::new(CarrierConfig::default())),
    ]
}

#[tokio::test]
async fn every_adapter_reports_its_own_id() {
    let expected = [
        CarrierId::Dhl,
        CarrierId::Fedex,
        CarrierId::Ups,
        CarrierId::Estafeta,
    ];
    for (adapter, expected) in all_adapters().into_iter().zip(expected) {
        assert_eq!(adapter.id(), expected);
    }
}

#[tokio::test]
async fn every_adapter_quotes_through_the_uniform_interface() {
    let request = RateRequest::new(origin(), destination(), vec![package()]).expect("valid request");

    for adapter in all_adapters() {
        let rates = adapter
            .get_rates(request.clone())
            .await
            .expect("offline adapters always quote");
        assert!(!rates.is_empty(), "{} returned no rates", adapter.id());
        for rate in &rates {
            assert_eq!(rate.carrier, adapter.id());
            assert!(rate.price > 0.0);
            assert!(!rate.service.is_empty());
        }
    }
}

#[tokio::test]
async fn only_estafeta_supports_cancellation() {
    for adapter in all_adapters() {
        let supports = adapter.capabilities().supports(Operation::Cancellation);
        assert_eq!(supports, adapter.id() == CarrierId::Estafeta);

        let result = adapter.cancel_shipment(String::from("TRACK123")).await;
        if adapter.id() == CarrierId::Estafeta {
            assert!(result.is_ok());
        } else {
            let error = result.expect_err("must be unsupported");
            assert_eq!(error.kind(), CarrierErrorKind::NotSupported);
        }
    }
}

#[tokio::test]
async fn address_validation_defaults_to_cannot_validate() {
    for adapter in all_adapters() {
        let validated = adapter
            .validate_address(origin())
            .await
            .expect("validation never errors offline");
        if adapter.id() == CarrierId::Estafeta {
            assert!(validated.is_some());
        } else {
            assert_eq!(validated, None);
        }
    }
}

#[tokio::test]
async fn shipment_creation_returns_tracking_number_and_label() {
    for adapter in all_adapters() {
        let request = ShipmentRequest::new(origin(), destination(), vec![package()], "SVC")
            .expect("valid request")
            .with_reference("order-42");

        let result = adapter
            .create_shipment(request)
            .await
            .expect("offline shipment creation succeeds");
        assert!(!result.tracking_number.is_empty());
        assert!(!result.label_url.is_empty());
        assert_eq!(result.carrier, adapter.id());
    }
}

#[test]
fn tracking_events_are_exposed_in_ascending_order() {
    let stamp = |input: &str| UtcDateTime::parse(input).expect("valid timestamp");
    let events = vec![
        TrackingEvent::new(
            stamp("2024-03-03T09:00:00Z"),
            ShipmentStatus::Delivered,
            "ENTREGADO",
            "Entregado",
        ),
        TrackingEvent::new(
            stamp("2024-03-01T09:00:00Z"),
            ShipmentStatus::Pending,
            "RECOLECTADO",
            "Recolectado",
        ),
        TrackingEvent::new(
            stamp("2024-03-02T09:00:00Z"),
            ShipmentStatus::InTransit,
            "EN_TRANSITO",
            "En transito",
        ),
    ];

    let info = TrackingInfo::new("EST0000000001", CarrierId::Estafeta, ShipmentStatus::Delivered, events)
        .expect("valid tracking info");

    let codes = info
        .events
        .iter()
        .map(|event| event.status_code.as_str())
        .collect::<Vec<_>>();
    assert_eq!(codes, vec!["RECOLECTADO", "EN_TRANSITO", "ENTREGADO"]);
}

#[test]
fn rate_request_requires_at_least_one_package() {
    let err = RateRequest::new(origin(), destination(), vec![]).expect_err("must fail");
    assert!(matches!(err, ValidationError::EmptyPackages));
}

#[test]
fn registry_builder_mock_mode_registers_requested_carriers() {
    let registry = CarrierRegistryBuilder::new()
        .with_mock_mode()
        .without_carrier(CarrierId::Fedex)
        .build();

    assert_eq!(registry.len(), 3);
    assert!(registry.get(CarrierId::Dhl).is_some());
    assert!(registry.get(CarrierId::Fedex).is_none());
}

#[test]
fn default_registry_covers_all_carriers() {
    let registry = CarrierRegistry::default();
    for carrier in CarrierId::ALL {
        let adapter = registry.get(carrier).expect("registered");
        assert_eq!(adapter.id(), carrier);
    }
}
