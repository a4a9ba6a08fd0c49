//! Core carrier orchestration for parcelo.
//!
//! This crate contains:
//! - Canonical shipping domain models and validation
//! - The uniform carrier adapter contract and error taxonomy
//! - Per-carrier adapters (DHL, FedEx, UPS, Estafeta)
//! - Fault isolation (circuit breaker + bounded retry)
//! - Concurrent rate aggregation with the business margin
//! - Priority-ordered shipping automation rules

pub mod adapters;
pub mod aggregator;
pub mod auth;
pub mod carrier;
pub mod circuit_breaker;
pub mod config;
pub mod domain;
pub mod error;
pub mod http_client;
pub mod registry;
pub mod retry;
pub mod rules;

pub use adapters::{DhlAdapter, EstafetaAdapter, FedexAdapter, UpsAdapter};
pub use aggregator::{CarrierFailure, RateAggregator, RateSheet};
pub use auth::TokenCache;
pub use carrier::{
    CapabilitySet, CarrierError, CarrierErrorKind, CarrierService, Operation, RateRequest,
    ShipmentRequest,
};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, FaultIsolator, FaultIsolatorConfig,
};
pub use config::{AggregatorConfig, CarrierConfig, Credentials};
pub use domain::{
    Address, CarrierRate, DimensionUnit, Package, ShipmentResult, ShipmentStatus, TrackingEvent,
    TrackingInfo, UtcDateTime, WeightUnit,
};
pub use error::{CoreError, ValidationError};
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, NoopHttpClient,
    ReqwestHttpClient,
};
pub use registry::{CarrierId, CarrierRegistry, CarrierRegistryBuilder};
pub use retry::Backoff;
pub use rules::{AutomationRule, RuleAction, RuleConditions, RuleEngine, ShipmentProfile};
