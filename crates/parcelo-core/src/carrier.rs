//! Carrier adapter contract and request/response types.
//!
//! This module defines the polymorphic capability (`CarrierService`) that all
//! carrier integrations implement, along with the unified request types and
//! the carrier error taxonomy.
//!
//! # Operations
//!
//! | Operation | Request | Response | Notes |
//! |-----------|---------|----------|-------|
//! | Rates | [`RateRequest`] | `Vec<CarrierRate>` | empty vec = no offers, not an error |
//! | Create shipment | [`ShipmentRequest`] | [`ShipmentResult`] | errors propagate to the caller |
//! | Tracking | tracking number | [`TrackingInfo`] | `NotFound` when unknown |
//! | Cancel | tracking number | `bool` | `false` = declined, `NotSupported` = no API |
//! | Validate address | [`Address`] | `Option<Address>` | `None` = cannot validate |

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::registry::CarrierId;
use crate::{Address, CarrierRate, Package, ShipmentResult, TrackingInfo, ValidationError};

/// Carrier operation used for capability checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Rates,
    Shipments,
    Tracking,
    Cancellation,
    AddressValidation,
}

impl Operation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rates => "rates",
            Self::Shipments => "shipments",
            Self::Tracking => "tracking",
            Self::Cancellation => "cancellation",
            Self::AddressValidation => "address_validation",
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported operation matrix for a carrier adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    pub rates: bool,
    pub shipments: bool,
    pub tracking: bool,
    pub cancellation: bool,
    pub address_validation: bool,
}

impl CapabilitySet {
    pub const fn new(
        rates: bool,
        shipments: bool,
        tracking: bool,
        cancellation: bool,
        address_validation: bool,
    ) -> Self {
        Self {
            rates,
            shipments,
            tracking,
            cancellation,
            address_validation,
        }
    }

    pub const fn full() -> Self {
        Self::new(true, true, true, true, true)
    }

    /// Rates, shipments and tracking only.
    pub const fn core() -> Self {
        Self::new(true, true, true, false, false)
    }

    pub const fn supports(self, operation: Operation) -> bool {
        match operation {
            Operation::Rates => self.rates,
            Operation::Shipments => self.shipments,
            Operation::Tracking => self.tracking,
            Operation::Cancellation => self.cancellation,
            Operation::AddressValidation => self.address_validation,
        }
    }
}

/// Carrier-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarrierErrorKind {
    /// Transient network/auth failure. Retryable.
    Unavailable,
    /// Carrier-side validation failure. Not retryable; carries the
    /// carrier's own message.
    Rejected,
    /// Unknown tracking number.
    NotFound,
    /// The carrier lacks this capability entirely.
    NotSupported,
    /// Malformed request caught before dispatch.
    InvalidRequest,
    /// Fault isolator exhausted its retry budget.
    ServiceUnavailable,
    Internal,
}

/// Structured carrier error used across adapters and the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarrierError {
    kind: CarrierErrorKind,
    message: String,
    retryable: bool,
}

impl CarrierError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: CarrierErrorKind::Unavailable,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            kind: CarrierErrorKind::Rejected,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: CarrierErrorKind::NotFound,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn not_supported(operation: Operation, carrier: CarrierId) -> Self {
        Self {
            kind: CarrierErrorKind::NotSupported,
            message: format!("{carrier} does not support {operation}"),
            retryable: false,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            kind: CarrierErrorKind::InvalidRequest,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: CarrierErrorKind::ServiceUnavailable,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: CarrierErrorKind::Internal,
            message: message.into(),
            retryable: false,
        }
    }

    pub const fn kind(&self) -> CarrierErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            CarrierErrorKind::Unavailable => "carrier.unavailable",
            CarrierErrorKind::Rejected => "carrier.rejected",
            CarrierErrorKind::NotFound => "carrier.not_found",
            CarrierErrorKind::NotSupported => "carrier.not_supported",
            CarrierErrorKind::InvalidRequest => "carrier.invalid_request",
            CarrierErrorKind::ServiceUnavailable => "carrier.service_unavailable",
            CarrierErrorKind::Internal => "carrier.internal",
        }
    }
}

impl Display for CarrierError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for CarrierError {}

impl From<ValidationError> for CarrierError {
    fn from(error: ValidationError) -> Self {
        Self::invalid_request(error.to_string())
    }
}

/// Request payload for rate quoting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateRequest {
    pub origin: Address,
    pub destination: Address,
    pub packages: Vec<Package>,
}

impl RateRequest {
    pub fn new(
        origin: Address,
        destination: Address,
        packages: Vec<Package>,
    ) -> Result<Self, ValidationError> {
        if packages.is_empty() {
            return Err(ValidationError::EmptyPackages);
        }
        Ok(Self {
            origin,
            destination,
            packages,
        })
    }

    /// Total shipment weight in kilograms across all packages.
    pub fn total_weight_kg(&self) -> f64 {
        self.packages.iter().map(Package::weight_kg).sum()
    }
}

/// Request payload for shipment creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentRequest {
    pub origin: Address,
    pub destination: Address,
    pub packages: Vec<Package>,
    /// Service code selected from a previously quoted rate.
    pub service: String,
    /// Caller-supplied stable reference. The core does not deduplicate;
    /// idempotency is the caller's concern and requires a stable value here.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl ShipmentRequest {
    pub fn new(
        origin: Address,
        destination: Address,
        packages: Vec<Package>,
        service: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        if packages.is_empty() {
            return Err(ValidationError::EmptyPackages);
        }
        let service = service.into();
        if service.trim().is_empty() {
            return Err(ValidationError::EmptyServiceCode);
        }
        Ok(Self {
            origin,
            destination,
            packages,
            service,
            reference: None,
            instructions: None,
        })
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }
}

type CarrierFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CarrierError>> + Send + 'a>>;

/// Carrier adapter contract.
///
/// One implementation per carrier; all implementations interchangeable
/// behind the trait. Each adapter independently owns its auth/token state.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; adapters are shared via `Arc`
/// between concurrent aggregation calls.
pub trait CarrierService: Send + Sync {
    /// Returns the canonical carrier identifier.
    fn id(&self) -> CarrierId;

    /// Returns the set of supported operations.
    fn capabilities(&self) -> CapabilitySet;

    /// Fetches available rates for a shipment.
    ///
    /// An empty vec means the carrier has no applicable service; callers
    /// must distinguish that from a failed carrier, which surfaces as
    /// [`CarrierErrorKind::Unavailable`].
    fn get_rates<'a>(&'a self, req: RateRequest) -> CarrierFuture<'a, Vec<CarrierRate>>;

    /// Creates a shipment and returns the tracking number and label.
    ///
    /// # Errors
    ///
    /// [`CarrierErrorKind::Rejected`] on carrier-side validation failure,
    /// [`CarrierErrorKind::Unavailable`] on transient failure.
    fn create_shipment<'a>(&'a self, req: ShipmentRequest) -> CarrierFuture<'a, ShipmentResult>;

    /// Fetches tracking history for a shipment.
    ///
    /// # Errors
    ///
    /// [`CarrierErrorKind::NotFound`] when the carrier has no record.
    fn get_tracking<'a>(&'a self, tracking_number: String) -> CarrierFuture<'a, TrackingInfo>;

    /// Requests cancellation. `Ok(false)` means the carrier declined
    /// (e.g. already in transit); [`CarrierErrorKind::NotSupported`] means
    /// the carrier offers no cancellation API at all.
    fn cancel_shipment<'a>(&'a self, tracking_number: String) -> CarrierFuture<'a, bool>;

    /// Validates an address with the carrier. `Ok(None)` signals "cannot
    /// validate", never "invalid".
    fn validate_address<'a>(&'a self, address: Address) -> CarrierFuture<'a, Option<Address>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DimensionUnit, WeightUnit};

    fn address() -> Address {
        Address::new("Av. Reforma 123", "CDMX", "CMX", "06600", "MX").expect("valid address")
    }

    fn package() -> Package {
        Package::new(2.5, WeightUnit::Kg, 30.0, 20.0, 10.0, DimensionUnit::Cm)
            .expect("valid package")
    }

    #[test]
    fn rate_request_rejects_empty_packages() {
        let err = RateRequest::new(address(), address(), vec![]).expect_err("must fail");
        assert!(matches!(err, ValidationError::EmptyPackages));
    }

    #[test]
    fn shipment_request_rejects_blank_service() {
        let err = ShipmentRequest::new(address(), address(), vec![package()], "  ")
            .expect_err("must fail");
        assert!(matches!(err, ValidationError::EmptyServiceCode));
    }

    #[test]
    fn total_weight_sums_in_kilograms() {
        let packages = vec![
            package(),
            Package::new(10.0, WeightUnit::Lb, 10.0, 10.0, 10.0, DimensionUnit::In)
                .expect("valid package"),
        ];
        let request = RateRequest::new(address(), address(), packages).expect("valid request");
        assert!((request.total_weight_kg() - (2.5 + 4.535_92)).abs() < 1e-6);
    }

    #[test]
    fn capability_set_reports_operations() {
        let capabilities = CapabilitySet::core();
        assert!(capabilities.supports(Operation::Rates));
        assert!(capabilities.supports(Operation::Tracking));
        assert!(!capabilities.supports(Operation::Cancellation));
        assert!(!capabilities.supports(Operation::AddressValidation));
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(CarrierError::unavailable("x").code(), "carrier.unavailable");
        assert_eq!(CarrierError::rejected("x").code(), "carrier.rejected");
        assert_eq!(
            CarrierError::service_unavailable("x").code(),
            "carrier.service_unavailable"
        );
        assert!(CarrierError::unavailable("x").retryable());
        assert!(!CarrierError::rejected("x").retryable());
    }
}
