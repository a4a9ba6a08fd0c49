use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::CarrierId;
use crate::{UtcDateTime, ValidationError};

/// Weight unit accepted on package input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightUnit {
    Kg,
    Lb,
}

/// Dimension unit accepted on package input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimensionUnit {
    Cm,
    In,
}

/// Postal address value object. No identity beyond structural equality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Address {
    pub fn new(
        street: impl Into<String>,
        city: impl Into<String>,
        state: impl Into<String>,
        postal_code: impl Into<String>,
        country: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let address = Self {
            street: street.into(),
            city: city.into(),
            state: state.into(),
            postal_code: postal_code.into(),
            country: country.into(),
            company: None,
            contact_name: None,
            phone: None,
            email: None,
        };
        address.validate()?;
        Ok(address)
    }

    pub fn with_contact(
        mut self,
        contact_name: impl Into<String>,
        phone: impl Into<String>,
    ) -> Self {
        self.contact_name = Some(contact_name.into());
        self.phone = Some(phone.into());
        self
    }

    fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [
            ("street", &self.street),
            ("city", &self.city),
            ("state", &self.state),
            ("postal_code", &self.postal_code),
            ("country", &self.country),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::EmptyAddressField { field });
            }
        }
        Ok(())
    }
}

/// Package weight, dimensions and optional declared value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub weight: f64,
    pub weight_unit: WeightUnit,
    pub length: f64,
    pub width: f64,
    pub height: f64,
    pub dimension_unit: DimensionUnit,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub declared_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Package {
    pub fn new(
        weight: f64,
        weight_unit: WeightUnit,
        length: f64,
        width: f64,
        height: f64,
        dimension_unit: DimensionUnit,
    ) -> Result<Self, ValidationError> {
        for (field, value) in [
            ("weight", weight),
            ("length", length),
            ("width", width),
            ("height", height),
        ] {
            if !value.is_finite() {
                return Err(ValidationError::NonFiniteValue { field });
            }
            if value <= 0.0 {
                return Err(ValidationError::NonPositiveValue { field });
            }
        }

        Ok(Self {
            weight,
            weight_unit,
            length,
            width,
            height,
            dimension_unit,
            declared_value: None,
            currency: None,
            description: None,
        })
    }

    pub fn with_declared_value(mut self, value: f64, currency: impl AsRef<str>) -> Result<Self, ValidationError> {
        if !value.is_finite() {
            return Err(ValidationError::NonFiniteValue {
                field: "declared_value",
            });
        }
        if value < 0.0 {
            return Err(ValidationError::NegativeValue {
                field: "declared_value",
            });
        }
        self.declared_value = Some(value);
        self.currency = Some(validate_currency_code(currency.as_ref())?);
        Ok(self)
    }

    /// Weight in kilograms regardless of the input unit.
    pub fn weight_kg(&self) -> f64 {
        match self.weight_unit {
            WeightUnit::Kg => self.weight,
            WeightUnit::Lb => self.weight * 0.453_592,
        }
    }

    /// Dimensions in centimeters regardless of the input unit.
    pub fn dimensions_cm(&self) -> (f64, f64, f64) {
        match self.dimension_unit {
            DimensionUnit::Cm => (self.length, self.width, self.height),
            DimensionUnit::In => (self.length * 2.54, self.width * 2.54, self.height * 2.54),
        }
    }
}

/// A priced, timed shipping offer for one service level of one carrier.
///
/// Produced fresh per quote request; never persisted by the core. When a
/// rate leaves the aggregator its price already includes the business
/// margin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarrierRate {
    pub carrier: CarrierId,
    pub carrier_name: String,
    pub service: String,
    pub service_name: String,
    pub price: f64,
    pub currency: String,
    pub estimated_days: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl CarrierRate {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        carrier: CarrierId,
        service: impl Into<String>,
        service_name: impl Into<String>,
        price: f64,
        currency: impl AsRef<str>,
        estimated_days: u32,
    ) -> Result<Self, ValidationError> {
        let service = service.into();
        if service.trim().is_empty() {
            return Err(ValidationError::EmptyServiceCode);
        }
        if !price.is_finite() {
            return Err(ValidationError::NonFiniteValue { field: "price" });
        }
        if price < 0.0 {
            return Err(ValidationError::NegativeValue { field: "price" });
        }

        Ok(Self {
            carrier,
            carrier_name: carrier.display_name().to_owned(),
            service,
            service_name: service_name.into(),
            price,
            currency: validate_currency_code(currency.as_ref())?,
            estimated_days,
            features: Vec::new(),
            metadata: None,
        })
    }

    pub fn with_features(mut self, features: Vec<String>) -> Self {
        self.features = features;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Result of a successful shipment creation with a carrier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentResult {
    pub tracking_number: String,
    /// URL or opaque blob reference (e.g. a base64 data URI) for the label.
    pub label_url: String,
    pub carrier: CarrierId,
    pub service: String,
    pub cost: f64,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_delivery: Option<UtcDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ShipmentResult {
    pub fn new(
        tracking_number: impl Into<String>,
        label_url: impl Into<String>,
        carrier: CarrierId,
        service: impl Into<String>,
        cost: f64,
        currency: impl AsRef<str>,
    ) -> Result<Self, ValidationError> {
        let tracking_number = tracking_number.into();
        if tracking_number.trim().is_empty() {
            return Err(ValidationError::EmptyTrackingNumber);
        }
        if !cost.is_finite() {
            return Err(ValidationError::NonFiniteValue { field: "cost" });
        }
        if cost < 0.0 {
            return Err(ValidationError::NegativeValue { field: "cost" });
        }

        Ok(Self {
            tracking_number,
            label_url: label_url.into(),
            carrier,
            service: service.into(),
            cost,
            currency: validate_currency_code(currency.as_ref())?,
            estimated_delivery: None,
            metadata: None,
        })
    }

    pub fn with_estimated_delivery(mut self, when: UtcDateTime) -> Self {
        self.estimated_delivery = Some(when);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Normalized shipment status vocabulary shared across carriers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentStatus {
    Pending,
    InTransit,
    OutForDelivery,
    Delivered,
    Returned,
    Cancelled,
    Exception,
    Unknown,
}

impl ShipmentStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InTransit => "in_transit",
            Self::OutForDelivery => "out_for_delivery",
            Self::Delivered => "delivered",
            Self::Returned => "returned",
            Self::Cancelled => "cancelled",
            Self::Exception => "exception",
            Self::Unknown => "unknown",
        }
    }
}

/// Single tracking scan. The carrier-native status code is kept next to
/// the normalized status for auditability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub timestamp: UtcDateTime,
    pub status: ShipmentStatus,
    pub status_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub description: String,
}

impl TrackingEvent {
    pub fn new(
        timestamp: UtcDateTime,
        status: ShipmentStatus,
        status_code: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            status,
            status_code: status_code.into(),
            location: None,
            description: description.into(),
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// Tracking history for one shipment. Events are always exposed in
/// ascending timestamp order, regardless of the carrier's native ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingInfo {
    pub tracking_number: String,
    pub carrier: CarrierId,
    pub status: ShipmentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_delivery: Option<UtcDateTime>,
    pub events: Vec<TrackingEvent>,
}

impl TrackingInfo {
    pub fn new(
        tracking_number: impl Into<String>,
        carrier: CarrierId,
        status: ShipmentStatus,
        mut events: Vec<TrackingEvent>,
    ) -> Result<Self, ValidationError> {
        let tracking_number = tracking_number.into();
        if tracking_number.trim().is_empty() {
            return Err(ValidationError::EmptyTrackingNumber);
        }

        events.sort_by_key(|event| event.timestamp);

        Ok(Self {
            tracking_number,
            carrier,
            status,
            estimated_delivery: None,
            events,
        })
    }

    pub fn with_estimated_delivery(mut self, when: UtcDateTime) -> Self {
        self.estimated_delivery = Some(when);
        self
    }
}

fn validate_currency_code(value: &str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    let valid = trimmed.len() == 3 && trimmed.chars().all(|ch| ch.is_ascii_uppercase());
    if !valid {
        return Err(ValidationError::InvalidCurrency {
            value: value.to_owned(),
        });
    }
    Ok(trimmed.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(input: &str) -> UtcDateTime {
        UtcDateTime::parse(input).expect("valid timestamp")
    }

    #[test]
    fn address_rejects_blank_fields() {
        let err = Address::new("", "CDMX", "CMX", "06600", "MX").expect_err("must fail");
        assert!(matches!(
            err,
            ValidationError::EmptyAddressField { field: "street" }
        ));
    }

    #[test]
    fn package_converts_pounds_and_inches_to_metric() {
        let package = Package::new(10.0, WeightUnit::Lb, 10.0, 5.0, 4.0, DimensionUnit::In)
            .expect("valid package");

        assert!((package.weight_kg() - 4.535_92).abs() < 1e-6);
        let (length, width, height) = package.dimensions_cm();
        assert!((length - 25.4).abs() < 1e-9);
        assert!((width - 12.7).abs() < 1e-9);
        assert!((height - 10.16).abs() < 1e-9);
    }

    #[test]
    fn package_rejects_non_positive_weight() {
        let err = Package::new(0.0, WeightUnit::Kg, 10.0, 10.0, 10.0, DimensionUnit::Cm)
            .expect_err("must fail");
        assert!(matches!(
            err,
            ValidationError::NonPositiveValue { field: "weight" }
        ));
    }

    #[test]
    fn rate_rejects_negative_price() {
        let err = CarrierRate::new(CarrierId::Dhl, "P", "Express Worldwide", -1.0, "MXN", 2)
            .expect_err("must fail");
        assert!(matches!(
            err,
            ValidationError::NegativeValue { field: "price" }
        ));
    }

    #[test]
    fn tracking_events_are_sorted_ascending_on_construction() {
        let events = vec![
            TrackingEvent::new(ts("2024-03-03T10:00:00Z"), ShipmentStatus::Delivered, "DL", "Delivered"),
            TrackingEvent::new(ts("2024-03-01T10:00:00Z"), ShipmentStatus::Pending, "PU", "Picked up"),
            TrackingEvent::new(ts("2024-03-02T10:00:00Z"), ShipmentStatus::InTransit, "IT", "In transit"),
        ];

        let info = TrackingInfo::new("ABC123", CarrierId::Fedex, ShipmentStatus::Delivered, events)
            .expect("valid tracking info");

        let stamps = info
            .events
            .iter()
            .map(|event| event.timestamp.format_rfc3339())
            .collect::<Vec<_>>();
        assert_eq!(
            stamps,
            vec![
                "2024-03-01T10:00:00Z",
                "2024-03-02T10:00:00Z",
                "2024-03-03T10:00:00Z"
            ]
        );
    }

    #[test]
    fn shipment_result_requires_tracking_number() {
        let err = ShipmentResult::new("  ", "https://labels.test/1.pdf", CarrierId::Ups, "ground", 120.0, "MXN")
            .expect_err("must fail");
        assert!(matches!(err, ValidationError::EmptyTrackingNumber));
    }
}
