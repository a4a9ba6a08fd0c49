//! DHL Express (MyDHL API) adapter.
//!
//! Authenticates with HTTP Basic credentials and tags every call with a
//! unique `Message-Reference` header. Cancellation and address validation
//! are not offered by this API surface.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::{decode_error, placeholder_metadata, postal_seed, transport_error, upstream_error};
use crate::carrier::{
    CapabilitySet, CarrierError, CarrierService, Operation, RateRequest, ShipmentRequest,
};
use crate::config::CarrierConfig;
use crate::http_client::{HttpAuth, HttpClient, HttpRequest, NoopHttpClient};
use crate::registry::CarrierId;
use crate::{
    CarrierRate, ShipmentResult, ShipmentStatus, TrackingEvent, TrackingInfo, UtcDateTime,
    ValidationError,
};

const PRODUCTION_URL: &str = "https://express.api.dhl.com/mydhlapi";
const SANDBOX_URL: &str = "https://express.api.dhl.com/mydhlapi/test";

pub struct DhlAdapter {
    config: CarrierConfig,
    http_client: Arc<dyn HttpClient>,
}

impl DhlAdapter {
    /// Offline adapter with the no-op transport; serves placeholder data.
    pub fn new(config: CarrierConfig) -> Self {
        Self {
            config,
            http_client: Arc::new(NoopHttpClient),
        }
    }

    pub fn with_http_client(config: CarrierConfig, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            config,
            http_client,
        }
    }

    fn base_url(&self) -> &str {
        if let Some(url) = self.config.base_url.as_deref() {
            url
        } else if self.config.sandbox {
            SANDBOX_URL
        } else {
            PRODUCTION_URL
        }
    }

    fn live(&self) -> bool {
        self.config.credentials.is_complete() && !self.http_client.is_mock()
    }

    fn auth(&self) -> HttpAuth {
        HttpAuth::Basic {
            username: self.config.credentials.api_key.clone(),
            password: self.config.credentials.api_secret.clone(),
        }
    }

    fn request(&self, path: &str) -> HttpRequest {
        HttpRequest::post(format!("{}{path}", self.base_url()))
            .with_auth(&self.auth())
            .with_header("message-reference", Uuid::new_v4().to_string())
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        context: &str,
        body: String,
    ) -> Result<T, CarrierError> {
        let request = self.request(path).with_json_body(body);
        debug!(carrier = "dhl", path, "dispatching upstream call");

        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|error| transport_error(CarrierId::Dhl, error))?;
        if !response.is_success() {
            return Err(upstream_error(CarrierId::Dhl, response.status, &response.body));
        }

        serde_json::from_str(&response.body)
            .map_err(|error| decode_error(CarrierId::Dhl, context, error))
    }

    fn placeholder_rates(&self, req: &RateRequest) -> Result<Vec<CarrierRate>, CarrierError> {
        let seed = postal_seed(&req.origin.postal_code, &req.destination.postal_code);
        let weight = req.total_weight_kg();

        [
            ("N", "Express Domestic", 1_u32, 95.0),
            ("P", "Express Worldwide", 3_u32, 72.0),
        ]
        .into_iter()
        .map(|(service, service_name, days, per_kg)| {
            let price = round2(weight * per_kg + 140.0 + (seed % 60) as f64);
            Ok(CarrierRate::new(
                CarrierId::Dhl,
                service,
                service_name,
                price,
                "MXN",
                days,
            )
            .map_err(validation_to_error)?
            .with_metadata(placeholder_metadata()))
        })
        .collect()
    }
}

impl CarrierService for DhlAdapter {
    fn id(&self) -> CarrierId {
        CarrierId::Dhl
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::core()
    }

    fn get_rates<'a>(
        &'a self,
        req: RateRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<CarrierRate>, CarrierError>> + Send + 'a>> {
        Box::pin(async move {
            if !self.live() {
                return self.placeholder_rates(&req);
            }

            let body = serde_json::to_string(&DhlRateRequest::from_request(
                &req,
                self.config.credentials.account_number.as_deref(),
            ))
            .map_err(|error| CarrierError::internal(format!("dhl rate encode failed: {error}")))?;

            let response: DhlRateResponse = self.post_json("/rates", "rate", body).await?;
            response
                .products
                .into_iter()
                .filter_map(|product| product.normalize().transpose())
                .collect()
        })
    }

    fn create_shipment<'a>(
        &'a self,
        req: ShipmentRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ShipmentResult, CarrierError>> + Send + 'a>> {
        Box::pin(async move {
            if !self.live() {
                let seed = postal_seed(&req.origin.postal_code, &req.destination.postal_code);
                return Ok(ShipmentResult::new(
                    format!("DHL{seed:010}"),
                    "https://labels.parcelo.test/dhl-placeholder.pdf",
                    CarrierId::Dhl,
                    req.service,
                    0.0,
                    "MXN",
                )
                .map_err(validation_to_error)?
                .with_metadata(placeholder_metadata()));
            }

            let body = serde_json::to_string(&DhlShipmentRequest::from_request(
                &req,
                self.config.credentials.account_number.as_deref(),
            ))
            .map_err(|error| {
                CarrierError::internal(format!("dhl shipment encode failed: {error}"))
            })?;

            let response: DhlShipmentResponse =
                self.post_json("/shipments", "shipment", body).await?;
            response.normalize(&req.service)
        })
    }

    fn get_tracking<'a>(
        &'a self,
        tracking_number: String,
    ) -> Pin<Box<dyn Future<Output = Result<TrackingInfo, CarrierError>> + Send + 'a>> {
        Box::pin(async move {
            if tracking_number.trim().is_empty() {
                return Err(CarrierError::invalid_request(
                    "dhl tracking number must not be empty",
                ));
            }

            if !self.live() {
                return TrackingInfo::new(
                    tracking_number,
                    CarrierId::Dhl,
                    ShipmentStatus::InTransit,
                    vec![TrackingEvent::new(
                        UtcDateTime::now(),
                        ShipmentStatus::InTransit,
                        "PU",
                        "Shipment picked up",
                    )],
                )
                .map_err(validation_to_error);
            }

            let encoded = urlencoding::encode(&tracking_number);
            let request = HttpRequest::get(format!(
                "{}/shipments/{encoded}/tracking",
                self.base_url()
            ))
            .with_auth(&self.auth())
            .with_header("message-reference", Uuid::new_v4().to_string());

            let response = self
                .http_client
                .execute(request)
                .await
                .map_err(|error| transport_error(CarrierId::Dhl, error))?;
            if !response.is_success() {
                return Err(upstream_error(CarrierId::Dhl, response.status, &response.body));
            }

            let payload: DhlTrackingResponse = serde_json::from_str(&response.body)
                .map_err(|error| decode_error(CarrierId::Dhl, "tracking", error))?;
            payload.normalize(&tracking_number)
        })
    }

    fn cancel_shipment<'a>(
        &'a self,
        _tracking_number: String,
    ) -> Pin<Box<dyn Future<Output = Result<bool, CarrierError>> + Send + 'a>> {
        Box::pin(async move {
            Err(CarrierError::not_supported(
                Operation::Cancellation,
                CarrierId::Dhl,
            ))
        })
    }

    fn validate_address<'a>(
        &'a self,
        _address: crate::Address,
    ) -> Pin<Box<dyn Future<Output = Result<Option<crate::Address>, CarrierError>> + Send + 'a>>
    {
        Box::pin(async move { Ok(None) })
    }
}

// -- wire payloads ----------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DhlRateRequest {
    customer_details: DhlCustomerDetails,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    accounts: Vec<DhlAccount>,
    packages: Vec<DhlPackage>,
}

impl DhlRateRequest {
    fn from_request(req: &RateRequest, account: Option<&str>) -> Self {
        Self {
            customer_details: DhlCustomerDetails {
                shipper_details: DhlAddress::from_domain(&req.origin),
                receiver_details: DhlAddress::from_domain(&req.destination),
            },
            accounts: account
                .map(|number| {
                    vec![DhlAccount {
                        type_code: String::from("shipper"),
                        number: number.to_owned(),
                    }]
                })
                .unwrap_or_default(),
            packages: req.packages.iter().map(DhlPackage::from_domain).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DhlShipmentRequest {
    product_code: String,
    customer_details: DhlCustomerDetails,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    accounts: Vec<DhlAccount>,
    content: DhlShipmentContent,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    customer_references: Vec<DhlCustomerReference>,
}

impl DhlShipmentRequest {
    fn from_request(req: &ShipmentRequest, account: Option<&str>) -> Self {
        Self {
            product_code: req.service.clone(),
            customer_details: DhlCustomerDetails {
                shipper_details: DhlAddress::from_domain(&req.origin),
                receiver_details: DhlAddress::from_domain(&req.destination),
            },
            accounts: account
                .map(|number| {
                    vec![DhlAccount {
                        type_code: String::from("shipper"),
                        number: number.to_owned(),
                    }]
                })
                .unwrap_or_default(),
            content: DhlShipmentContent {
                packages: req.packages.iter().map(DhlPackage::from_domain).collect(),
                description: req
                    .instructions
                    .clone()
                    .unwrap_or_else(|| String::from("Merchandise")),
            },
            customer_references: req
                .reference
                .as_deref()
                .map(|value| {
                    vec![DhlCustomerReference {
                        value: value.to_owned(),
                    }]
                })
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DhlShipmentContent {
    packages: Vec<DhlPackage>,
    description: String,
}

#[derive(Debug, Serialize)]
struct DhlCustomerReference {
    value: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DhlCustomerDetails {
    shipper_details: DhlAddress,
    receiver_details: DhlAddress,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DhlAddress {
    address_line1: String,
    city_name: String,
    postal_code: String,
    country_code: String,
}

impl DhlAddress {
    fn from_domain(address: &crate::Address) -> Self {
        Self {
            address_line1: address.street.clone(),
            city_name: address.city.clone(),
            postal_code: address.postal_code.clone(),
            country_code: address.country.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DhlAccount {
    type_code: String,
    number: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DhlPackage {
    weight: f64,
    dimensions: DhlDimensions,
}

impl DhlPackage {
    fn from_domain(package: &crate::Package) -> Self {
        let (length, width, height) = package.dimensions_cm();
        Self {
            weight: package.weight_kg(),
            dimensions: DhlDimensions {
                length,
                width,
                height,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct DhlDimensions {
    length: f64,
    width: f64,
    height: f64,
}

#[derive(Debug, Deserialize)]
struct DhlRateResponse {
    #[serde(default)]
    products: Vec<DhlProduct>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DhlProduct {
    product_code: String,
    #[serde(default)]
    product_name: String,
    #[serde(default)]
    total_price: Vec<DhlTotalPrice>,
    #[serde(default)]
    delivery_capabilities: Option<DhlDeliveryCapabilities>,
}

impl DhlProduct {
    /// Picks the billing-currency total (`BILLC`) when present, falling back
    /// to the first priced entry. Unpriced products are skipped.
    fn normalize(self) -> Result<Option<CarrierRate>, CarrierError> {
        let priced = self
            .total_price
            .iter()
            .find(|price| price.currency_type.as_deref() == Some("BILLC"))
            .or_else(|| self.total_price.first());

        let Some(priced) = priced else {
            return Ok(None);
        };

        let days = self
            .delivery_capabilities
            .as_ref()
            .map(|capabilities| capabilities.total_transit_days)
            .unwrap_or(1);

        let rate = CarrierRate::new(
            CarrierId::Dhl,
            self.product_code,
            if self.product_name.is_empty() {
                String::from("DHL Express")
            } else {
                self.product_name
            },
            priced.price,
            priced.price_currency.as_deref().unwrap_or("MXN"),
            days,
        )
        .map_err(validation_to_error)?;
        Ok(Some(rate))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DhlTotalPrice {
    #[serde(default)]
    currency_type: Option<String>,
    #[serde(default)]
    price_currency: Option<String>,
    price: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DhlDeliveryCapabilities {
    total_transit_days: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DhlShipmentResponse {
    shipment_tracking_number: String,
    #[serde(default)]
    documents: Vec<DhlDocument>,
    #[serde(default)]
    shipment_charges: Vec<DhlShipmentCharge>,
}

impl DhlShipmentResponse {
    fn normalize(self, service: &str) -> Result<ShipmentResult, CarrierError> {
        // Label documents arrive as base64 blobs; exposed as a data URI.
        let label_url = self
            .documents
            .iter()
            .find(|document| document.type_code.eq_ignore_ascii_case("label"))
            .map(|document| format!("data:application/pdf;base64,{}", document.content))
            .unwrap_or_default();

        let charge = self.shipment_charges.first();
        ShipmentResult::new(
            self.shipment_tracking_number,
            label_url,
            CarrierId::Dhl,
            service,
            charge.map(|charge| charge.price).unwrap_or(0.0),
            charge
                .and_then(|charge| charge.price_currency.as_deref())
                .unwrap_or("MXN"),
        )
        .map_err(validation_to_error)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DhlDocument {
    type_code: String,
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DhlShipmentCharge {
    price: f64,
    #[serde(default)]
    price_currency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DhlTrackingResponse {
    #[serde(default)]
    shipments: Vec<DhlTrackedShipment>,
}

impl DhlTrackingResponse {
    fn normalize(self, tracking_number: &str) -> Result<TrackingInfo, CarrierError> {
        let shipment = self.shipments.into_iter().next().ok_or_else(|| {
            CarrierError::not_found(format!("dhl has no shipment {tracking_number}"))
        })?;

        let events = shipment
            .events
            .into_iter()
            .map(DhlTrackingEvent::normalize)
            .collect::<Result<Vec<_>, _>>()?;

        let status = events
            .last()
            .map(|event| event.status)
            .unwrap_or(ShipmentStatus::Unknown);

        TrackingInfo::new(tracking_number, CarrierId::Dhl, status, events)
            .map_err(validation_to_error)
    }
}

#[derive(Debug, Deserialize)]
struct DhlTrackedShipment {
    #[serde(default)]
    events: Vec<DhlTrackingEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DhlTrackingEvent {
    date: String,
    time: String,
    type_code: String,
    description: String,
    #[serde(default)]
    service_area: Vec<DhlServiceArea>,
}

#[derive(Debug, Deserialize)]
struct DhlServiceArea {
    #[serde(default)]
    description: Option<String>,
}

impl DhlTrackingEvent {
    fn normalize(self) -> Result<TrackingEvent, CarrierError> {
        let timestamp = UtcDateTime::parse(&format!("{}T{}Z", self.date, self.time))
            .map_err(validation_to_error)?;

        let mut event = TrackingEvent::new(
            timestamp,
            map_status(&self.type_code),
            self.type_code,
            self.description,
        );
        if let Some(location) = self
            .service_area
            .into_iter()
            .next()
            .and_then(|area| area.description)
        {
            event = event.with_location(location);
        }
        Ok(event)
    }
}

fn map_status(type_code: &str) -> ShipmentStatus {
    match type_code {
        "PU" => ShipmentStatus::Pending,
        "PL" | "DF" | "AF" | "AR" => ShipmentStatus::InTransit,
        "WC" => ShipmentStatus::OutForDelivery,
        "OK" | "DL" => ShipmentStatus::Delivered,
        "RT" => ShipmentStatus::Returned,
        "CA" => ShipmentStatus::Cancelled,
        "CD" | "NH" | "MS" => ShipmentStatus::Exception,
        _ => ShipmentStatus::Unknown,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn validation_to_error(error: ValidationError) -> CarrierError {
    CarrierError::internal(error.to_string())
}
