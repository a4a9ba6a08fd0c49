//! UPS REST adapter.
//!
//! The token endpoint takes HTTP Basic credentials and returns a bearer
//! token; business calls carry `transId`/`transactionSrc` headers. UPS
//! reports monetary values and day counts as strings on the wire.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::{decode_error, placeholder_metadata, postal_seed, transport_error, upstream_error};
use crate::auth::TokenCache;
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

const PRODUCTION_URL: &str = "https://onlinetools.ups.com";
const SANDBOX_URL: &str = "https://wwwcie.ups.com";
const TRANSACTION_SRC: &str = "parcelo";

pub struct UpsAdapter {
    config: CarrierConfig,
    http_client: Arc<dyn HttpClient>,
    token_cache: TokenCache,
}

impl UpsAdapter {
    /// Offline adapter with the no-op transport; serves placeholder data.
    pub fn new(config: CarrierConfig) -> Self {
        Self::with_http_client(config, Arc::new(NoopHttpClient))
    }

    pub fn with_http_client(config: CarrierConfig, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            config,
            http_client,
            token_cache: TokenCache::default(),
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

    async fn bearer_token(&self) -> Result<String, CarrierError> {
        self.token_cache
            .get_or_refresh(|| async {
                debug!(carrier = "ups", "refreshing oauth token");
                let request = HttpRequest::post(format!(
                    "{}/security/v1/oauth/token",
                    self.base_url()
                ))
                .with_auth(&HttpAuth::Basic {
                    username: self.config.credentials.api_key.clone(),
                    password: self.config.credentials.api_secret.clone(),
                })
                .with_form_body("grant_type=client_credentials");

                let response = self
                    .http_client
                    .execute(request)
                    .await
                    .map_err(|error| transport_error(CarrierId::Ups, error))?;
                if !response.is_success() {
                    return Err(CarrierError::unavailable(format!(
                        "ups token endpoint returned status {}",
                        response.status
                    )));
                }

                let payload: UpsTokenResponse = serde_json::from_str(&response.body)
                    .map_err(|error| decode_error(CarrierId::Ups, "token", error))?;
                let expires_in = payload.expires_in.parse::<u64>().map_err(|_| {
                    CarrierError::internal("ups token expiry is not a number")
                })?;
                Ok((payload.access_token, Duration::from_secs(expires_in)))
            })
            .await
    }

    async fn dispatch<T: for<'de> Deserialize<'de>>(
        &self,
        request: HttpRequest,
        context: &str,
    ) -> Result<T, CarrierError> {
        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|error| transport_error(CarrierId::Ups, error))?;
        if response.status == 401 {
            self.token_cache.invalidate();
            return Err(CarrierError::unavailable(
                "ups rejected the bearer token; re-authenticating on next attempt",
            ));
        }
        if !response.is_success() {
            return Err(upstream_error(CarrierId::Ups, response.status, &response.body));
        }

        serde_json::from_str(&response.body)
            .map_err(|error| decode_error(CarrierId::Ups, context, error))
    }

    async fn business_request(&self, url: String) -> Result<HttpRequest, CarrierError> {
        let token = self.bearer_token().await?;
        Ok(HttpRequest::post(url)
            .with_auth(&HttpAuth::BearerToken(token))
            .with_header("transid", Uuid::new_v4().to_string())
            .with_header("transactionsrc", TRANSACTION_SRC))
    }

    fn placeholder_rates(&self, req: &RateRequest) -> Result<Vec<CarrierRate>, CarrierError> {
        let seed = postal_seed(&req.origin.postal_code, &req.destination.postal_code);
        let weight = req.total_weight_kg();

        [
            ("03", "UPS Ground", 4_u32, 48.0),
            ("65", "UPS Saver", 2_u32, 85.0),
        ]
        .into_iter()
        .map(|(service, service_name, days, per_kg)| {
            let price = round2(weight * per_kg + 110.0 + (seed % 50) as f64);
            Ok(CarrierRate::new(
                CarrierId::Ups,
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

impl CarrierService for UpsAdapter {
    fn id(&self) -> CarrierId {
        CarrierId::Ups
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

            let body = serde_json::to_string(&UpsRateRequest::from_request(
                &req,
                self.config.credentials.account_number.as_deref(),
            ))
            .map_err(|error| CarrierError::internal(format!("ups rate encode failed: {error}")))?;

            let request = self
                .business_request(format!("{}/api/rating/v2409/Shop", self.base_url()))
                .await?
                .with_json_body(body);
            debug!(carrier = "ups", "dispatching rate call");

            let response: UpsRateResponse = self.dispatch(request, "rate").await?;
            response
                .rate_response
                .rated_shipment
                .into_iter()
                .map(UpsRatedShipment::normalize)
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
                    format!("1Z{seed:016}"),
                    "https://labels.parcelo.test/ups-placeholder.pdf",
                    CarrierId::Ups,
                    req.service,
                    0.0,
                    "MXN",
                )
                .map_err(validation_to_error)?
                .with_metadata(placeholder_metadata()));
            }

            let body = serde_json::to_string(&UpsShipmentRequest::from_request(
                &req,
                self.config.credentials.account_number.as_deref(),
            ))
            .map_err(|error| {
                CarrierError::internal(format!("ups shipment encode failed: {error}"))
            })?;

            let request = self
                .business_request(format!("{}/api/shipments/v2409/ship", self.base_url()))
                .await?
                .with_json_body(body);

            let response: UpsShipmentResponse = self.dispatch(request, "shipment").await?;
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
                    "ups tracking number must not be empty",
                ));
            }

            if !self.live() {
                return TrackingInfo::new(
                    tracking_number,
                    CarrierId::Ups,
                    ShipmentStatus::InTransit,
                    vec![TrackingEvent::new(
                        UtcDateTime::now(),
                        ShipmentStatus::InTransit,
                        "I",
                        "In transit",
                    )],
                )
                .map_err(validation_to_error);
            }

            let token = self.bearer_token().await?;
            let encoded = urlencoding::encode(&tracking_number);
            let request = HttpRequest::get(format!(
                "{}/api/track/v1/details/{encoded}",
                self.base_url()
            ))
            .with_auth(&HttpAuth::BearerToken(token))
            .with_header("transid", Uuid::new_v4().to_string())
            .with_header("transactionsrc", TRANSACTION_SRC);

            let response: UpsTrackResponse = self.dispatch(request, "tracking").await?;
            response.normalize(&tracking_number)
        })
    }

    fn cancel_shipment<'a>(
        &'a self,
        _tracking_number: String,
    ) -> Pin<Box<dyn Future<Output = Result<bool, CarrierError>> + Send + 'a>> {
        Box::pin(async move {
            Err(CarrierError::not_supported(
                Operation::Cancellation,
                CarrierId::Ups,
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

#[derive(Debug, Deserialize)]
struct UpsTokenResponse {
    access_token: String,
    /// UPS serializes this as a string, e.g. `"14399"`.
    expires_in: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct UpsRateRequest {
    rate_request: UpsRateRequestBody,
}

impl UpsRateRequest {
    fn from_request(req: &RateRequest, account: Option<&str>) -> Self {
        Self {
            rate_request: UpsRateRequestBody {
                shipment: UpsShipment {
                    shipper: UpsParty::from_domain(&req.origin, account),
                    ship_to: UpsParty::from_domain(&req.destination, None),
                    package: req.packages.iter().map(UpsPackage::from_domain).collect(),
                },
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct UpsRateRequestBody {
    shipment: UpsShipment,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct UpsShipment {
    shipper: UpsParty,
    ship_to: UpsParty,
    package: Vec<UpsPackage>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct UpsParty {
    #[serde(skip_serializing_if = "Option::is_none")]
    shipper_number: Option<String>,
    address: UpsWireAddress,
}

impl UpsParty {
    fn from_domain(address: &crate::Address, account: Option<&str>) -> Self {
        Self {
            shipper_number: account.map(str::to_owned),
            address: UpsWireAddress {
                address_line: vec![address.street.clone()],
                city: address.city.clone(),
                state_province_code: address.state.clone(),
                postal_code: address.postal_code.clone(),
                country_code: address.country.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct UpsWireAddress {
    address_line: Vec<String>,
    city: String,
    state_province_code: String,
    postal_code: String,
    country_code: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct UpsPackage {
    packaging_type: UpsCode,
    dimensions: UpsWireDimensions,
    package_weight: UpsWireWeight,
}

impl UpsPackage {
    fn from_domain(package: &crate::Package) -> Self {
        let (length, width, height) = package.dimensions_cm();
        Self {
            packaging_type: UpsCode {
                code: String::from("02"),
            },
            dimensions: UpsWireDimensions {
                unit_of_measurement: UpsCode {
                    code: String::from("CM"),
                },
                length: format!("{length:.1}"),
                width: format!("{width:.1}"),
                height: format!("{height:.1}"),
            },
            package_weight: UpsWireWeight {
                unit_of_measurement: UpsCode {
                    code: String::from("KGS"),
                },
                weight: format!("{:.2}", package.weight_kg()),
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct UpsCode {
    code: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct UpsWireDimensions {
    unit_of_measurement: UpsCode,
    length: String,
    width: String,
    height: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct UpsWireWeight {
    unit_of_measurement: UpsCode,
    weight: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UpsRateResponse {
    rate_response: UpsRateResponseBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UpsRateResponseBody {
    #[serde(default)]
    rated_shipment: Vec<UpsRatedShipment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UpsRatedShipment {
    service: UpsService,
    total_charges: UpsCharges,
    #[serde(default)]
    guaranteed_delivery: Option<UpsGuaranteedDelivery>,
}

impl UpsRatedShipment {
    fn normalize(self) -> Result<CarrierRate, CarrierError> {
        let price = self.total_charges.monetary_value.parse::<f64>().map_err(|_| {
            CarrierError::internal(format!(
                "ups monetary value is not a number: {}",
                self.total_charges.monetary_value
            ))
        })?;

        let days = self
            .guaranteed_delivery
            .as_ref()
            .and_then(|guarantee| guarantee.business_days_in_transit.parse::<u32>().ok())
            .unwrap_or(4);

        CarrierRate::new(
            CarrierId::Ups,
            self.service.code.clone(),
            service_name(&self.service.code),
            price,
            self.total_charges.currency_code.as_str(),
            days,
        )
        .map_err(validation_to_error)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UpsService {
    code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UpsCharges {
    currency_code: String,
    monetary_value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UpsGuaranteedDelivery {
    #[serde(default)]
    business_days_in_transit: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct UpsShipmentRequest {
    shipment_request: UpsShipmentRequestBody,
}

impl UpsShipmentRequest {
    fn from_request(req: &ShipmentRequest, account: Option<&str>) -> Self {
        Self {
            shipment_request: UpsShipmentRequestBody {
                shipment: UpsShipmentWithService {
                    shipper: UpsParty::from_domain(&req.origin, account),
                    ship_to: UpsParty::from_domain(&req.destination, None),
                    service: UpsCode {
                        code: req.service.clone(),
                    },
                    package: req.packages.iter().map(UpsPackage::from_domain).collect(),
                },
                label_specification: UpsLabelSpecification {
                    label_image_format: UpsCode {
                        code: String::from("PDF"),
                    },
                },
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct UpsShipmentRequestBody {
    shipment: UpsShipmentWithService,
    label_specification: UpsLabelSpecification,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct UpsShipmentWithService {
    shipper: UpsParty,
    ship_to: UpsParty,
    service: UpsCode,
    package: Vec<UpsPackage>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct UpsLabelSpecification {
    label_image_format: UpsCode,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UpsShipmentResponse {
    shipment_response: UpsShipmentResponseBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UpsShipmentResponseBody {
    shipment_results: UpsShipmentResults,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UpsShipmentResults {
    shipment_identification_number: String,
    #[serde(default)]
    package_results: Vec<UpsPackageResult>,
    #[serde(default)]
    shipment_charges: Option<UpsShipmentCharges>,
}

impl UpsShipmentResponse {
    fn normalize(self, service: &str) -> Result<ShipmentResult, CarrierError> {
        let results = self.shipment_response.shipment_results;

        let label_url = results
            .package_results
            .iter()
            .find_map(|package| package.shipping_label.as_ref())
            .map(|label| format!("data:application/pdf;base64,{}", label.graphic_image))
            .unwrap_or_default();

        let (cost, currency) = results
            .shipment_charges
            .as_ref()
            .and_then(|charges| charges.total_charges.as_ref())
            .map(|charges| {
                (
                    charges.monetary_value.parse::<f64>().unwrap_or(0.0),
                    charges.currency_code.clone(),
                )
            })
            .unwrap_or((0.0, String::from("MXN")));

        ShipmentResult::new(
            results.shipment_identification_number,
            label_url,
            CarrierId::Ups,
            service,
            cost,
            currency,
        )
        .map_err(validation_to_error)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UpsPackageResult {
    #[serde(default)]
    shipping_label: Option<UpsShippingLabel>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UpsShippingLabel {
    graphic_image: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UpsShipmentCharges {
    #[serde(default)]
    total_charges: Option<UpsCharges>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsTrackResponse {
    track_response: UpsTrackResponseBody,
}

#[derive(Debug, Deserialize)]
struct UpsTrackResponseBody {
    #[serde(default)]
    shipment: Vec<UpsTrackedShipment>,
}

#[derive(Debug, Deserialize)]
struct UpsTrackedShipment {
    #[serde(default)]
    package: Vec<UpsTrackedPackage>,
}

#[derive(Debug, Deserialize)]
struct UpsTrackedPackage {
    #[serde(default)]
    activity: Vec<UpsActivity>,
}

#[derive(Debug, Deserialize)]
struct UpsActivity {
    date: String,
    time: String,
    status: UpsActivityStatus,
    #[serde(default)]
    location: Option<UpsActivityLocation>,
}

#[derive(Debug, Deserialize)]
struct UpsActivityStatus {
    #[serde(rename = "type")]
    status_type: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct UpsActivityLocation {
    #[serde(default)]
    address: Option<UpsActivityAddress>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsActivityAddress {
    #[serde(default)]
    city: Option<String>,
}

impl UpsTrackResponse {
    fn normalize(self, tracking_number: &str) -> Result<TrackingInfo, CarrierError> {
        let package = self
            .track_response
            .shipment
            .into_iter()
            .next()
            .and_then(|shipment| shipment.package.into_iter().next())
            .ok_or_else(|| {
                CarrierError::not_found(format!("ups has no shipment {tracking_number}"))
            })?;

        let events = package
            .activity
            .into_iter()
            .map(UpsActivity::normalize)
            .collect::<Result<Vec<_>, _>>()?;

        let status = events
            .last()
            .map(|event| event.status)
            .unwrap_or(ShipmentStatus::Unknown);

        TrackingInfo::new(tracking_number, CarrierId::Ups, status, events)
            .map_err(validation_to_error)
    }
}

impl UpsActivity {
    /// UPS splits the stamp into `YYYYMMDD` and `HHMMSS`.
    fn normalize(self) -> Result<TrackingEvent, CarrierError> {
        let stamp = format_wire_timestamp(&self.date, &self.time).ok_or_else(|| {
            CarrierError::internal(format!(
                "ups activity timestamp malformed: {} {}",
                self.date, self.time
            ))
        })?;
        let timestamp = UtcDateTime::parse(&stamp).map_err(validation_to_error)?;

        let mut event = TrackingEvent::new(
            timestamp,
            map_status(&self.status.status_type),
            self.status.status_type,
            self.status.description,
        );
        if let Some(city) = self
            .location
            .and_then(|location| location.address)
            .and_then(|address| address.city)
        {
            event = event.with_location(city);
        }
        Ok(event)
    }
}

fn format_wire_timestamp(date: &str, time: &str) -> Option<String> {
    if date.len() != 8
        || time.len() != 6
        || !date.chars().all(|c| c.is_ascii_digit())
        || !time.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }
    Some(format!(
        "{}-{}-{}T{}:{}:{}Z",
        &date[0..4],
        &date[4..6],
        &date[6..8],
        &time[0..2],
        &time[2..4],
        &time[4..6]
    ))
}

fn service_name(code: &str) -> String {
    match code {
        "01" => String::from("UPS Next Day Air"),
        "02" => String::from("UPS 2nd Day Air"),
        "03" => String::from("UPS Ground"),
        "07" => String::from("UPS Worldwide Express"),
        "08" => String::from("UPS Worldwide Expedited"),
        "11" => String::from("UPS Standard"),
        "65" => String::from("UPS Saver"),
        other => format!("UPS Service {other}"),
    }
}

fn map_status(status_type: &str) -> ShipmentStatus {
    match status_type {
        "M" | "P" => ShipmentStatus::Pending,
        "I" => ShipmentStatus::InTransit,
        "O" => ShipmentStatus::OutForDelivery,
        "D" => ShipmentStatus::Delivered,
        "RS" => ShipmentStatus::Returned,
        "X" => ShipmentStatus::Exception,
        _ => ShipmentStatus::Unknown,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn validation_to_error(error: ValidationError) -> CarrierError {
    CarrierError::internal(error.to_string())
}
