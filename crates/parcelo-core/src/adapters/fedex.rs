//! FedEx REST adapter.
//!
//! Exchanges client credentials for an OAuth2 bearer token; the token is
//! cached per adapter instance and refreshed five minutes before expiry.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

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

const PRODUCTION_URL: &str = "https://apis.fedex.com";
const SANDBOX_URL: &str = "https://apis-sandbox.fedex.com";

pub struct FedexAdapter {
    config: CarrierConfig,
    http_client: Arc<dyn HttpClient>,
    token_cache: TokenCache,
}

impl FedexAdapter {
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
                debug!(carrier = "fedex", "refreshing oauth token");
                let body = format!(
                    "grant_type=client_credentials&client_id={}&client_secret={}",
                    urlencoding::encode(&self.config.credentials.api_key),
                    urlencoding::encode(&self.config.credentials.api_secret),
                );
                let request =
                    HttpRequest::post(format!("{}/oauth/token", self.base_url())).with_form_body(body);

                let response = self
                    .http_client
                    .execute(request)
                    .await
                    .map_err(|error| transport_error(CarrierId::Fedex, error))?;
                if !response.is_success() {
                    return Err(CarrierError::unavailable(format!(
                        "fedex token endpoint returned status {}",
                        response.status
                    )));
                }

                let payload: FedexTokenResponse = serde_json::from_str(&response.body)
                    .map_err(|error| decode_error(CarrierId::Fedex, "token", error))?;
                Ok((
                    payload.access_token,
                    Duration::from_secs(payload.expires_in),
                ))
            })
            .await
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        context: &str,
        body: String,
    ) -> Result<T, CarrierError> {
        let token = self.bearer_token().await?;
        let request = HttpRequest::post(format!("{}{path}", self.base_url()))
            .with_auth(&HttpAuth::BearerToken(token))
            .with_json_body(body);
        debug!(carrier = "fedex", path, "dispatching upstream call");

        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|error| transport_error(CarrierId::Fedex, error))?;
        if response.status == 401 {
            // Token revoked upstream; the next call re-authenticates.
            self.token_cache.invalidate();
            return Err(CarrierError::unavailable(
                "fedex rejected the bearer token; re-authenticating on next attempt",
            ));
        }
        if !response.is_success() {
            return Err(upstream_error(
                CarrierId::Fedex,
                response.status,
                &response.body,
            ));
        }

        serde_json::from_str(&response.body)
            .map_err(|error| decode_error(CarrierId::Fedex, context, error))
    }

    fn placeholder_rates(&self, req: &RateRequest) -> Result<Vec<CarrierRate>, CarrierError> {
        let seed = postal_seed(&req.origin.postal_code, &req.destination.postal_code);
        let weight = req.total_weight_kg();

        [
            ("FEDEX_EXPRESS_SAVER", "FedEx Express Saver", 3_u32, 60.0),
            ("STANDARD_OVERNIGHT", "FedEx Standard Overnight", 1_u32, 110.0),
        ]
        .into_iter()
        .map(|(service, service_name, days, per_kg)| {
            let price = round2(weight * per_kg + 120.0 + (seed % 75) as f64);
            Ok(CarrierRate::new(
                CarrierId::Fedex,
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

impl CarrierService for FedexAdapter {
    fn id(&self) -> CarrierId {
        CarrierId::Fedex
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

            let body = serde_json::to_string(&FedexRateRequest::from_request(
                &req,
                self.config.credentials.account_number.as_deref(),
            ))
            .map_err(|error| CarrierError::internal(format!("fedex rate encode failed: {error}")))?;

            let response: FedexRateResponse =
                self.post_json("/rate/v1/rates/quotes", "rate", body).await?;
            response
                .output
                .rate_reply_details
                .into_iter()
                .filter_map(|detail| detail.normalize().transpose())
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
                    format!("FDX{seed:011}"),
                    "https://labels.parcelo.test/fedex-placeholder.pdf",
                    CarrierId::Fedex,
                    req.service,
                    0.0,
                    "MXN",
                )
                .map_err(validation_to_error)?
                .with_metadata(placeholder_metadata()));
            }

            let body = serde_json::to_string(&FedexShipmentRequest::from_request(
                &req,
                self.config.credentials.account_number.as_deref(),
            ))
            .map_err(|error| {
                CarrierError::internal(format!("fedex shipment encode failed: {error}"))
            })?;

            let response: FedexShipmentResponse =
                self.post_json("/ship/v1/shipments", "shipment", body).await?;
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
                    "fedex tracking number must not be empty",
                ));
            }

            if !self.live() {
                return TrackingInfo::new(
                    tracking_number,
                    CarrierId::Fedex,
                    ShipmentStatus::InTransit,
                    vec![TrackingEvent::new(
                        UtcDateTime::now(),
                        ShipmentStatus::InTransit,
                        "IT",
                        "In transit",
                    )],
                )
                .map_err(validation_to_error);
            }

            let body = json!({
                "includeDetailedScans": true,
                "trackingInfo": [{
                    "trackingNumberInfo": { "trackingNumber": tracking_number }
                }]
            })
            .to_string();

            let response: FedexTrackResponse = self
                .post_json("/track/v1/trackingnumbers", "tracking", body)
                .await?;
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
                CarrierId::Fedex,
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
struct FedexTokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FedexRateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    account_number: Option<FedexAccountNumber>,
    requested_shipment: FedexRequestedShipment,
}

impl FedexRateRequest {
    fn from_request(req: &RateRequest, account: Option<&str>) -> Self {
        Self {
            account_number: account.map(|value| FedexAccountNumber {
                value: value.to_owned(),
            }),
            requested_shipment: FedexRequestedShipment {
                shipper: FedexParty::from_domain(&req.origin),
                recipient: FedexParty::from_domain(&req.destination),
                pickup_type: String::from("DROPOFF_AT_FEDEX_LOCATION"),
                rate_request_type: vec![String::from("ACCOUNT"), String::from("LIST")],
                requested_package_line_items: req
                    .packages
                    .iter()
                    .map(FedexPackageLineItem::from_domain)
                    .collect(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct FedexAccountNumber {
    value: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FedexRequestedShipment {
    shipper: FedexParty,
    recipient: FedexParty,
    pickup_type: String,
    rate_request_type: Vec<String>,
    requested_package_line_items: Vec<FedexPackageLineItem>,
}

#[derive(Debug, Serialize)]
struct FedexParty {
    address: FedexWireAddress,
}

impl FedexParty {
    fn from_domain(address: &crate::Address) -> Self {
        Self {
            address: FedexWireAddress {
                street_lines: vec![address.street.clone()],
                city: address.city.clone(),
                state_or_province_code: address.state.clone(),
                postal_code: address.postal_code.clone(),
                country_code: address.country.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FedexWireAddress {
    street_lines: Vec<String>,
    city: String,
    state_or_province_code: String,
    postal_code: String,
    country_code: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FedexPackageLineItem {
    weight: FedexWeight,
    dimensions: FedexDimensions,
}

impl FedexPackageLineItem {
    fn from_domain(package: &crate::Package) -> Self {
        let (length, width, height) = package.dimensions_cm();
        Self {
            weight: FedexWeight {
                units: String::from("KG"),
                value: package.weight_kg(),
            },
            dimensions: FedexDimensions {
                length,
                width,
                height,
                units: String::from("CM"),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct FedexWeight {
    units: String,
    value: f64,
}

#[derive(Debug, Serialize)]
struct FedexDimensions {
    length: f64,
    width: f64,
    height: f64,
    units: String,
}

#[derive(Debug, Deserialize)]
struct FedexRateResponse {
    output: FedexRateOutput,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FedexRateOutput {
    #[serde(default)]
    rate_reply_details: Vec<FedexRateReplyDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FedexRateReplyDetail {
    service_type: String,
    #[serde(default)]
    service_name: Option<String>,
    #[serde(default)]
    rated_shipment_details: Vec<FedexRatedShipmentDetail>,
    #[serde(default)]
    commit: Option<FedexCommit>,
}

impl FedexRateReplyDetail {
    fn normalize(self) -> Result<Option<CarrierRate>, CarrierError> {
        let Some(detail) = self.rated_shipment_details.first() else {
            return Ok(None);
        };

        let days = self
            .commit
            .as_ref()
            .and_then(|commit| commit.transit_days())
            .unwrap_or(3);

        let service_name = self
            .service_name
            .clone()
            .unwrap_or_else(|| self.service_type.clone());
        let rate = CarrierRate::new(
            CarrierId::Fedex,
            self.service_type.clone(),
            service_name,
            detail.total_net_charge,
            detail.currency.as_deref().unwrap_or("MXN"),
            days,
        )
        .map_err(validation_to_error)?;
        Ok(Some(rate))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FedexRatedShipmentDetail {
    total_net_charge: f64,
    #[serde(default)]
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FedexCommit {
    #[serde(default)]
    transit_time: Option<String>,
}

impl FedexCommit {
    /// Maps FedEx transit enums (`ONE_DAY`, `TWO_DAYS`, ...) to day counts.
    fn transit_days(&self) -> Option<u32> {
        match self.transit_time.as_deref()? {
            "ONE_DAY" => Some(1),
            "TWO_DAYS" => Some(2),
            "THREE_DAYS" => Some(3),
            "FOUR_DAYS" => Some(4),
            "FIVE_DAYS" => Some(5),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FedexShipmentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    account_number: Option<FedexAccountNumber>,
    label_response_options: String,
    requested_shipment: FedexRequestedShipmentWithService,
}

impl FedexShipmentRequest {
    fn from_request(req: &ShipmentRequest, account: Option<&str>) -> Self {
        Self {
            account_number: account.map(|value| FedexAccountNumber {
                value: value.to_owned(),
            }),
            label_response_options: String::from("URL_ONLY"),
            requested_shipment: FedexRequestedShipmentWithService {
                shipper: FedexParty::from_domain(&req.origin),
                recipients: vec![FedexParty::from_domain(&req.destination)],
                service_type: req.service.clone(),
                packaging_type: String::from("YOUR_PACKAGING"),
                pickup_type: String::from("DROPOFF_AT_FEDEX_LOCATION"),
                requested_package_line_items: req
                    .packages
                    .iter()
                    .map(FedexPackageLineItem::from_domain)
                    .collect(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FedexRequestedShipmentWithService {
    shipper: FedexParty,
    recipients: Vec<FedexParty>,
    service_type: String,
    packaging_type: String,
    pickup_type: String,
    requested_package_line_items: Vec<FedexPackageLineItem>,
}

#[derive(Debug, Deserialize)]
struct FedexShipmentResponse {
    output: FedexShipmentOutput,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FedexShipmentOutput {
    #[serde(default)]
    transaction_shipments: Vec<FedexTransactionShipment>,
}

impl FedexShipmentResponse {
    fn normalize(self, service: &str) -> Result<ShipmentResult, CarrierError> {
        let shipment = self
            .output
            .transaction_shipments
            .into_iter()
            .next()
            .ok_or_else(|| {
                CarrierError::internal("fedex shipment response contained no shipments")
            })?;

        let label_url = shipment
            .piece_responses
            .iter()
            .flat_map(|piece| piece.package_documents.iter())
            .find_map(|document| document.url.clone())
            .unwrap_or_default();

        ShipmentResult::new(
            shipment.master_tracking_number,
            label_url,
            CarrierId::Fedex,
            service,
            shipment
                .piece_responses
                .first()
                .and_then(|piece| piece.net_charge_amount)
                .unwrap_or(0.0),
            "MXN",
        )
        .map_err(validation_to_error)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FedexTransactionShipment {
    master_tracking_number: String,
    #[serde(default)]
    piece_responses: Vec<FedexPieceResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FedexPieceResponse {
    #[serde(default)]
    package_documents: Vec<FedexPackageDocument>,
    #[serde(default)]
    net_charge_amount: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FedexPackageDocument {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FedexTrackResponse {
    output: FedexTrackOutput,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FedexTrackOutput {
    #[serde(default)]
    complete_track_results: Vec<FedexCompleteTrackResult>,
}

impl FedexTrackResponse {
    fn normalize(self, tracking_number: &str) -> Result<TrackingInfo, CarrierError> {
        let result = self
            .output
            .complete_track_results
            .into_iter()
            .next()
            .and_then(|complete| complete.track_results.into_iter().next())
            .ok_or_else(|| {
                CarrierError::not_found(format!("fedex has no shipment {tracking_number}"))
            })?;

        let status = result
            .latest_status_detail
            .as_ref()
            .map(|detail| map_status(&detail.code))
            .unwrap_or(ShipmentStatus::Unknown);

        let events = result
            .scan_events
            .into_iter()
            .map(FedexScanEvent::normalize)
            .collect::<Result<Vec<_>, _>>()?;

        TrackingInfo::new(tracking_number, CarrierId::Fedex, status, events)
            .map_err(validation_to_error)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FedexCompleteTrackResult {
    #[serde(default)]
    track_results: Vec<FedexTrackResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FedexTrackResult {
    #[serde(default)]
    latest_status_detail: Option<FedexStatusDetail>,
    #[serde(default)]
    scan_events: Vec<FedexScanEvent>,
}

#[derive(Debug, Deserialize)]
struct FedexStatusDetail {
    code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FedexScanEvent {
    date: String,
    event_type: String,
    event_description: String,
    #[serde(default)]
    scan_location: Option<FedexScanLocation>,
}

#[derive(Debug, Deserialize)]
struct FedexScanLocation {
    #[serde(default)]
    city: Option<String>,
}

impl FedexScanEvent {
    fn normalize(self) -> Result<TrackingEvent, CarrierError> {
        let timestamp = UtcDateTime::parse(&self.date).map_err(validation_to_error)?;
        let mut event = TrackingEvent::new(
            timestamp,
            map_status(&self.event_type),
            self.event_type,
            self.event_description,
        );
        if let Some(city) = self.scan_location.and_then(|location| location.city) {
            event = event.with_location(city);
        }
        Ok(event)
    }
}

fn map_status(code: &str) -> ShipmentStatus {
    match code {
        "PU" | "OC" | "IN" => ShipmentStatus::Pending,
        "IT" | "DP" | "AR" | "AF" => ShipmentStatus::InTransit,
        "OD" => ShipmentStatus::OutForDelivery,
        "DL" => ShipmentStatus::Delivered,
        "RS" => ShipmentStatus::Returned,
        "CA" => ShipmentStatus::Cancelled,
        "DE" | "SE" | "DY" => ShipmentStatus::Exception,
        _ => ShipmentStatus::Unknown,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn validation_to_error(error: ValidationError) -> CarrierError {
    CarrierError::internal(error.to_string())
}
