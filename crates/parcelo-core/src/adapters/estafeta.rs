//! Estafeta adapter.
//!
//! Regional Mexican carrier with a Spanish-field JSON API. Token auth with
//! a 300-second safety margin. This is the only carrier that implements
//! cancellation and address validation; input is converted to kg/cm before
//! dispatch because the API is metric-only.

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
    CapabilitySet, CarrierError, CarrierService, RateRequest, ShipmentRequest,
};
use crate::config::CarrierConfig;
use crate::http_client::{HttpAuth, HttpClient, HttpRequest, NoopHttpClient};
use crate::registry::CarrierId;
use crate::{
    Address, CarrierRate, ShipmentResult, ShipmentStatus, TrackingEvent, TrackingInfo,
    UtcDateTime, ValidationError,
};

const PRODUCTION_URL: &str = "https://api.estafeta.com";
const SANDBOX_URL: &str = "https://api-sandbox.estafeta.com";

pub struct EstafetaAdapter {
    config: CarrierConfig,
    http_client: Arc<dyn HttpClient>,
    token_cache: TokenCache,
}

impl EstafetaAdapter {
    /// Offline adapter with the no-op transport; serves placeholder data.
    pub fn new(config: CarrierConfig) -> Self {
        Self::with_http_client(config, Arc::new(NoopHttpClient))
    }

    pub fn with_http_client(config: CarrierConfig, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            config,
            http_client,
            token_cache: TokenCache::new(Duration::from_secs(300)),
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

    async fn token(&self) -> Result<String, CarrierError> {
        self.token_cache
            .get_or_refresh(|| async {
                debug!(carrier = "estafeta", "refreshing access token");
                let body = json!({
                    "apiKey": self.config.credentials.api_key,
                    "apiSecret": self.config.credentials.api_secret,
                })
                .to_string();
                let request =
                    HttpRequest::post(format!("{}/auth/token", self.base_url())).with_json_body(body);

                let response = self
                    .http_client
                    .execute(request)
                    .await
                    .map_err(|error| transport_error(CarrierId::Estafeta, error))?;
                if !response.is_success() {
                    return Err(CarrierError::unavailable(format!(
                        "estafeta token endpoint returned status {}",
                        response.status
                    )));
                }

                let payload: EstafetaTokenResponse = serde_json::from_str(&response.body)
                    .map_err(|error| decode_error(CarrierId::Estafeta, "token", error))?;
                Ok((payload.token, Duration::from_secs(payload.expira_en)))
            })
            .await
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        context: &str,
        body: String,
    ) -> Result<T, CarrierError> {
        let token = self.token().await?;
        let request = HttpRequest::post(format!("{}{path}", self.base_url()))
            .with_auth(&HttpAuth::BearerToken(token))
            .with_json_body(body);
        debug!(carrier = "estafeta", path, "dispatching upstream call");

        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|error| transport_error(CarrierId::Estafeta, error))?;
        if response.status == 401 {
            self.token_cache.invalidate();
            return Err(CarrierError::unavailable(
                "estafeta rejected the access token; re-authenticating on next attempt",
            ));
        }
        if !response.is_success() {
            return Err(upstream_error(
                CarrierId::Estafeta,
                response.status,
                &response.body,
            ));
        }

        serde_json::from_str(&response.body)
            .map_err(|error| decode_error(CarrierId::Estafeta, context, error))
    }

    fn placeholder_rates(&self, req: &RateRequest) -> Result<Vec<CarrierRate>, CarrierError> {
        let seed = postal_seed(&req.origin.postal_code, &req.destination.postal_code);
        let weight = req.total_weight_kg();

        [
            ("DIA_SIGUIENTE", "Dia Siguiente", 1_u32, 70.0),
            ("TERRESTRE", "Terrestre", 4_u32, 38.0),
        ]
        .into_iter()
        .map(|(service, service_name, days, per_kg)| {
            let price = round2(weight * per_kg + 90.0 + (seed % 40) as f64);
            Ok(CarrierRate::new(
                CarrierId::Estafeta,
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

impl CarrierService for EstafetaAdapter {
    fn id(&self) -> CarrierId {
        CarrierId::Estafeta
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::full()
    }

    fn get_rates<'a>(
        &'a self,
        req: RateRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<CarrierRate>, CarrierError>> + Send + 'a>> {
        Box::pin(async move {
            if !self.live() {
                return self.placeholder_rates(&req);
            }

            let body = serde_json::to_string(&EstafetaQuoteRequest::from_request(&req))
                .map_err(|error| {
                    CarrierError::internal(format!("estafeta quote encode failed: {error}"))
                })?;

            let response: EstafetaQuoteResponse =
                self.post_json("/cotizaciones", "quote", body).await?;
            response
                .cotizaciones
                .into_iter()
                .map(EstafetaQuote::normalize)
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
                    format!("EST{seed:010}"),
                    "https://labels.parcelo.test/estafeta-placeholder.pdf",
                    CarrierId::Estafeta,
                    req.service,
                    0.0,
                    "MXN",
                )
                .map_err(validation_to_error)?
                .with_metadata(placeholder_metadata()));
            }

            let body = serde_json::to_string(&EstafetaWaybillRequest::from_request(&req))
                .map_err(|error| {
                    CarrierError::internal(format!("estafeta waybill encode failed: {error}"))
                })?;

            let response: EstafetaWaybillResponse =
                self.post_json("/guias", "waybill", body).await?;
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
                    "estafeta tracking number must not be empty",
                ));
            }

            if !self.live() {
                return TrackingInfo::new(
                    tracking_number,
                    CarrierId::Estafeta,
                    ShipmentStatus::InTransit,
                    vec![TrackingEvent::new(
                        UtcDateTime::now(),
                        ShipmentStatus::InTransit,
                        "EN_TRANSITO",
                        "En transito",
                    )],
                )
                .map_err(validation_to_error);
            }

            let body = json!({ "numeroGuia": tracking_number }).to_string();
            let response: EstafetaTrackingResponse =
                self.post_json("/rastreo", "tracking", body).await?;
            response.normalize(&tracking_number)
        })
    }

    fn cancel_shipment<'a>(
        &'a self,
        tracking_number: String,
    ) -> Pin<Box<dyn Future<Output = Result<bool, CarrierError>> + Send + 'a>> {
        Box::pin(async move {
            if tracking_number.trim().is_empty() {
                return Err(CarrierError::invalid_request(
                    "estafeta tracking number must not be empty",
                ));
            }

            // A declined cancellation (shipment already moving) is a valid
            // outcome, not an error.
            if !self.live() {
                return Ok(true);
            }

            let body = json!({
                "numeroGuia": tracking_number,
                "motivo": "Cancelacion solicitada por el cliente",
            })
            .to_string();

            let response: EstafetaCancellationResponse =
                self.post_json("/cancelaciones", "cancellation", body).await?;
            Ok(response.cancelado)
        })
    }

    fn validate_address<'a>(
        &'a self,
        address: Address,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Address>, CarrierError>> + Send + 'a>> {
        Box::pin(async move {
            if !self.live() {
                return Ok(Some(address));
            }

            let body = serde_json::to_string(&EstafetaWireAddress::from_domain(&address))
                .map_err(|error| {
                    CarrierError::internal(format!("estafeta address encode failed: {error}"))
                })?;

            let response: EstafetaAddressResponse = self
                .post_json("/direcciones/validacion", "address", body)
                .await?;

            if !response.valida {
                return Ok(None);
            }
            match response.direccion {
                Some(wire) => Ok(Some(wire.into_domain(&address)?)),
                None => Ok(Some(address)),
            }
        })
    }
}

// -- wire payloads ----------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EstafetaTokenResponse {
    token: String,
    expira_en: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EstafetaQuoteRequest {
    codigo_postal_origen: String,
    codigo_postal_destino: String,
    paquetes: Vec<EstafetaWirePackage>,
}

impl EstafetaQuoteRequest {
    fn from_request(req: &RateRequest) -> Self {
        Self {
            codigo_postal_origen: req.origin.postal_code.clone(),
            codigo_postal_destino: req.destination.postal_code.clone(),
            paquetes: req
                .packages
                .iter()
                .map(EstafetaWirePackage::from_domain)
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EstafetaWirePackage {
    peso: f64,
    largo: f64,
    ancho: f64,
    alto: f64,
}

impl EstafetaWirePackage {
    fn from_domain(package: &crate::Package) -> Self {
        let (largo, ancho, alto) = package.dimensions_cm();
        Self {
            peso: package.weight_kg(),
            largo,
            ancho,
            alto,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EstafetaQuoteResponse {
    #[serde(default)]
    cotizaciones: Vec<EstafetaQuote>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EstafetaQuote {
    servicio: String,
    #[serde(default)]
    descripcion_servicio: Option<String>,
    costo: f64,
    #[serde(default)]
    moneda: Option<String>,
    dias_entrega: u32,
}

impl EstafetaQuote {
    fn normalize(self) -> Result<CarrierRate, CarrierError> {
        let service_name = self
            .descripcion_servicio
            .clone()
            .unwrap_or_else(|| self.servicio.clone());
        CarrierRate::new(
            CarrierId::Estafeta,
            self.servicio.clone(),
            service_name,
            self.costo,
            self.moneda.as_deref().unwrap_or("MXN"),
            self.dias_entrega,
        )
        .map_err(validation_to_error)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EstafetaWaybillRequest {
    origen: EstafetaWireAddress,
    destino: EstafetaWireAddress,
    servicio: String,
    paquetes: Vec<EstafetaWirePackage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    referencia: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instrucciones: Option<String>,
}

impl EstafetaWaybillRequest {
    fn from_request(req: &ShipmentRequest) -> Self {
        Self {
            origen: EstafetaWireAddress::from_domain(&req.origin),
            destino: EstafetaWireAddress::from_domain(&req.destination),
            servicio: req.service.clone(),
            paquetes: req
                .packages
                .iter()
                .map(EstafetaWirePackage::from_domain)
                .collect(),
            referencia: req.reference.clone(),
            instrucciones: req.instructions.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EstafetaWireAddress {
    calle: String,
    ciudad: String,
    estado: String,
    codigo_postal: String,
    pais: String,
}

impl EstafetaWireAddress {
    fn from_domain(address: &Address) -> Self {
        Self {
            calle: address.street.clone(),
            ciudad: address.city.clone(),
            estado: address.state.clone(),
            codigo_postal: address.postal_code.clone(),
            pais: address.country.clone(),
        }
    }

    /// Rebuilds a domain address from the carrier's normalized form,
    /// carrying over the contact fields the wire format does not echo.
    fn into_domain(self, original: &Address) -> Result<Address, CarrierError> {
        let mut address = Address::new(
            self.calle,
            self.ciudad,
            self.estado,
            self.codigo_postal,
            self.pais,
        )
        .map_err(validation_to_error)?;
        address.company = original.company.clone();
        address.contact_name = original.contact_name.clone();
        address.phone = original.phone.clone();
        address.email = original.email.clone();
        Ok(address)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EstafetaWaybillResponse {
    numero_guia: String,
    #[serde(default)]
    etiqueta: Option<String>,
    #[serde(default)]
    costo: f64,
    #[serde(default)]
    moneda: Option<String>,
}

impl EstafetaWaybillResponse {
    fn normalize(self, service: &str) -> Result<ShipmentResult, CarrierError> {
        let label_url = self
            .etiqueta
            .map(|blob| format!("data:application/pdf;base64,{blob}"))
            .unwrap_or_default();

        ShipmentResult::new(
            self.numero_guia,
            label_url,
            CarrierId::Estafeta,
            service,
            self.costo,
            self.moneda.as_deref().unwrap_or("MXN"),
        )
        .map_err(validation_to_error)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EstafetaTrackingResponse {
    #[serde(default)]
    estatus: Option<String>,
    #[serde(default)]
    eventos: Vec<EstafetaTrackingEvent>,
}

impl EstafetaTrackingResponse {
    fn normalize(self, tracking_number: &str) -> Result<TrackingInfo, CarrierError> {
        let events = self
            .eventos
            .into_iter()
            .map(EstafetaTrackingEvent::normalize)
            .collect::<Result<Vec<_>, _>>()?;

        let status = self
            .estatus
            .as_deref()
            .map(map_status)
            .or_else(|| events.last().map(|event| event.status))
            .unwrap_or(ShipmentStatus::Unknown);

        TrackingInfo::new(tracking_number, CarrierId::Estafeta, status, events)
            .map_err(validation_to_error)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EstafetaTrackingEvent {
    fecha_hora: String,
    estatus: String,
    descripcion: String,
    #[serde(default)]
    ciudad: Option<String>,
}

impl EstafetaTrackingEvent {
    fn normalize(self) -> Result<TrackingEvent, CarrierError> {
        let timestamp = UtcDateTime::parse(&self.fecha_hora).map_err(validation_to_error)?;
        let mut event = TrackingEvent::new(
            timestamp,
            map_status(&self.estatus),
            self.estatus,
            self.descripcion,
        );
        if let Some(ciudad) = self.ciudad {
            event = event.with_location(ciudad);
        }
        Ok(event)
    }
}

#[derive(Debug, Deserialize)]
struct EstafetaCancellationResponse {
    cancelado: bool,
}

#[derive(Debug, Deserialize)]
struct EstafetaAddressResponse {
    valida: bool,
    #[serde(default)]
    direccion: Option<EstafetaWireAddress>,
}

fn map_status(estatus: &str) -> ShipmentStatus {
    match estatus {
        "RECOLECTADO" | "PENDIENTE" => ShipmentStatus::Pending,
        "EN_TRANSITO" | "EN TRANSITO" => ShipmentStatus::InTransit,
        "EN_REPARTO" | "EN REPARTO" => ShipmentStatus::OutForDelivery,
        "ENTREGADO" => ShipmentStatus::Delivered,
        "DEVUELTO" => ShipmentStatus::Returned,
        "CANCELADO" => ShipmentStatus::Cancelled,
        "INCIDENCIA" => ShipmentStatus::Exception,
        _ => ShipmentStatus::Unknown,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn validation_to_error(error: ValidationError) -> CarrierError {
    CarrierError::internal(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carrier::Operation;
    use crate::{DimensionUnit, Package, WeightUnit};

    fn rate_request() -> RateRequest {
        let origin =
            Address::new("Av. Reforma 123", "CDMX", "CMX", "06600", "MX").expect("valid address");
        let destination =
            Address::new("Calle 60 45", "Merida", "YUC", "97000", "MX").expect("valid address");
        let package = Package::new(5.0, WeightUnit::Lb, 12.0, 10.0, 8.0, DimensionUnit::In)
            .expect("valid package");
        RateRequest::new(origin, destination, vec![package]).expect("valid request")
    }

    #[test]
    fn capabilities_include_cancellation_and_address_validation() {
        let adapter = EstafetaAdapter::new(CarrierConfig::default());
        assert!(adapter.capabilities().supports(Operation::Cancellation));
        assert!(adapter
            .capabilities()
            .supports(Operation::AddressValidation));
    }

    #[tokio::test]
    async fn offline_adapter_serves_marked_placeholder_rates() {
        let adapter = EstafetaAdapter::new(CarrierConfig::default());
        let rates = adapter
            .get_rates(rate_request())
            .await
            .expect("placeholder rates");

        assert_eq!(rates.len(), 2);
        for rate in &rates {
            assert_eq!(rate.carrier, CarrierId::Estafeta);
            assert_eq!(rate.metadata, Some(placeholder_metadata()));
        }
    }

    #[test]
    fn imperial_packages_are_converted_to_metric_on_the_wire() {
        let package = Package::new(5.0, WeightUnit::Lb, 12.0, 10.0, 8.0, DimensionUnit::In)
            .expect("valid package");
        let wire = EstafetaWirePackage::from_domain(&package);

        assert!((wire.peso - 2.267_96).abs() < 1e-5);
        assert!((wire.largo - 30.48).abs() < 1e-9);
        assert!((wire.ancho - 25.4).abs() < 1e-9);
        assert!((wire.alto - 20.32).abs() < 1e-9);
    }

    #[test]
    fn spanish_status_vocabulary_is_normalized() {
        assert_eq!(map_status("ENTREGADO"), ShipmentStatus::Delivered);
        assert_eq!(map_status("EN_REPARTO"), ShipmentStatus::OutForDelivery);
        assert_eq!(map_status("DEVUELTO"), ShipmentStatus::Returned);
        assert_eq!(map_status("CANCELADO"), ShipmentStatus::Cancelled);
        assert_eq!(map_status("DESCONOCIDO"), ShipmentStatus::Unknown);
    }

    #[test]
    fn validated_address_keeps_contact_fields() {
        let original = Address::new("Av. Reforma 123", "CDMX", "CMX", "06600", "MX")
            .expect("valid address")
            .with_contact("Ana Torres", "+52 55 1234 5678");
        let wire = EstafetaWireAddress {
            calle: String::from("Avenida Paseo de la Reforma 123"),
            ciudad: String::from("Ciudad de Mexico"),
            estado: String::from("CMX"),
            codigo_postal: String::from("06600"),
            pais: String::from("MX"),
        };

        let normalized = wire.into_domain(&original).expect("valid address");
        assert_eq!(normalized.street, "Avenida Paseo de la Reforma 123");
        assert_eq!(normalized.contact_name.as_deref(), Some("Ana Torres"));
        assert_eq!(normalized.phone.as_deref(), Some("+52 55 1234 5678"));
    }
}
