//! Carrier adapter implementations.

mod dhl;
mod estafeta;
mod fedex;
mod ups;

pub use dhl::DhlAdapter;
pub use estafeta::EstafetaAdapter;
pub use fedex::FedexAdapter;
pub use ups::UpsAdapter;

use serde_json::{json, Value};

use crate::carrier::CarrierError;
use crate::http_client::HttpError;
use crate::registry::CarrierId;

/// Maps a transport-level failure onto the carrier error taxonomy.
fn transport_error(carrier: CarrierId, error: HttpError) -> CarrierError {
    if error.retryable() {
        CarrierError::unavailable(format!("{carrier} transport error: {}", error.message()))
    } else {
        CarrierError::internal(format!("{carrier} transport error: {}", error.message()))
    }
}

/// Maps a non-2xx upstream status onto the carrier error taxonomy.
///
/// Client errors are carrier rejections of the request content and are not
/// retried; everything else counts against the carrier's availability.
fn upstream_error(carrier: CarrierId, status: u16, body: &str) -> CarrierError {
    let detail = body.trim();
    let detail = if detail.is_empty() { "<empty body>" } else { detail };
    match status {
        404 => CarrierError::not_found(format!("{carrier} has no record (status 404): {detail}")),
        400..=499 => CarrierError::rejected(format!(
            "{carrier} rejected the request (status {status}): {detail}"
        )),
        _ => CarrierError::unavailable(format!(
            "{carrier} upstream returned status {status}: {detail}"
        )),
    }
}

fn decode_error(carrier: CarrierId, context: &str, error: serde_json::Error) -> CarrierError {
    CarrierError::internal(format!("{carrier} {context} payload malformed: {error}"))
}

/// Marker attached to placeholder data served while credentials are missing
/// or the no-op transport is in use.
fn placeholder_metadata() -> Value {
    json!({ "mock": true })
}

/// Stable per-request seed so placeholder quotes are deterministic for the
/// same origin/destination pair.
fn postal_seed(origin: &str, destination: &str) -> u64 {
    origin
        .bytes()
        .chain(destination.bytes())
        .fold(17_u64, |acc, byte| {
            acc.wrapping_mul(31).wrapping_add(u64::from(byte))
        })
}
