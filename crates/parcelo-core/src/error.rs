use thiserror::Error;

/// Validation and contract errors exposed by `parcelo-core`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("address field '{field}' cannot be empty")]
    EmptyAddressField { field: &'static str },

    #[error("shipment request must include at least one package")]
    EmptyPackages,
    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("field '{field}' must be positive")]
    NonPositiveValue { field: &'static str },
    #[error("field '{field}' must be non-negative")]
    NegativeValue { field: &'static str },

    #[error("invalid carrier '{value}', expected one of dhl, fedex, ups, estafeta")]
    InvalidCarrier { value: String },
    #[error("invalid rule action '{value}'")]
    InvalidRuleAction { value: String },
    #[error("currency must be a 3-letter uppercase ISO code: '{value}'")]
    InvalidCurrency { value: String },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },

    #[error("tracking number cannot be empty")]
    EmptyTrackingNumber,
    #[error("service code cannot be empty")]
    EmptyServiceCode,

    #[error("margin multiplier must be >= 1.0: {value}")]
    InvalidMarginMultiplier { value: f64 },
}

/// Top-level error type for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
