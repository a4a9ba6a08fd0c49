mod models;
mod timestamp;

pub use models::{
    Address, CarrierRate, DimensionUnit, Package, ShipmentResult, ShipmentStatus, TrackingEvent,
    TrackingInfo, WeightUnit,
};
pub use timestamp::UtcDateTime;
