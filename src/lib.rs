//! Hierarchical geocoding and address normalization core for the PropPulse
//! real-estate data platform.
//!
//! Upstream collaborators (permit ingestion, census enrichment, property
//! scoring) hand this crate a free-text address and get back a
//! [`domain::GeocodeResult`]: coordinates, canonical postal components, a
//! confidence score, and a status tag. All provider faults are normalized
//! into the status tag; nothing at the public boundary returns an error.

pub mod cache;
pub mod common;
pub mod config;
pub mod domain;
pub mod geocoder;
pub mod observability;
pub mod parsing;
pub mod providers;
pub mod resilience;

// Re-export the types callers branch on
pub use common::error::{GeoError, Result};
pub use config::GeocoderConfig;
pub use domain::{GeocodeResult, GeocodeStatus, ParsedAddress, Precision, ProviderId};
pub use geocoder::{GeocoderStats, HierarchicalGeocoder};
