//! Core data models for the boundary pipeline.

pub mod admin;
pub mod country;
pub mod layer;
pub mod schema;

pub use admin::{lang_column, AdminLevel, ADMIN_LEVEL_MAX};
pub use country::{Country, CountryRegistry, RESERVED_PREFIX};
pub use layer::{Feature, FeatureLayer, Value, WGS84};
pub use schema::{ColumnRole, SchemaDescriptor};
