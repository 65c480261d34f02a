//! Type definitions for the HTTP API

pub mod request;
pub mod response;

pub use request::{ModelQuery, PredictRequest};
pub use response::{
    ErrorResponse, ExampleRequest, FeatureGroups, HealthResponse, ModelInfoResponse,
    ModelListItem, ModelListResponse, PredictResponse, SchemaResponse,
};
