//! Request and Response models for the sidecar API
//!
//! DTOs used for serializing/deserializing HTTP request and response bodies.

pub mod requests;
pub mod responses;

pub use requests::OperationRequest;
pub use responses::{
    ClearResponse, ConnectivityResponse, DropResponse, HealthResponse,
    InvalidateResponse, QueueResponse, ReadResponse,
};
