//! Fleet API access layer.
//!
//! This module defines the [`Transport`] trait consumed by the live feed and
//! the [`VehiclePosition`] record it produces.  The concrete HTTP client lives
//! in [`http`].
//!
//! ## For contributors: swapping the backend
//!
//! The feed only needs a reachability probe and a raw locations payload.
//! Anything that can answer those two calls (a different REST layout, a
//! recorded fixture, a test double) can implement [`Transport`]; validation
//! and shape normalisation happen in [`position::normalize`], not in the
//! transport.

mod http;
mod position;

pub use http::HttpTransport;
pub use position::{normalize, VehiclePosition};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportError;

/// Request/response contract the live feed needs from the backend.
///
/// The feed calls these from its driver task, so implementations must be
/// [`Send`] + [`Sync`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Lightweight reachability check.  The body is ignored.
    async fn health(&self) -> Result<(), TransportError>;

    /// Fetch the current vehicle locations as raw JSON.
    async fn locations(&self) -> Result<Value, TransportError>;
}
