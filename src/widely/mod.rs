//! Widely MVNO integration.
//!
//! Layers, leaf first:
//! - [`auth`]: per-request chained MD5 signature
//! - [`client`]: signed JSON POST transport ([`WidelyApi`] / [`WidelyClient`])
//! - [`validate`]: parameter presence and response success/data checks
//! - [`actions`]: typed device actions and the single dispatch path
//! - [`operations`]: the call-sites the back office uses
//!
//! Failures are typed as [`WidelyError`] and never recovered inside this
//! module; callers decide what to do with them.

pub mod actions;
pub mod auth;
pub mod client;
pub mod error;
pub mod operations;
pub mod types;
pub mod validate;

pub use actions::{ActionDispatcher, DeviceAction, NetworkPreference};
pub use auth::{AuthSigner, AuthTriple};
pub use client::{WidelyApi, WidelyClient, WidelyEndpoint};
pub use error::WidelyError;
pub use operations::MobileService;
pub use types::{EndpointId, ErrorCode, Payload, RemoteCall, RemoteOutcome, RemoteResult};
pub use validate::{validate_required_params, validate_widely_result};
