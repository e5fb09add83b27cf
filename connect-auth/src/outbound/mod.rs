//! Calls from the add-on to a tenant's host.
//!
//! [`HostClient`] signs requests with a short-lived JWT per call.
//! [`AccessTokenProvider`] obtains bearer tokens for hosts that use the
//! client-credentials flow instead.

mod access_token;
mod host_client;

pub use access_token::{AccessToken, AccessTokenProvider, scope_key};
pub use host_client::{HostBody, HostClient, HostRequest, MultipartField};
