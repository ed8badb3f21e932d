//! REST API access for the eduportal backend.
//!
//! Every request goes through the [`ApiGateway`], which attaches the bearer
//! credential, refreshes it ahead of expiry, and recovers once from a 401.
//! Authentication flows live in [`auth`] and the dashboard's typed resource
//! clients in [`resources`].

pub mod auth;
pub mod cookies;
pub mod endpoints;
pub mod error;
pub mod gateway;
pub mod resources;
pub mod transport;

pub use auth::{LoginRequest, ProfileUpdate, SignupRequest};
pub use cookies::CookieJar;
pub use error::{ApiError, RefreshError};
pub use gateway::{ApiGateway, LogoutReason, SessionEvent, SessionState};
pub use reqwest::Method;
pub use transport::{ApiRequest, ApiResponse, CallOptions, FormPart, HttpTransport, RequestBody, Transport};
