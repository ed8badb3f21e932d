//! Core library for eduportal.
//!
//! Holds the bearer credential for the educational platform's admin
//! backend and wraps every outbound call with the refresh policy:
//!
//! - [`auth`]: credential store, durable storage backends, token claims
//! - [`api`]: the gateway, authentication flows and dashboard resources
//! - [`config`]: persisted client configuration

pub mod api;
pub mod auth;
pub mod config;

pub use api::{ApiError, ApiGateway, CallOptions, SessionEvent, SessionState};
pub use auth::{Credential, CredentialStore, UserProfile};
pub use config::Config;
