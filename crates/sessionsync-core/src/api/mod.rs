//! Authenticated access to the backend.
//!
//! Both transports share one `RequestAuthenticator`, so a token refresh,
//! a 401 and a GraphQL `UNAUTHENTICATED` error are handled the same way
//! whichever client made the call:
//!
//! - `ApiClient`: JSON over HTTP
//! - `GraphQlClient`: GraphQL over HTTP POST

pub mod authenticator;
pub mod client;
pub mod error;
pub mod graphql;

pub use authenticator::{RequestAuthenticator, SESSION_ID_HEADER};
pub use client::ApiClient;
pub use error::ApiError;
pub use graphql::GraphQlClient;
