//! # cloud-binding-runtime
//!
//! A table-driven invocation runtime for cloud provider HTTP APIs: typed
//! interface clients, pluggable authentication, session caching with
//! single-flight login, bounded retry on authorization failure, and
//! convergence polling for eventually-consistent resources.
//!
//! ## Authentication Schemes
//!
//! | Scheme | Configuration String | Session State |
//! |--------|---------------------|---------------|
//! | HMAC request signing (`CBR1-HMAC-SHA256`) | `request-signing` | Stateless |
//! | Session token | `session-token` | Cached per credentials, 60s default TTL |
//!
//! ## Feature Flags
//!
//! ### TLS Backend
//!
//! - **`native-tls`** *(default)* — Use the platform's native TLS implementation.
//! - **`rustls`** — Use rustls. Recommended for cross-compilation and Android targets.
//!
//! ## Quick Start
//!
//! Add to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! cloud-binding-runtime = "0.1"
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use cloud_binding_runtime::{
//!     ApiCredentials, Fallback, InterfaceDescriptor, Invocation, Method, OperationSpec,
//!     ProviderRuntime, RequestBinder, RequestSpec, Result,
//! };
//!
//! struct ServerBinder;
//!
//! impl RequestBinder for ServerBinder {
//!     fn bind(&self, invocation: &Invocation) -> Result<RequestSpec> {
//!         let spec = match invocation.arg(0).and_then(|v| v.as_str()) {
//!             Some(id) => RequestSpec::new(
//!                 Method::Get,
//!                 "https://api.examplecloud.com",
//!                 format!("/servers/{id}"),
//!             ),
//!             None => RequestSpec::new(Method::Get, "https://api.examplecloud.com", "/servers"),
//!         };
//!         Ok(spec)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // 1. Assemble a runtime for the provider
//!     let runtime = ProviderRuntime::builder("examplecloud")
//!         .credentials(ApiCredentials::new("key-id", "key-secret"))
//!         .build()?;
//!
//!     // 2. Describe the interface as an operation table
//!     let api = InterfaceDescriptor::new("ServerApi")
//!         .operation(OperationSpec::new("list_servers"))
//!         .operation(OperationSpec::new("get_server").with_fallback(Fallback::null_on_not_found()));
//!
//!     // 3. Create a client and invoke operations
//!     let client = runtime.client(api, Arc::new(ServerBinder));
//!     let servers = client.call("list_servers", &[]).await?;
//!     println!("{servers}");
//!
//!     // A missing server maps to null through the fallback instead of an error
//!     let absent = client.call("get_server", &[serde_json::json!("srv-gone")]).await?;
//!     assert!(absent.is_null());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Waiting for Convergence
//!
//! ```rust,no_run
//! # use cloud_binding_runtime::*;
//! # use std::time::Duration;
//! # async fn example(client: &InterfaceClient<PipelineDispatcher>) -> Result<()> {
//! let running = await_until(
//!     || async move {
//!         let server = client.call("get_server", &[serde_json::json!("srv-1")]).await?;
//!         Ok(server["status"] == "RUNNING")
//!     },
//!     Duration::from_secs(1),
//!     Duration::from_secs(5),
//!     Duration::from_secs(120),
//! )
//! .await?;
//! println!("running: {running}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, RuntimeError>`](RuntimeError). The error
//! enum provides structured variants for common failure modes:
//!
//! - [`RuntimeError::AuthenticationFailed`] — login rejected
//! - [`RuntimeError::AuthorizationDenied`] — request rejected (401/403)
//! - [`RuntimeError::NotFound`] — resource not found
//! - [`RuntimeError::RateLimited`] — API rate limit exceeded (retryable)
//! - [`RuntimeError::Undeclared`] — business error the operation did not declare
//!
//! Transient errors (`Transport`, `Timeout`, `RateLimited`) are automatically
//! retried with exponential backoff by the HTTP transport. A 401 under the
//! session-token scheme invalidates the cached session and retries once by
//! default. See [`RuntimeError`] for the full list.

mod auth;
mod convergence;
mod dispatch;
mod error;
mod http_client;
mod invocation;
mod resources;
mod runtime;
mod session;
mod traits;
mod types;
mod utils;

// Re-export error types
pub use error::{ErrorKind, Result, RuntimeError};

// Re-export authentication strategies
pub use auth::{
    AuthRetryPolicy, AuthScheme, HmacRequestSigner, RequestAuthenticator, SESSION_TOKEN_HEADER,
    SessionTokenAuth, UnknownAuthScheme,
};

// Re-export the invocation model
pub use invocation::{
    DEFAULT_DISPATCH_TIMEOUT, Fallback, InterfaceDescriptor, Invocation, OperationSpec,
};

// Re-export dispatch machinery
pub use dispatch::{Dispatch, InterfaceClient, PipelineDispatcher};

// Re-export runtime assembly
pub use runtime::{ProviderRuntime, RuntimeBuilder};

// Re-export session caching
pub use session::{DEFAULT_SESSION_TTL, SessionCache, SessionSupplier};

// Re-export convergence polling
pub use convergence::{ConvergenceWait, await_until};

// Re-export the incidental resource cache
pub use resources::ResourceCache;

// Re-export the HTTP transport
pub use http_client::{DEFAULT_TRANSPORT_RETRIES, HttpTransport};

// Re-export extension traits and the default parser
pub use traits::{JsonParser, RequestBinder, ResponseParser, SessionAuthority, Transport};

// Re-export wire types
pub use types::{ApiCredentials, Method, ProviderResponse, RequestSpec, SessionToken};
