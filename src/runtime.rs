//! Provider runtime assembly
//!
//! A [`ProviderRuntime`] owns the pieces every dispatch needs: one
//! authenticator chosen at build time, one transport, one parser, one retry
//! policy, and (under the session scheme) one session cache. It is a plain
//! value owned by the orchestration context; nothing here is process-global,
//! and independent runtimes never share session state.
//!
//! Wiring-time mistakes (an unknown scheme string, a session scheme without a
//! login collaborator) surface as
//! [`RuntimeError::UnsupportedConfiguration`] from [`RuntimeBuilder::build`],
//! not as panics or first-request failures.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::{
    AuthRetryPolicy, AuthScheme, HmacRequestSigner, RequestAuthenticator, SessionTokenAuth,
};
use crate::dispatch::{InterfaceClient, PipelineDispatcher};
use crate::error::{Result, RuntimeError};
use crate::http_client::HttpTransport;
use crate::invocation::InterfaceDescriptor;
use crate::session::{SessionCache, SessionSupplier};
use crate::traits::{JsonParser, RequestBinder, ResponseParser, SessionAuthority, Transport};
use crate::types::ApiCredentials;

// ============ Provider Runtime ============

/// Assembled per-provider runtime handing out [`InterfaceClient`]s.
///
/// Clients created from the same runtime share its authenticator, transport,
/// parser and session cache, so two clients for the same interface and binder
/// compare equal.
#[derive(Clone)]
pub struct ProviderRuntime {
    provider: String,
    authenticator: Arc<dyn RequestAuthenticator>,
    transport: Arc<dyn Transport>,
    parser: Arc<dyn ResponseParser>,
    retry_policy: AuthRetryPolicy,
    sessions: Option<Arc<SessionCache>>,
}

impl ProviderRuntime {
    /// Start building a runtime for `provider`.
    pub fn builder(provider: impl Into<String>) -> RuntimeBuilder {
        RuntimeBuilder::new(provider)
    }

    /// Provider name this runtime is bound to.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Authentication scheme selected at build time.
    pub fn scheme(&self) -> AuthScheme {
        self.authenticator.scheme()
    }

    /// The session cache, when the session-token scheme is active.
    pub fn sessions(&self) -> Option<&Arc<SessionCache>> {
        self.sessions.as_ref()
    }

    /// Create a client for `descriptor`, binding requests with `binder`.
    pub fn client(
        &self,
        descriptor: InterfaceDescriptor,
        binder: Arc<dyn RequestBinder>,
    ) -> InterfaceClient<PipelineDispatcher> {
        let dispatcher = PipelineDispatcher::new(
            self.provider.clone(),
            binder,
            self.authenticator.clone(),
            self.transport.clone(),
            self.parser.clone(),
            self.retry_policy,
        );
        InterfaceClient::new(descriptor, dispatcher)
    }
}

impl std::fmt::Debug for ProviderRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRuntime")
            .field("provider", &self.provider)
            .field("scheme", &self.scheme())
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

// ============ Runtime Builder ============

/// Builder for [`ProviderRuntime`].
///
/// The scheme is configured as a string (the form it takes in configuration
/// files) and parsed at [`build`](Self::build); defaults to request signing.
pub struct RuntimeBuilder {
    provider: String,
    scheme: String,
    credentials: Option<ApiCredentials>,
    authority: Option<Arc<dyn SessionAuthority>>,
    session_ttl: Option<Duration>,
    transport: Option<Arc<dyn Transport>>,
    parser: Option<Arc<dyn ResponseParser>>,
    retry_policy: AuthRetryPolicy,
}

impl RuntimeBuilder {
    /// Start a builder for `provider` with the request-signing scheme.
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            scheme: AuthScheme::RequestSigning.as_str().to_string(),
            credentials: None,
            authority: None,
            session_ttl: None,
            transport: None,
            parser: None,
            retry_policy: AuthRetryPolicy::default(),
        }
    }

    /// Select the authentication scheme by configuration string
    /// (`"request-signing"` or `"session-token"`).
    #[must_use]
    pub fn auth_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Credentials used by whichever scheme is selected. Required.
    #[must_use]
    pub fn credentials(mut self, credentials: ApiCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Login collaborator for the session-token scheme.
    #[must_use]
    pub fn session_authority(mut self, authority: Arc<dyn SessionAuthority>) -> Self {
        self.authority = Some(authority);
        self
    }

    /// TTL applied to sessions whose token does not report one.
    #[must_use]
    pub fn session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = Some(ttl);
        self
    }

    /// Replace the default HTTP transport.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replace the default JSON response parser.
    #[must_use]
    pub fn parser(mut self, parser: Arc<dyn ResponseParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Retry policy applied to 401 responses under the session scheme.
    #[must_use]
    pub fn retry_policy(mut self, policy: AuthRetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Validate the configuration and assemble the runtime.
    ///
    /// # Errors
    /// Returns [`RuntimeError::UnsupportedConfiguration`] for an unknown
    /// scheme string, missing credentials, or a session scheme without a
    /// session authority.
    pub fn build(self) -> Result<ProviderRuntime> {
        let provider = self.provider;

        let scheme: AuthScheme =
            self.scheme
                .parse()
                .map_err(|e| RuntimeError::UnsupportedConfiguration {
                    provider: provider.clone(),
                    detail: format!("{e}"),
                })?;

        let Some(credentials) = self.credentials else {
            return Err(RuntimeError::UnsupportedConfiguration {
                provider,
                detail: "credentials are required".to_string(),
            });
        };

        let (authenticator, sessions): (Arc<dyn RequestAuthenticator>, Option<Arc<SessionCache>>) =
            match scheme {
                AuthScheme::RequestSigning => (
                    Arc::new(HmacRequestSigner::new(provider.clone(), credentials)),
                    None,
                ),
                AuthScheme::SessionToken => {
                    let Some(authority) = self.authority else {
                        return Err(RuntimeError::UnsupportedConfiguration {
                            provider,
                            detail: "session-token scheme requires a session authority"
                                .to_string(),
                        });
                    };

                    let mut cache = SessionCache::new(provider.clone(), authority);
                    if let Some(ttl) = self.session_ttl {
                        cache = cache.with_ttl(ttl);
                    }
                    let cache = Arc::new(cache);
                    let supplier = SessionSupplier::new(cache.clone(), credentials);
                    (Arc::new(SessionTokenAuth::new(supplier)), Some(cache))
                }
            };

        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(HttpTransport::new(provider.clone())));
        let parser = self
            .parser
            .unwrap_or_else(|| Arc::new(JsonParser::new(provider.clone())));

        log::debug!("[{provider}] Runtime assembled ({scheme} authentication)");

        Ok(ProviderRuntime {
            provider,
            authenticator,
            transport,
            parser,
            retry_policy: self.retry_policy,
            sessions,
        })
    }
}
