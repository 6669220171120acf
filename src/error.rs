use serde::{Deserialize, Serialize};

/// Stable classification of a [`RuntimeError`], independent of its payload.
///
/// Operations declare the error kinds they expect via
/// [`OperationSpec::declares`](crate::OperationSpec::declares). The dispatcher
/// compares kinds, never payloads, when deciding whether an error passes
/// through unchanged or is wrapped in [`RuntimeError::Undeclared`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Network-level failure. Transient.
    Transport,
    /// Request or operation deadline exceeded. Transient.
    Timeout,
    /// API rate limit exceeded. Transient.
    RateLimited,
    /// Login or credential failure.
    AuthenticationFailed,
    /// The provider rejected the request as unauthorized or forbidden.
    AuthorizationDenied,
    /// The addressed resource does not exist.
    NotFound,
    /// Provider-side failure (HTTP 5xx).
    ServerError,
    /// Response could not be decoded.
    Parse,
    /// Request payload could not be encoded.
    Serialization,
    /// A request parameter is invalid.
    InvalidParameter,
    /// The runtime wiring or provider configuration is unusable.
    UnsupportedConfiguration,
    /// A convergence wait gave up before its target state was reached.
    ConvergenceTimeout,
    /// Wrapper for an error kind the operation did not declare.
    Undeclared,
    /// Unclassified provider error.
    Unknown,
}

impl ErrorKind {
    /// Whether this kind belongs to the runtime's own machinery rather than
    /// the provider's domain surface.
    ///
    /// Infrastructure kinds always pass through dispatch unchanged. Declaring
    /// them on an operation is allowed but has no effect. Authentication and
    /// authorization failures count as machinery: they come from the session
    /// and signing layer, not from any one operation's contract.
    #[must_use]
    pub fn is_infrastructure(self) -> bool {
        matches!(
            self,
            Self::Transport
                | Self::Timeout
                | Self::RateLimited
                | Self::AuthenticationFailed
                | Self::AuthorizationDenied
                | Self::ServerError
                | Self::Parse
                | Self::Serialization
                | Self::UnsupportedConfiguration
                | Self::Undeclared
                | Self::Unknown
        )
    }
}

/// Unified error type for all runtime and provider operations.
///
/// Each variant includes a `provider` field identifying which provider binding
/// produced the error, plus variant-specific context. All variants are
/// serializable for structured error reporting.
///
/// # Retryable Errors
///
/// The following variants represent transient failures that may succeed on retry:
/// - [`Transport`](Self::Transport) — network connectivity issues
/// - [`Timeout`](Self::Timeout) — request timed out
/// - [`RateLimited`](Self::RateLimited) — API rate limit exceeded
///
/// The built-in HTTP transport automatically retries these with exponential backoff.
/// Use [`is_transient()`](Self::is_transient) to apply the same classification
/// in custom transports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "code")]
pub enum RuntimeError {
    /// A network-level error occurred (DNS resolution failure, connection refused, etc.).
    ///
    /// This is a transient error and is automatically retried.
    Transport {
        /// Provider that produced the error.
        provider: String,
        /// Error details.
        detail: String,
    },

    /// The request or operation deadline elapsed.
    ///
    /// This is a transient error and is automatically retried.
    Timeout {
        /// Provider that produced the error.
        provider: String,
        /// Error details.
        detail: String,
    },

    /// The API rate limit has been exceeded (HTTP 429 or equivalent).
    ///
    /// This is a transient error. The request should succeed after waiting.
    RateLimited {
        /// Provider that produced the error.
        provider: String,
        /// Suggested wait time in seconds before retrying, if provided by the API.
        retry_after: Option<u64>,
        /// Original error message from the provider API, if available.
        raw_message: Option<String>,
    },

    /// Establishing a session or validating credentials failed.
    AuthenticationFailed {
        /// Provider that produced the error.
        provider: String,
        /// Original error message from the provider API, if available.
        raw_message: Option<String>,
    },

    /// The provider rejected the request as unauthorized (HTTP 401/403),
    /// including 401 responses that persisted after session renewal.
    AuthorizationDenied {
        /// Provider that produced the error.
        provider: String,
        /// HTTP status code returned by the provider.
        status: u16,
        /// Original error message from the provider API, if available.
        raw_message: Option<String>,
    },

    /// The addressed resource was not found.
    NotFound {
        /// Provider that produced the error.
        provider: String,
        /// Description of the resource that was not found.
        resource: String,
        /// Original error message from the provider API, if available.
        raw_message: Option<String>,
    },

    /// The provider returned a server-side failure (HTTP 5xx).
    ///
    /// Gateway errors (502-504) are surfaced as [`Transport`](Self::Transport)
    /// by the built-in transport so they can be retried; this variant covers
    /// the remaining, non-transient server failures.
    ServerError {
        /// Provider that produced the error.
        provider: String,
        /// HTTP status code returned by the provider.
        status: u16,
        /// Error details.
        detail: String,
    },

    /// Failed to parse the provider's API response.
    Parse {
        /// Provider that produced the error.
        provider: String,
        /// Details about the parse failure.
        detail: String,
    },

    /// Failed to serialize a request body.
    Serialization {
        /// Provider that produced the error.
        provider: String,
        /// Details about the serialization failure.
        detail: String,
    },

    /// A request parameter is invalid (e.g., unknown operation name, malformed argument).
    InvalidParameter {
        /// Provider that produced the error.
        provider: String,
        /// Name of the invalid parameter.
        param: String,
        /// Description of what's wrong.
        detail: String,
    },

    /// The runtime configuration cannot be satisfied (e.g., unknown
    /// authentication scheme, missing session authority).
    UnsupportedConfiguration {
        /// Provider that produced the error.
        provider: String,
        /// Description of the configuration problem.
        detail: String,
    },

    /// A convergence wait exhausted its deadline before the target state
    /// was observed.
    ///
    /// Only produced by [`ConvergenceWait::require`](crate::ConvergenceWait::require);
    /// the plain wait reports timeout as `Ok(false)` instead.
    ConvergenceTimeout {
        /// Provider that produced the error.
        provider: String,
        /// Description of the state that was being waited for.
        target: String,
        /// Total time spent waiting, in seconds.
        waited_secs: u64,
    },

    /// An error of a kind the invoked operation did not declare.
    ///
    /// The original error is preserved in `source`. Infrastructure kinds
    /// (see [`ErrorKind::is_infrastructure`]) are never wrapped.
    Undeclared {
        /// Provider that produced the error.
        provider: String,
        /// Operation whose declaration was violated.
        operation: String,
        /// The original, undeclared error.
        source: Box<RuntimeError>,
    },

    /// An unrecognized error from the provider API.
    ///
    /// This is a catch-all for responses not yet mapped to a specific variant.
    Unknown {
        /// Provider that produced the error.
        provider: String,
        /// HTTP status code, if the error came from an HTTP response.
        status: Option<u16>,
        /// Raw error message from the API.
        raw_message: String,
    },
}

impl RuntimeError {
    /// Name of the provider binding that produced this error.
    #[must_use]
    pub fn provider(&self) -> &str {
        match self {
            Self::Transport { provider, .. }
            | Self::Timeout { provider, .. }
            | Self::RateLimited { provider, .. }
            | Self::AuthenticationFailed { provider, .. }
            | Self::AuthorizationDenied { provider, .. }
            | Self::NotFound { provider, .. }
            | Self::ServerError { provider, .. }
            | Self::Parse { provider, .. }
            | Self::Serialization { provider, .. }
            | Self::InvalidParameter { provider, .. }
            | Self::UnsupportedConfiguration { provider, .. }
            | Self::ConvergenceTimeout { provider, .. }
            | Self::Undeclared { provider, .. }
            | Self::Unknown { provider, .. } => provider,
        }
    }

    /// The [`ErrorKind`] discriminant for this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::AuthenticationFailed { .. } => ErrorKind::AuthenticationFailed,
            Self::AuthorizationDenied { .. } => ErrorKind::AuthorizationDenied,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::ServerError { .. } => ErrorKind::ServerError,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::Serialization { .. } => ErrorKind::Serialization,
            Self::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            Self::UnsupportedConfiguration { .. } => ErrorKind::UnsupportedConfiguration,
            Self::ConvergenceTimeout { .. } => ErrorKind::ConvergenceTimeout,
            Self::Undeclared { .. } => ErrorKind::Undeclared,
            Self::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    /// 是否为瞬态错误（网络、超时、限流），重试后可能成功。
    ///
    /// 内置 transport 对这三类错误自动做指数退避重试。
    /// **新增变体时请同步更新此方法。**
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Timeout { .. } | Self::RateLimited { .. }
        )
    }

    /// 是否为预期行为（用户输入、资源不存在等），用于日志分级。
    ///
    /// 返回 `true` 时应使用 `warn` 级别，`false` 时使用 `error` 级别。
    /// **新增变体时请同步更新此方法。**
    #[must_use]
    pub fn is_expected(&self) -> bool {
        match self {
            Self::AuthenticationFailed { .. }
            | Self::AuthorizationDenied { .. }
            | Self::NotFound { .. }
            | Self::InvalidParameter { .. }
            | Self::UnsupportedConfiguration { .. }
            | Self::ConvergenceTimeout { .. } => true,
            Self::Undeclared { source, .. } => source.is_expected(),
            _ => false,
        }
    }
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport { provider, detail } => {
                write!(f, "[{provider}] Transport error: {detail}")
            }
            Self::Timeout { provider, detail } => {
                write!(f, "[{provider}] Request timeout: {detail}")
            }
            Self::RateLimited {
                provider,
                retry_after,
                ..
            } => {
                if let Some(secs) = retry_after {
                    write!(f, "[{provider}] Rate limited (retry after {secs}s)")
                } else {
                    write!(f, "[{provider}] Rate limited")
                }
            }
            Self::AuthenticationFailed {
                provider,
                raw_message,
            } => {
                if let Some(msg) = raw_message {
                    write!(f, "[{provider}] Authentication failed: {msg}")
                } else {
                    write!(f, "[{provider}] Authentication failed")
                }
            }
            Self::AuthorizationDenied {
                provider,
                status,
                raw_message,
            } => {
                if let Some(msg) = raw_message {
                    write!(f, "[{provider}] Authorization denied (HTTP {status}): {msg}")
                } else {
                    write!(f, "[{provider}] Authorization denied (HTTP {status})")
                }
            }
            Self::NotFound {
                provider,
                resource,
                raw_message,
            } => {
                if let Some(msg) = raw_message {
                    write!(f, "[{provider}] '{resource}' not found: {msg}")
                } else {
                    write!(f, "[{provider}] '{resource}' not found")
                }
            }
            Self::ServerError {
                provider,
                status,
                detail,
            } => {
                write!(f, "[{provider}] Server error (HTTP {status}): {detail}")
            }
            Self::Parse { provider, detail } => {
                write!(f, "[{provider}] Parse error: {detail}")
            }
            Self::Serialization { provider, detail } => {
                write!(f, "[{provider}] Serialization error: {detail}")
            }
            Self::InvalidParameter {
                provider,
                param,
                detail,
            } => {
                write!(f, "[{provider}] Invalid parameter '{param}': {detail}")
            }
            Self::UnsupportedConfiguration { provider, detail } => {
                write!(f, "[{provider}] Unsupported configuration: {detail}")
            }
            Self::ConvergenceTimeout {
                provider,
                target,
                waited_secs,
            } => {
                write!(
                    f,
                    "[{provider}] '{target}' did not converge within {waited_secs}s"
                )
            }
            Self::Undeclared {
                provider,
                operation,
                source,
            } => {
                write!(f, "[{provider}] Undeclared error in '{operation}': {source}")
            }
            Self::Unknown {
                provider,
                raw_message,
                ..
            } => {
                write!(f, "[{provider}] {raw_message}")
            }
        }
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Undeclared { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// Convenience type alias for `Result<T, RuntimeError>`.
pub type Result<T> = std::result::Result<T, RuntimeError>;
