use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::Result;
use crate::traits::SessionAuthority;
use crate::types::{ApiCredentials, SessionToken};

/// Default validity window for cached sessions whose token does not report
/// its own TTL.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(60);

struct CachedSession {
    token: SessionToken,
    expires_at: Instant,
}

/// 每个凭证一个 slot，slot 锁在 login 期间持有以实现 single-flight。
type Slot = Arc<Mutex<Option<CachedSession>>>;

/// Cache of provider sessions keyed by credentials.
///
/// Sessions are expensive to establish, so the cache guarantees that for any
/// credential pair at most one login is in flight at a time: concurrent
/// callers needing the same session wait for the first login and share its
/// token. Entries expire after their TTL and can be invalidated explicitly,
/// e.g. when the provider rejects a token with HTTP 401.
///
/// Failed logins are never cached; each subsequent call triggers a fresh
/// attempt.
pub struct SessionCache {
    provider: String,
    authority: Arc<dyn SessionAuthority>,
    default_ttl: Duration,
    slots: Mutex<HashMap<ApiCredentials, Slot>>,
}

impl SessionCache {
    /// Create a cache that logs in through `authority`, with the default
    /// 60 second TTL.
    pub fn new(provider: impl Into<String>, authority: Arc<dyn SessionAuthority>) -> Self {
        Self {
            provider: provider.into(),
            authority,
            default_ttl: DEFAULT_SESSION_TTL,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Override the TTL applied to tokens that do not report their own
    /// validity window.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Get a valid session token for `credentials`, logging in if the cache
    /// has no fresh entry.
    ///
    /// Login failures propagate to every caller waiting on the same entry
    /// and leave the cache unchanged.
    pub async fn get(&self, credentials: &ApiCredentials) -> Result<SessionToken> {
        let slot = self.slot(credentials).await;
        let mut guard = slot.lock().await;

        if let Some(cached) = guard.as_ref() {
            if Instant::now() < cached.expires_at {
                log::debug!(
                    "[{}] Session cache hit for '{}'",
                    self.provider,
                    credentials.identity
                );
                return Ok(cached.token.clone());
            }
            log::debug!(
                "[{}] Session for '{}' expired, logging in again",
                self.provider,
                credentials.identity
            );
            *guard = None;
        }

        // slot 锁跨越整个 login：同凭证的并发调用在上面 lock() 处排队，
        // 第一个完成后其余直接命中缓存。
        let token = match self.authority.login(credentials).await {
            Ok(token) => token,
            Err(e) => {
                if e.is_expected() {
                    log::warn!(
                        "[{}] Login failed for '{}': {e}",
                        self.provider,
                        credentials.identity
                    );
                } else {
                    log::error!(
                        "[{}] Login failed for '{}': {e}",
                        self.provider,
                        credentials.identity
                    );
                }
                return Err(e);
            }
        };

        let ttl = if token.ttl.is_zero() {
            self.default_ttl
        } else {
            token.ttl
        };
        log::debug!(
            "[{}] New session for '{}' (ttl {}s)",
            self.provider,
            credentials.identity,
            ttl.as_secs()
        );
        *guard = Some(CachedSession {
            token: token.clone(),
            expires_at: Instant::now() + ttl,
        });
        Ok(token)
    }

    /// Drop the cached session for `credentials`, if any.
    ///
    /// The next [`get`](Self::get) for the same credentials performs a fresh
    /// login. Invalidating an absent entry is a no-op.
    pub async fn invalidate(&self, credentials: &ApiCredentials) {
        let slot = { self.slots.lock().await.get(credentials).cloned() };
        if let Some(slot) = slot {
            let mut guard = slot.lock().await;
            if guard.take().is_some() {
                log::debug!(
                    "[{}] Session for '{}' invalidated",
                    self.provider,
                    credentials.identity
                );
            }
        }
    }

    /// Provider name this cache reports errors under.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    async fn slot(&self, credentials: &ApiCredentials) -> Slot {
        let mut slots = self.slots.lock().await;
        slots.entry(credentials.clone()).or_default().clone()
    }
}

/// A [`SessionCache`] bound to one credential pair.
///
/// Authenticators hold a supplier instead of raw credentials so every token
/// access and invalidation goes through the shared cache.
#[derive(Clone)]
pub struct SessionSupplier {
    cache: Arc<SessionCache>,
    credentials: ApiCredentials,
}

impl SessionSupplier {
    /// Bind `credentials` to `cache`.
    pub fn new(cache: Arc<SessionCache>, credentials: ApiCredentials) -> Self {
        Self { cache, credentials }
    }

    /// Current valid token for the bound credentials, logging in if needed.
    pub async fn current(&self) -> Result<SessionToken> {
        self.cache.get(&self.credentials).await
    }

    /// Invalidate the cached session for the bound credentials.
    pub async fn invalidate(&self) {
        self.cache.invalidate(&self.credentials).await;
    }

    /// The bound credentials.
    pub fn credentials(&self) -> &ApiCredentials {
        &self.credentials
    }
}
