//! Execution contexts.
//!
//! An [`ExecutionContext`] is whatever runs script against the cookie store: a
//! document or a worker. It carries the URL the context was created for, which
//! determines the calling origin, whether the context is secure, and the
//! default scope used by reads and observers when no explicit `url` is given.
//!
//! Cookie access can be switched off per context (the host's permission
//! system does this). A context without cookie access sees an empty jar and
//! cannot write.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use url::{Host, Url};
use uuid::Uuid;

use crate::engine::errors::CookieError;

/// A unique identifier for an execution context, represented as a UUID.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(Uuid);

impl ContextId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of context this is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextKind {
    /// A document; reads default to the directory of the document URL.
    Document,
    /// A worker registered for `scope`; reads default to the scope URL.
    Worker { scope: Url },
}

#[derive(Debug)]
pub struct ExecutionContext {
    id: ContextId,
    url: Url,
    kind: ContextKind,
    cookie_access: AtomicBool,
}

impl ExecutionContext {
    /// Creates a document context for `url`.
    pub fn document(url: Url) -> Self {
        Self {
            id: ContextId::new(),
            url,
            kind: ContextKind::Document,
            cookie_access: AtomicBool::new(true),
        }
    }

    /// Creates a worker context running `script_url`, registered for `scope`.
    ///
    /// The scope must be same-origin with the script.
    pub fn worker(script_url: Url, scope: Url) -> Result<Self, CookieError> {
        if scope.origin() != script_url.origin() {
            return Err(CookieError::Validation(format!(
                "worker scope '{scope}' is not same-origin with '{script_url}'"
            )));
        }

        Ok(Self {
            id: ContextId::new(),
            url: script_url,
            kind: ContextKind::Worker { scope: strip_query(scope) },
            cookie_access: AtomicBool::new(true),
        })
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn kind(&self) -> &ContextKind {
        &self.kind
    }

    pub fn origin(&self) -> url::Origin {
        self.url.origin()
    }

    /// Host of the calling origin, lowercased by the URL parser.
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// Secure contexts are `https`/`wss` origins and loopback hosts.
    pub fn is_secure(&self) -> bool {
        is_secure_url(&self.url)
    }

    pub fn cookie_access_allowed(&self) -> bool {
        self.cookie_access.load(Ordering::SeqCst)
    }

    /// Returns the previous setting.
    pub(crate) fn set_cookie_access(&self, allowed: bool) -> bool {
        self.cookie_access.swap(allowed, Ordering::SeqCst)
    }

    /// Scope used when a read or an interest does not name a `url`.
    pub fn default_scope(&self) -> Url {
        match &self.kind {
            ContextKind::Document => {
                let mut scope = strip_query(self.url.clone());
                let dir = directory_of(scope.path()).to_string();
                scope.set_path(&dir);
                scope
            }
            ContextKind::Worker { scope } => scope.clone(),
        }
    }

    /// Resolves an optional `url` option into an absolute scope URL.
    ///
    /// Relative URLs are resolved against the context URL. The result must be
    /// same-origin with the context.
    pub fn resolve_scope(&self, url: Option<&str>) -> Result<Url, CookieError> {
        let Some(raw) = url else {
            return Ok(self.default_scope());
        };

        let resolved = self
            .url
            .join(raw)
            .map_err(|e| CookieError::Validation(format!("invalid url '{raw}': {e}")))?;

        if resolved.origin() != self.origin() {
            return Err(CookieError::Validation(format!(
                "url '{resolved}' is not same-origin with '{}'",
                self.url
            )));
        }

        Ok(strip_query(resolved))
    }
}

pub(crate) fn is_secure_url(url: &Url) -> bool {
    if matches!(url.scheme(), "https" | "wss") {
        return true;
    }

    match url.host() {
        Some(Host::Domain(d)) => d == "localhost" || d.ends_with(".localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

/// "/a/b/page.html" -> "/a/b/". Paths without a slash map to "/".
pub(crate) fn directory_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[..=i],
        None => "/",
    }
}

fn strip_query(mut url: Url) -> Url {
    url.set_query(None);
    url.set_fragment(None);
    url
}
