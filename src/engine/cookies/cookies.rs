//! Cookie core types.
//!
//! This module defines the **type-erased jar handle** used throughout the crate
//! and the cookie data structures.
//!
//! # Concurrency model
//! - [`CookieJarHandle`] is `Arc<RwLock<dyn CookieJar + Send + Sync>>`.
//!   - Callers take a **read lock** for queries and a **write lock** for
//!     mutations. Every mutation touches exactly one record, so a single write
//!     lock acquisition is the unit of atomicity. Nothing spans two records.
//!
//! # Identity
//! A record is identified by [`CookieKey`]: its name, its domain (host-only or
//! explicit, see [`CookieDomain`]) and its path. Writing a record whose key is
//! already present replaces the old record in place and keeps its creation
//! order.
//!
//! ```rust
//! use gosub_cookie_store::cookies::{CookieDomain, CookieRecord};
//!
//! let c = CookieRecord::new("session", "abc123", CookieDomain::HostOnly("example.org".into()), "/");
//! assert!(c.domain.is_host_only());
//! assert_eq!(c.key().path, "/");
//! ```

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::engine::cookies::CookieJar;

/// A handle to a cookie jar trait.
///
/// This is a reference-counted, read/write-locked pointer to a type-erased
/// [`CookieJar`]. Obtain a **read lock** for queries and a **write lock** for
/// mutations.
pub type CookieJarHandle = Arc<RwLock<dyn CookieJar + Send + Sync>>;

/// Domain scoping of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CookieDomain {
    /// No `domain` was given: the record only matches this exact host.
    HostOnly(String),
    /// An explicit `domain`: the record matches this domain and its subdomains.
    Domain(String),
}

impl CookieDomain {
    pub fn as_str(&self) -> &str {
        match self {
            CookieDomain::HostOnly(host) => host,
            CookieDomain::Domain(domain) => domain,
        }
    }

    pub fn is_host_only(&self) -> bool {
        matches!(self, CookieDomain::HostOnly(_))
    }
}

/// The tuple that uniquely identifies a record in a jar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CookieKey {
    pub name: String,
    pub domain: CookieDomain,
    pub path: String,
}

/// A cookie as stored in a jar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieRecord {
    /// Cookie name (case-sensitive, may be empty).
    pub name: String,

    /// Cookie value, UTF-8 text stored verbatim.
    pub value: String,

    /// Host-only or explicit domain scoping.
    pub domain: CookieDomain,

    /// Normalized path, always starting with `/`.
    pub path: String,

    /// Only visible at secure scope URLs.
    pub secure: bool,

    /// Hidden from script. Never set through the script-facing API; records
    /// with this flag come from the network side of the jar.
    pub http_only: bool,

    /// Absolute expiry in milliseconds since the Unix epoch. `None` is a
    /// session cookie.
    pub expires: Option<i64>,

    /// Monotonic sequence number assigned by the jar on first insert.
    pub creation_order: u64,

    /// Jar version at which this record was last written.
    pub last_modified: u64,
}

impl CookieRecord {
    /// Creates a non-secure, script-visible session cookie. Ordering fields
    /// are assigned by the jar on insert.
    pub fn new(name: impl Into<String>, value: impl Into<String>, domain: CookieDomain, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain,
            path: path.into(),
            secure: false,
            http_only: false,
            expires: None,
            creation_order: 0,
            last_modified: 0,
        }
    }

    pub fn key(&self) -> CookieKey {
        CookieKey {
            name: self.name.clone(),
            domain: self.domain.clone(),
            path: self.path.clone(),
        }
    }

    pub fn is_expired(&self, now_millis: i64) -> bool {
        self.expires.is_some_and(|at| at <= now_millis)
    }

    pub fn list_item(&self) -> CookieListItem {
        CookieListItem {
            name: self.name.clone(),
            value: self.value.clone(),
        }
    }
}

/// What script gets to see of a cookie.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CookieListItem {
    pub name: String,
    pub value: String,
}
