//! Read matching.
//!
//! Resolves `get`/`getAll` style queries against a jar. A query is resolved
//! into a [`CookieQuery`]: an absolute scope URL plus an optional name filter.
//! A record matches when it is script-visible, unexpired, and in scope:
//!
//! - host-only records need the scope host to equal their host, explicit
//!   domain records need it to equal the domain or be a subdomain of it;
//! - the record path must path-match the scope path (RFC 6265 §5.1.4);
//! - secure records are only visible at secure scope URLs;
//! - the name matches per [`MatchType`] (no filter matches every name).
//!
//! Matches are ordered by path length, longest first, then by creation order.

use std::cmp::Reverse;

use url::Url;

use crate::engine::context::{is_secure_url, ExecutionContext};
use crate::engine::cookies::cookies::{CookieDomain, CookieListItem, CookieRecord};
use crate::engine::cookies::CookieJar;
use crate::engine::errors::CookieError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MatchType {
    #[default]
    Equals,
    StartsWith,
}

/// Options for `get`, `getAll` and observer interests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct GetOptions {
    pub name: Option<String>,
    pub match_type: MatchType,
    /// Scope URL, absolute or relative to the context URL.
    pub url: Option<String>,
}

impl GetOptions {
    /// Matches cookies named exactly `name`.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Matches cookies whose name starts with `prefix`.
    pub fn starts_with(prefix: impl Into<String>) -> Self {
        Self {
            name: Some(prefix.into()),
            match_type: MatchType::StartsWith,
            url: None,
        }
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// A resolved query: what to look for, and where.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CookieQuery {
    pub name: Option<String>,
    pub match_type: MatchType,
    pub scope: Url,
}

impl CookieQuery {
    /// Resolves `options` against the calling context.
    pub fn resolve(ctx: &ExecutionContext, options: &GetOptions) -> Result<Self, CookieError> {
        Ok(Self {
            name: options.name.clone(),
            match_type: options.match_type,
            scope: ctx.resolve_scope(options.url.as_deref())?,
        })
    }

    /// Every script-visible cookie at `scope`.
    pub fn all_at(scope: Url) -> Self {
        Self {
            name: None,
            match_type: MatchType::Equals,
            scope,
        }
    }

    pub fn name_matches(&self, name: &str) -> bool {
        match (&self.name, self.match_type) {
            (None, _) => true,
            (Some(filter), MatchType::Equals) => name == filter,
            (Some(filter), MatchType::StartsWith) => name.starts_with(filter.as_str()),
        }
    }

    pub fn matches(&self, record: &CookieRecord, now_millis: i64) -> bool {
        self.name_matches(&record.name) && visible_at(record, &self.scope, now_millis)
    }

    /// Runs the query, returning matches in read order.
    pub fn run<'j>(&self, jar: &'j dyn CookieJar, now_millis: i64) -> Vec<&'j CookieRecord> {
        let mut matches: Vec<&CookieRecord> = jar.iter().filter(|c| self.matches(c, now_millis)).collect();
        sort_for_read(&mut matches);
        matches
    }

    pub fn list(&self, jar: &dyn CookieJar, now_millis: i64) -> Vec<CookieListItem> {
        self.run(jar, now_millis).into_iter().map(CookieRecord::list_item).collect()
    }
}

/// Longest path first, then earliest created first.
pub fn sort_for_read(records: &mut [&CookieRecord]) {
    records.sort_by_key(|c| (Reverse(c.path.len()), c.creation_order));
}

/// Is `record` visible to script at `scope`?
pub fn visible_at(record: &CookieRecord, scope: &Url, now_millis: i64) -> bool {
    if record.http_only || record.is_expired(now_millis) {
        return false;
    }
    if record.secure && !is_secure_url(scope) {
        return false;
    }

    let host = scope.host_str().unwrap_or_default();
    domain_matches(&record.domain, host) && path_matches(&record.path, scope.path())
}

pub fn domain_matches(domain: &CookieDomain, host: &str) -> bool {
    match domain {
        CookieDomain::HostOnly(h) => host == h,
        CookieDomain::Domain(d) => host == d || host.ends_with(&format!(".{d}")),
    }
}

/// RFC 6265 path-match: equal paths, or a prefix that ends at a `/` boundary.
pub fn path_matches(cookie_path: &str, request_path: &str) -> bool {
    if cookie_path == request_path {
        return true;
    }
    if !request_path.starts_with(cookie_path) {
        return false;
    }
    cookie_path.ends_with('/') || request_path[cookie_path.len()..].starts_with('/')
}
