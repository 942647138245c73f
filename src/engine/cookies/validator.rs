//! Write validation.
//!
//! Turns a `set`/`delete` request coming from an [`ExecutionContext`] into a
//! canonical [`CookieRecord`], or rejects it. Nothing in here touches the jar;
//! committing the record is done by the [`CookieService`](super::CookieService)
//! so that the jar lock is held only for the single upsert.

use url::Host;

use crate::engine::config::CookieStoreConfig;
use crate::engine::context::ExecutionContext;
use crate::engine::cookies::cookies::{CookieDomain, CookieRecord};
use crate::engine::cookies::expires::Expires;
use crate::engine::errors::CookieError;

const SECURE_PREFIX: &str = "__Secure-";
const HOST_PREFIX: &str = "__Host-";

/// Value written by `delete`. The record is removed, so it is never observed.
pub(crate) const DELETE_SENTINEL: &str = "";

/// Options for `set`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Explicit domain. `None` makes a host-only cookie.
    pub domain: Option<String>,
    /// Defaults to `/`.
    pub path: Option<String>,
    /// `None` makes a session cookie.
    pub expires: Option<Expires>,
    /// Defaults to whether the calling context is secure.
    pub secure: Option<bool>,
}

impl SetOptions {
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn expires(mut self, expires: impl Into<Expires>) -> Self {
        self.expires = Some(expires.into());
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = Some(secure);
        self
    }
}

/// Options for `delete`. Domain and path must match the record being removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    pub domain: Option<String>,
    pub path: Option<String>,
    pub secure: Option<bool>,
}

impl DeleteOptions {
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = Some(secure);
        self
    }
}

impl From<DeleteOptions> for SetOptions {
    fn from(opts: DeleteOptions) -> Self {
        SetOptions {
            domain: opts.domain,
            path: opts.path,
            // The epoch is always in the past, so the write removes the record.
            expires: Some(Expires::EpochMillis(0)),
            secure: opts.secure,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteIntent {
    Set,
    Delete,
}

/// Validates a `set` request and produces the record to store.
pub fn validate_set(
    ctx: &ExecutionContext,
    config: &CookieStoreConfig,
    now_millis: i64,
    name: &str,
    value: &str,
    options: &SetOptions,
) -> Result<CookieRecord, CookieError> {
    validate(ctx, config, now_millis, name, value, options, WriteIntent::Set)
}

/// Validates a `delete` request. The returned record is already expired, so
/// upserting it removes the matching record.
pub fn validate_delete(
    ctx: &ExecutionContext,
    config: &CookieStoreConfig,
    now_millis: i64,
    name: &str,
    options: &DeleteOptions,
) -> Result<CookieRecord, CookieError> {
    let options = SetOptions::from(options.clone());
    validate(ctx, config, now_millis, name, DELETE_SENTINEL, &options, WriteIntent::Delete)
}

fn validate(
    ctx: &ExecutionContext,
    config: &CookieStoreConfig,
    now_millis: i64,
    name: &str,
    value: &str,
    options: &SetOptions,
    intent: WriteIntent,
) -> Result<CookieRecord, CookieError> {
    validate_name_value(name, value, intent)?;

    if name.len() + value.len() > config.max_name_value_bytes {
        return Err(CookieError::LimitExceeded(format!(
            "name and value exceed {} bytes",
            config.max_name_value_bytes
        )));
    }

    let path = normalize_path(options.path.as_deref(), config)?;
    let domain = resolve_domain(ctx, options.domain.as_deref(), config)?;
    let secure = resolve_secure(ctx, options.secure)?;
    check_prefixes(ctx, name, secure, &path, &domain)?;

    let expires = match &options.expires {
        Some(expires) => {
            let at = expires.to_epoch_millis()?;
            let cap = now_millis.saturating_add(config.max_expiry_age_millis());
            Some(at.min(cap))
        }
        None => None,
    };

    let mut record = CookieRecord::new(name, value, domain, path);
    record.secure = secure;
    record.expires = expires;
    Ok(record)
}

fn validate_name_value(name: &str, value: &str, intent: WriteIntent) -> Result<(), CookieError> {
    if name.contains(';') {
        return Err(CookieError::Validation("name must not contain ';'".into()));
    }
    if name.contains('=') {
        return Err(CookieError::Validation("name must not contain '='".into()));
    }
    if value.contains(';') {
        return Err(CookieError::Validation("value must not contain ';'".into()));
    }
    if name.chars().any(is_forbidden_control) || value.chars().any(is_forbidden_control) {
        return Err(CookieError::Validation("name and value must not contain control characters".into()));
    }
    if name.is_empty() {
        if value.contains('=') {
            return Err(CookieError::Validation(
                "value must not contain '=' when name is empty".into(),
            ));
        }
        if intent == WriteIntent::Set && value.is_empty() {
            return Err(CookieError::Validation("name and value must not both be empty".into()));
        }
    }
    Ok(())
}

fn is_forbidden_control(c: char) -> bool {
    (c.is_ascii_control() && c != '\t') || c == '\u{7f}'
}

/// Checks the `path` option and appends a trailing `/` when missing.
fn normalize_path(path: Option<&str>, config: &CookieStoreConfig) -> Result<String, CookieError> {
    let Some(path) = path else {
        return Ok("/".to_string());
    };

    if !path.starts_with('/') {
        return Err(CookieError::Validation(format!("path '{path}' must start with '/'")));
    }
    if path.contains('?') || path.contains('#') {
        return Err(CookieError::Validation(format!(
            "path '{path}' must not contain a query or fragment"
        )));
    }
    if path.contains(';') || path.chars().any(is_forbidden_control) {
        return Err(CookieError::Validation(format!("path '{path}' contains forbidden characters")));
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err(CookieError::Validation(format!("path '{path}' must not contain '..' segments")));
    }

    let mut normalized = path.to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }

    if normalized.len() > config.max_attribute_bytes {
        return Err(CookieError::LimitExceeded(format!(
            "path exceeds {} bytes",
            config.max_attribute_bytes
        )));
    }

    Ok(normalized)
}

fn resolve_domain(
    ctx: &ExecutionContext,
    domain: Option<&str>,
    config: &CookieStoreConfig,
) -> Result<CookieDomain, CookieError> {
    let host = ctx.host();
    if host.is_empty() {
        return Err(CookieError::Validation(format!(
            "context url '{}' has no host to scope cookies to",
            ctx.url()
        )));
    }

    let Some(domain) = domain else {
        return Ok(CookieDomain::HostOnly(host.to_string()));
    };

    if domain.is_empty() {
        return Err(CookieError::Validation("domain must not be empty".into()));
    }
    if domain.starts_with('.') {
        return Err(CookieError::Validation(format!("domain '{domain}' must not start with '.'")));
    }
    if domain.contains(';') || domain.chars().any(is_forbidden_control) {
        return Err(CookieError::Validation(format!("domain '{domain}' contains forbidden characters")));
    }
    if domain.len() > config.max_attribute_bytes {
        return Err(CookieError::LimitExceeded(format!(
            "domain exceeds {} bytes",
            config.max_attribute_bytes
        )));
    }

    let domain = domain.to_ascii_lowercase();
    if domain == host {
        return Ok(CookieDomain::Domain(domain));
    }

    let host_is_ip = matches!(ctx.url().host(), Some(Host::Ipv4(_)) | Some(Host::Ipv6(_)));
    let is_superdomain = host.ends_with(&format!(".{domain}"));
    if host_is_ip || !is_superdomain || !domain.contains('.') {
        return Err(CookieError::DomainScope {
            domain,
            host: host.to_string(),
        });
    }

    Ok(CookieDomain::Domain(domain))
}

fn resolve_secure(ctx: &ExecutionContext, secure: Option<bool>) -> Result<bool, CookieError> {
    match secure {
        Some(true) if !ctx.is_secure() => Err(CookieError::InsecureContext),
        Some(secure) => Ok(secure),
        None => Ok(ctx.is_secure()),
    }
}

fn has_prefix_ignore_case(name: &str, prefix: &str) -> bool {
    name.len() >= prefix.len()
        && name.is_char_boundary(prefix.len())
        && name[..prefix.len()].eq_ignore_ascii_case(prefix)
}

fn check_prefixes(
    ctx: &ExecutionContext,
    name: &str,
    secure: bool,
    path: &str,
    domain: &CookieDomain,
) -> Result<(), CookieError> {
    let host_prefixed = has_prefix_ignore_case(name, HOST_PREFIX);
    if !host_prefixed && !has_prefix_ignore_case(name, SECURE_PREFIX) {
        return Ok(());
    }

    if !secure || !ctx.is_secure() {
        return Err(CookieError::PrefixViolation(format!(
            "'{name}' requires a secure cookie set from a secure context"
        )));
    }

    if host_prefixed {
        if !domain.is_host_only() {
            return Err(CookieError::PrefixViolation(format!("'{name}' must not specify a domain")));
        }
        if path != "/" {
            return Err(CookieError::PrefixViolation(format!("'{name}' requires path '/'")));
        }
    }

    Ok(())
}
