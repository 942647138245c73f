//! Script-facing cookie store.
//!
//! A [`CookieStore`] is what one execution context sees of its origin's
//! cookies. It is a thin handle: the [`CookieService`] it points at owns the
//! jar and the change notifier, and the context decides default scopes,
//! secure defaults and whether cookie access is allowed at all.
//!
//! Every operation is `async` and yields to the scheduler before touching the
//! jar, so results are never produced synchronously within the call.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gosub_cookie_store::config::CookieStoreConfig;
//! use gosub_cookie_store::context::ExecutionContext;
//! use gosub_cookie_store::cookies::{CookieService, GetOptions, SetOptions};
//!
//! # async fn demo() -> Result<(), gosub_cookie_store::errors::CookieError> {
//! let service = CookieService::new(CookieStoreConfig::default(), tokio::runtime::Handle::current());
//! let url = url::Url::parse("https://example.org/app/index.html").unwrap();
//! let store = service.store_for(ExecutionContext::document(url));
//!
//! store.set("theme", "dark", SetOptions::default().path("/app")).await?;
//! let theme = store.get("theme", GetOptions::default()).await?;
//! assert_eq!(theme.map(|c| c.value).as_deref(), Some("dark"));
//! # Ok(()) }
//! ```

use std::sync::Arc;

use crate::engine::context::ExecutionContext;
use crate::engine::cookies::cookie_jar::JarWrite;
use crate::engine::cookies::cookies::CookieListItem;
use crate::engine::cookies::event::CookieChangeBatch;
use crate::engine::cookies::matcher::{CookieQuery, GetOptions};
use crate::engine::cookies::observer::CookieObserver;
use crate::engine::cookies::service::CookieService;
use crate::engine::cookies::validator::{validate_delete, validate_set, DeleteOptions, SetOptions};
use crate::engine::errors::CookieError;

#[derive(Clone)]
pub struct CookieStore {
    service: Arc<CookieService>,
    context: Arc<ExecutionContext>,
}

impl std::fmt::Debug for CookieStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieStore")
            .field("context", &self.context.id())
            .field("url", &self.context.url().as_str())
            .finish()
    }
}

impl CookieStore {
    pub fn new(service: Arc<CookieService>, context: ExecutionContext) -> Self {
        Self {
            service,
            context: Arc::new(context),
        }
    }

    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.context
    }

    pub fn service(&self) -> &Arc<CookieService> {
        &self.service
    }

    /// Returns the first cookie named `name` visible at the resolved scope.
    ///
    /// Any name in `options` is replaced by `name`.
    pub async fn get(&self, name: &str, options: GetOptions) -> Result<Option<CookieListItem>, CookieError> {
        let options = GetOptions {
            name: Some(name.to_string()),
            ..options
        };
        Ok(self.read(&options).await?.into_iter().next())
    }

    /// Like [`CookieStore::get`], with the name filter taken from `options`.
    pub async fn get_matching(&self, options: GetOptions) -> Result<Option<CookieListItem>, CookieError> {
        Ok(self.read(&options).await?.into_iter().next())
    }

    /// Returns every matching cookie, longest path first, then oldest first.
    pub async fn get_all(&self, options: GetOptions) -> Result<Vec<CookieListItem>, CookieError> {
        self.read(&options).await
    }

    /// Validates and stores a cookie.
    ///
    /// Writes started together (joined futures, say) hold back change
    /// delivery until all of them have returned, so observers get one batch.
    pub async fn set(&self, name: &str, value: &str, options: SetOptions) -> Result<(), CookieError> {
        let _turn = self.service.begin_write();
        tokio::task::yield_now().await;
        self.ensure_access()?;

        let service = &self.service;
        let record = validate_set(&self.context, service.config(), service.now_millis(), name, value, &options)?;
        service.commit(record)?;
        Ok(())
    }

    /// Expires the cookie matching `name` and the domain/path in `options`.
    ///
    /// Deleting a cookie that does not exist is not an error.
    pub async fn delete(&self, name: &str, options: DeleteOptions) -> Result<(), CookieError> {
        let _turn = self.service.begin_write();
        tokio::task::yield_now().await;
        self.ensure_access()?;

        let service = &self.service;
        let record = validate_delete(&self.context, service.config(), service.now_millis(), name, &options)?;
        if let JarWrite::Unchanged = service.commit(record)? {
            log::trace!("[cookie-store] delete of absent cookie '{name}'");
        }
        Ok(())
    }

    /// Creates a callback observer sized from the service configuration.
    pub fn observer(&self, callback: impl FnMut(CookieChangeBatch) + Send + 'static) -> CookieObserver {
        CookieObserver::with_capacity(self.service.config().channel_capacity, callback)
    }

    async fn read(&self, options: &GetOptions) -> Result<Vec<CookieListItem>, CookieError> {
        tokio::task::yield_now().await;
        if !self.context.cookie_access_allowed() {
            return Ok(Vec::new());
        }
        let query = CookieQuery::resolve(&self.context, options)?;
        Ok(self.service.query(&query))
    }

    fn ensure_access(&self) -> Result<(), CookieError> {
        if self.context.cookie_access_allowed() {
            Ok(())
        } else {
            Err(CookieError::PermissionDenied)
        }
    }
}
