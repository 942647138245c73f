//! Cookies: the shared [`CookieJar`], the [`CookieStore`] facade scripts use,
//! and the [`CookieObserver`]s that watch it.
//!
//! One [`CookieService`] exists per origin partition. It owns the jar handle
//! and the change notifier; every execution context gets a [`CookieStore`]
//! from it.
//!
//! Writes are checked by [`validate_set`] / [`validate_delete`], reads and
//! observer interests are resolved into a [`CookieQuery`], and the
//! [`ChangeNotifier`] diffs the jar for each observer and batches changes.

mod cookie_jar;
#[allow(clippy::module_inception)]
mod cookies;
mod event;
mod expires;
mod matcher;
mod notifier;
mod observer;
mod service;
mod store;
mod validator;

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use cookies::{CookieDomain, CookieJarHandle, CookieKey, CookieListItem, CookieRecord};

pub use cookie_jar::{CookieJar, DefaultCookieJar, JarWrite};

pub use expires::{parse_cookie_date, Expires};
pub use validator::{validate_delete, validate_set, DeleteOptions, SetOptions};

pub use matcher::{domain_matches, path_matches, CookieQuery, GetOptions, MatchType};

pub use event::{ChangeType, CookieChange, CookieChangeBatch};
pub use notifier::{ChangeNotifier, Interest};
pub use observer::{CookieObserver, ObserverId, ObserverState};

pub use service::CookieService;
pub use store::CookieStore;

pub(crate) use notifier::{ObserverLink, Outbox, WriteTurn};

// Every guarded mutation is a single map operation, so a poisoned lock still
// holds consistent data.

pub(crate) fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T: ?Sized>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T: ?Sized>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(PoisonError::into_inner)
}
