//! Cookie service.
//!
//! A [`CookieService`] binds one shared [`CookieJarHandle`] to the
//! [`ChangeNotifier`] watching it. Every execution context of the origin gets
//! its own [`CookieStore`] facade from the same service, so all of them see
//! the same jar and the same change stream.
//!
//! Writes go through [`CookieService::commit`]: one upsert under the jar write
//! lock, then a diff pass over the observers under a read lock. Writers that
//! bypass the service (the network stack filling the jar from `Set-Cookie`
//! headers, for instance) call [`CookieService::poll_changes`] afterwards.
//!
//! Expired records are removed lazily on every read and, when
//! `sweep_interval` is configured, by a background sweeper task.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::engine::clock::{ClockHandle, SystemClock};
use crate::engine::config::CookieStoreConfig;
use crate::engine::context::ExecutionContext;
use crate::engine::cookies::cookie_jar::JarWrite;
use crate::engine::cookies::cookies::{CookieJarHandle, CookieListItem, CookieRecord};
use crate::engine::cookies::matcher::CookieQuery;
use crate::engine::cookies::notifier::{ChangeNotifier, Interest, ObserverLink, WriteTurn};
use crate::engine::cookies::observer::ObserverId;
use crate::engine::cookies::store::CookieStore;
use crate::engine::cookies::{lock, read, write, DefaultCookieJar};
use crate::engine::errors::CookieError;

pub struct CookieService {
    jar: CookieJarHandle,
    notifier: ChangeNotifier,
    config: CookieStoreConfig,
    clock: ClockHandle,
    runtime: Handle,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for CookieService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieService")
            .field("config", &self.config)
            .field("observers", &self.notifier.observer_count())
            .finish_non_exhaustive()
    }
}

impl CookieService {
    /// Creates a service around a fresh in-memory jar, using the wall clock.
    pub fn new(config: CookieStoreConfig, runtime: Handle) -> Arc<Self> {
        Self::with_parts(DefaultCookieJar::new().into(), config, Arc::new(SystemClock), runtime)
    }

    /// Creates a service around an existing (possibly shared) jar.
    pub fn with_parts(
        jar: CookieJarHandle,
        config: CookieStoreConfig,
        clock: ClockHandle,
        runtime: Handle,
    ) -> Arc<Self> {
        let sweep_interval = config.sweep_interval;
        let service = Arc::new(Self {
            jar,
            notifier: ChangeNotifier::new(runtime.clone()),
            config,
            clock,
            runtime,
            sweeper: Mutex::new(None),
        });

        if let Some(every) = sweep_interval {
            let handle = service.spawn_sweeper(every);
            *lock(&service.sweeper) = Some(handle);
        }

        service
    }

    /// Hands out the script-facing store for `context`.
    pub fn store_for(self: &Arc<Self>, context: ExecutionContext) -> CookieStore {
        CookieStore::new(Arc::clone(self), context)
    }

    pub fn jar(&self) -> CookieJarHandle {
        Arc::clone(&self.jar)
    }

    pub fn config(&self) -> &CookieStoreConfig {
        &self.config
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    pub fn observer_count(&self) -> usize {
        self.notifier.observer_count()
    }

    /// Marks a facade write as in flight. Change deliveries hold back until
    /// every open turn is dropped.
    pub(crate) fn begin_write(&self) -> WriteTurn {
        self.notifier.begin_write()
    }

    /// Stores a validated record, enforcing the per-jar cookie count.
    pub(crate) fn commit(&self, record: CookieRecord) -> Result<JarWrite, CookieError> {
        let now = self.now_millis();
        let name = record.name.clone();

        let outcome = {
            let mut jar = write(&self.jar);
            let key = record.key();
            if !record.is_expired(now) && !jar.contains(&key) {
                let live = jar.iter().filter(|c| !c.is_expired(now)).count();
                if live >= self.config.max_cookies {
                    return Err(CookieError::LimitExceeded(format!(
                        "jar already holds {} cookies",
                        self.config.max_cookies
                    )));
                }
            }
            jar.upsert(record, now)
        };

        match &outcome {
            JarWrite::Inserted => log::debug!("[cookie-service] stored cookie '{name}'"),
            JarWrite::Replaced(_) => log::debug!("[cookie-service] replaced cookie '{name}'"),
            JarWrite::Removed(_) => log::debug!("[cookie-service] removed cookie '{name}'"),
            JarWrite::Unchanged => log::trace!("[cookie-service] nothing to remove for '{name}'"),
        }

        if outcome.changed() {
            self.notify(false);
        }
        Ok(outcome)
    }

    /// Runs `query` after a lazy expiry sweep.
    pub(crate) fn query(&self, query: &CookieQuery) -> Vec<CookieListItem> {
        self.sweep();
        let jar = read(&self.jar);
        query.list(&*jar, self.now_millis())
    }

    /// Removes expired records, notifying observers. Returns how many went.
    pub fn sweep(&self) -> usize {
        let now = self.now_millis();
        let swept = write(&self.jar).sweep_expired(now);
        if !swept.is_empty() {
            log::debug!("[cookie-service] swept {} expired cookie(s)", swept.len());
            self.notify(false);
        }
        swept.len()
    }

    /// Re-diffs observers if the jar changed behind the service's back.
    pub fn poll_changes(&self) {
        self.notify(false);
    }

    /// Enables or disables cookie access for `context`.
    ///
    /// Re-enabling access lets that context's observers catch up right away.
    pub fn set_cookie_access(&self, context: &ExecutionContext, allowed: bool) {
        let was = context.set_cookie_access(allowed);
        log::debug!("[cookie-service] cookie access for context {} set to {allowed}", context.id());
        if allowed && !was {
            self.notify(true);
        }
    }

    pub(crate) fn observe(&self, link: &ObserverLink, interests: Vec<Interest>) {
        let jar = read(&self.jar);
        self.notifier.observe(link, interests, &*jar, self.now_millis());
    }

    pub(crate) fn detach(&self, id: ObserverId) -> bool {
        self.notifier.detach(id)
    }

    pub(crate) fn interests(&self, id: ObserverId) -> Vec<Interest> {
        self.notifier.interests(id)
    }

    fn notify(&self, force: bool) {
        let jar = read(&self.jar);
        self.notifier.on_jar_changed(&*jar, self.now_millis(), force);
    }

    /// Spawns a task sweeping expired cookies every `every`.
    ///
    /// The task holds a weak reference and ends once the service is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(service) = weak.upgrade() else {
                    break;
                };
                service.sweep();
            }
        })
    }
}

impl Drop for CookieService {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.sweeper).take() {
            handle.abort();
        }
    }
}
