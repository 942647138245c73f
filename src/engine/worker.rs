//! Cookie change subscriptions for workers.
//!
//! A worker has no execution context between activations, so it cannot hold
//! a [`CookieObserver`](crate::cookies::CookieObserver). Instead it subscribes
//! once, while its install event is running, and collects everything that
//! happened in the meantime each time it is activated.
//!
//! ```text
//!   new() --install()--> InstallEvent::subscribe()* --complete()--> activate()*
//! ```
//!
//! Changes for a dormant registration are parked. [`WorkerRegistration::activate`]
//! sweeps expired cookies and hands the parked batches out as
//! [`CookieChangeEvent`]s, oldest first.

use std::sync::{Arc, Mutex};

use url::Url;

use crate::engine::context::{ContextKind, ExecutionContext};
use crate::engine::cookies::{
    lock, path_matches, ChangeType, CookieChange, CookieChangeBatch, CookieQuery, CookieService,
    CookieStore, GetOptions, Interest, ObserverId, ObserverLink, Outbox,
};
use crate::engine::errors::CookieError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    /// Created, not installed yet.
    Parsed,
    /// The install event is running; subscriptions are accepted.
    Installing,
    Installed,
    Unregistered,
}

/// Changes handed to a worker on activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieChangeEvent {
    pub scope: Url,
    /// The snapshot owed after the install-time subscription. Sent even when
    /// nothing matched.
    pub initial: bool,
    pub changed: Vec<CookieChange>,
    pub deleted: Vec<CookieChange>,
}

impl CookieChangeEvent {
    fn from_batch(scope: Url, batch: CookieChangeBatch) -> Self {
        let initial = batch.initial;
        let (changed, deleted): (Vec<_>, Vec<_>) = batch
            .changes
            .into_iter()
            .partition(|c| c.change_type == ChangeType::Visible);
        Self {
            scope,
            initial,
            changed,
            deleted,
        }
    }
}

pub struct WorkerRegistration {
    id: ObserverId,
    scope: Url,
    store: CookieStore,
    outbox: Arc<Outbox>,
    state: Mutex<RegistrationState>,
}

impl WorkerRegistration {
    /// Registers a worker context. Fails for document contexts.
    pub fn new(service: &Arc<CookieService>, context: ExecutionContext) -> Result<Self, CookieError> {
        let scope = match context.kind() {
            ContextKind::Worker { scope } => scope.clone(),
            ContextKind::Document => {
                return Err(CookieError::InvalidState("only worker contexts can register".into()));
            }
        };

        let id = ObserverId::new();
        log::debug!("[cookie-worker] registration {id} for scope {scope}");
        Ok(Self {
            id,
            scope,
            store: service.store_for(context),
            outbox: Outbox::deferred(id),
            state: Mutex::new(RegistrationState::Parsed),
        })
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub fn state(&self) -> RegistrationState {
        *lock(&self.state)
    }

    /// The worker's own cookie store, for reads and writes while active.
    pub fn store(&self) -> &CookieStore {
        &self.store
    }

    /// Starts the one-shot install event.
    pub fn install(&self) -> Result<InstallEvent<'_>, CookieError> {
        let mut state = lock(&self.state);
        if *state != RegistrationState::Parsed {
            return Err(CookieError::InvalidState(format!("cannot install a registration in state {:?}", *state)));
        }
        *state = RegistrationState::Installing;
        Ok(InstallEvent {
            registration: self,
            done: false,
        })
    }

    /// Interests registered during install.
    pub fn subscriptions(&self) -> Vec<Interest> {
        self.store.service().interests(self.id)
    }

    /// Wakes the worker and hands out everything that changed while it slept.
    pub async fn activate(&self) -> Result<Vec<CookieChangeEvent>, CookieError> {
        tokio::task::yield_now().await;

        let state = self.state();
        if state != RegistrationState::Installed {
            return Err(CookieError::InvalidState(format!("cannot activate a registration in state {state:?}")));
        }

        self.store.service().sweep();

        let events: Vec<CookieChangeEvent> = self
            .outbox
            .drain_deferred()
            .into_iter()
            .filter(|batch| batch.initial || !batch.is_empty())
            .map(|batch| CookieChangeEvent::from_batch(self.scope.clone(), batch))
            .collect();

        log::debug!("[cookie-worker] activation of {} delivers {} event(s)", self.id, events.len());
        Ok(events)
    }

    pub fn unregister(&self) {
        let mut state = lock(&self.state);
        if *state == RegistrationState::Unregistered {
            return;
        }
        *state = RegistrationState::Unregistered;
        self.store.service().detach(self.id);
        log::debug!("[cookie-worker] unregistered {}", self.id);
    }

    fn subscribe(&self, interests: Vec<GetOptions>) -> Result<(), CookieError> {
        let context = self.store.context();
        let mut resolved = Vec::with_capacity(interests.len());
        for options in &interests {
            let query = CookieQuery::resolve(context, options)?;
            if !path_matches(self.scope.path(), query.scope.path()) {
                return Err(CookieError::Validation(format!(
                    "url '{}' is outside the registration scope '{}'",
                    query.scope, self.scope
                )));
            }
            resolved.push(query);
        }

        let link = ObserverLink {
            id: self.id,
            context: Arc::clone(context),
            outbox: Arc::clone(&self.outbox),
        };
        self.store.service().observe(&link, resolved);
        Ok(())
    }
}

impl Drop for WorkerRegistration {
    fn drop(&mut self) {
        self.unregister();
    }
}

/// The install lifecycle event. Subscriptions are only accepted while it runs.
pub struct InstallEvent<'r> {
    registration: &'r WorkerRegistration,
    done: bool,
}

impl InstallEvent<'_> {
    pub fn subscribe(&self, interests: Vec<GetOptions>) -> Result<(), CookieError> {
        if self.done || self.registration.state() != RegistrationState::Installing {
            return Err(CookieError::InvalidState("subscriptions are only accepted during install".into()));
        }
        self.registration.subscribe(interests)
    }

    /// Ends the install event. Dropping the event has the same effect.
    pub fn complete(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if std::mem::replace(&mut self.done, true) {
            return;
        }
        let mut state = lock(&self.registration.state);
        if *state == RegistrationState::Installing {
            *state = RegistrationState::Installed;
        }
    }
}

impl Drop for InstallEvent<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::CookieStoreConfig;
    use crate::engine::cookies::SetOptions;
    use crate::engine::errors::CookieErrorKind;
    use tokio::runtime::Handle;

    fn u(s: &str) -> Url {
        Url::parse(s).expect("valid URL")
    }

    fn worker_context() -> ExecutionContext {
        ExecutionContext::worker(u("https://example.org/app/sw.js"), u("https://example.org/app/")).unwrap()
    }

    fn page(service: &Arc<CookieService>) -> CookieStore {
        service.store_for(ExecutionContext::document(u("https://example.org/app/index.html")))
    }

    #[tokio::test]
    async fn document_contexts_cannot_register() {
        let service = CookieService::new(CookieStoreConfig::default(), Handle::current());
        let err = WorkerRegistration::new(&service, ExecutionContext::document(u("https://example.org/"))).err();
        assert_eq!(err.map(|e| e.kind()), Some(CookieErrorKind::InvalidState));
    }

    #[tokio::test]
    async fn subscribe_only_during_install() -> anyhow::Result<()> {
        let service = CookieService::new(CookieStoreConfig::default(), Handle::current());
        let registration = WorkerRegistration::new(&service, worker_context())?;

        let event = registration.install()?;
        event.subscribe(vec![GetOptions::named("session")])?;
        event.subscribe(vec![GetOptions::starts_with("pref_").url("/app/settings")])?;
        event.complete();

        assert_eq!(registration.state(), RegistrationState::Installed);
        assert!(registration.install().is_err());

        let subs = registration.subscriptions();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].name.as_deref(), Some("session"));
        assert_eq!(subs[0].scope.as_str(), "https://example.org/app/");
        assert_eq!(subs[1].scope.as_str(), "https://example.org/app/settings");
        Ok(())
    }

    #[tokio::test]
    async fn dropping_the_install_event_completes_it() -> anyhow::Result<()> {
        let service = CookieService::new(CookieStoreConfig::default(), Handle::current());
        let registration = WorkerRegistration::new(&service, worker_context())?;
        {
            let event = registration.install()?;
            event.subscribe(vec![GetOptions::default()])?;
        }
        assert_eq!(registration.state(), RegistrationState::Installed);
        Ok(())
    }

    #[tokio::test]
    async fn interests_outside_the_scope_are_rejected() -> anyhow::Result<()> {
        let service = CookieService::new(CookieStoreConfig::default(), Handle::current());
        let registration = WorkerRegistration::new(&service, worker_context())?;
        let event = registration.install()?;

        let err = event.subscribe(vec![GetOptions::default().url("/other/")]).unwrap_err();
        assert_eq!(err.kind(), CookieErrorKind::Validation);
        let err = event.subscribe(vec![GetOptions::default().url("/application")]).unwrap_err();
        assert_eq!(err.kind(), CookieErrorKind::Validation);
        assert!(registration.subscriptions().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn activation_delivers_parked_changes_in_order() -> anyhow::Result<()> {
        let service = CookieService::new(CookieStoreConfig::default(), Handle::current());
        let registration = WorkerRegistration::new(&service, worker_context())?;
        let event = registration.install()?;
        event.subscribe(vec![GetOptions::default()])?;
        event.complete();

        let page = page(&service);
        page.set("a", "1", SetOptions::default()).await?;
        page.set("b", "1", SetOptions::default()).await?;
        page.delete("a", Default::default()).await?;

        let events = registration.activate().await?;
        let changed: Vec<&str> = events.iter().flat_map(|e| &e.changed).map(|c| c.name.as_str()).collect();
        let deleted: Vec<&str> = events.iter().flat_map(|e| &e.deleted).map(|c| c.name.as_str()).collect();
        assert_eq!(changed, ["a", "b"]);
        assert_eq!(deleted, ["a"]);
        assert!(events.iter().all(|e| e.scope.as_str() == "https://example.org/app/"));
        assert!(events[0].initial);
        assert!(events.iter().skip(1).all(|e| !e.initial));

        // nothing new since the last activation
        assert!(registration.activate().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn empty_initial_snapshot_is_still_delivered() -> anyhow::Result<()> {
        let service = CookieService::new(CookieStoreConfig::default(), Handle::current());
        page(&service).set("unrelated", "1", SetOptions::default()).await?;

        let registration = WorkerRegistration::new(&service, worker_context())?;
        let event = registration.install()?;
        event.subscribe(vec![GetOptions::named("session")])?;
        event.complete();

        let events = registration.activate().await?;
        assert_eq!(events.len(), 1);
        assert!(events[0].initial);
        assert!(events[0].changed.is_empty());
        assert!(events[0].deleted.is_empty());

        assert!(registration.activate().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn activation_requires_a_completed_install() -> anyhow::Result<()> {
        let service = CookieService::new(CookieStoreConfig::default(), Handle::current());
        let registration = WorkerRegistration::new(&service, worker_context())?;
        let err = registration.activate().await.unwrap_err();
        assert_eq!(err.kind(), CookieErrorKind::InvalidState);
        Ok(())
    }

    #[tokio::test]
    async fn unregister_stops_deliveries() -> anyhow::Result<()> {
        let service = CookieService::new(CookieStoreConfig::default(), Handle::current());
        let registration = WorkerRegistration::new(&service, worker_context())?;
        registration.install()?.subscribe(vec![GetOptions::default()])?;
        assert_eq!(service.observer_count(), 1);

        registration.unregister();
        assert_eq!(registration.state(), RegistrationState::Unregistered);
        assert_eq!(service.observer_count(), 0);
        assert!(registration.activate().await.is_err());
        Ok(())
    }
}
