//! Cookie change observers.
//!
//! A [`CookieObserver`] accumulates interests through [`CookieObserver::observe`]
//! and receives [`CookieChangeBatch`]es, either through a callback or through a
//! bounded channel handed out at construction.
//!
//! ```text
//!   Disconnected --observe()--> Observing --disconnect()--> Disconnected
//! ```
//!
//! While observing, interests only grow. Disconnecting (or dropping the
//! observer) stops future deliveries; a batch that is already scheduled is
//! still delivered.
//!
//! ```rust,no_run
//! use gosub_cookie_store::cookies::{CookieObserver, GetOptions};
//! # async fn demo(store: gosub_cookie_store::cookies::CookieStore) -> Result<(), gosub_cookie_store::errors::CookieError> {
//! let (mut observer, mut rx) = CookieObserver::channel(16);
//! observer.observe(&store, Some(vec![GetOptions::named("session")]))?;
//!
//! while let Some(batch) = rx.recv().await {
//!     for change in &batch.changes {
//!         println!("{:?} {}={}", change.change_type, change.name, change.value);
//!     }
//! }
//! # Ok(()) }
//! ```

use std::fmt::Display;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::engine::context::ExecutionContext;
use crate::engine::cookies::event::CookieChangeBatch;
use crate::engine::cookies::matcher::{CookieQuery, GetOptions};
use crate::engine::cookies::notifier::{ObserverLink, Outbox};
use crate::engine::cookies::service::CookieService;
use crate::engine::cookies::store::CookieStore;
use crate::engine::errors::CookieError;
use crate::engine::DEFAULT_CHANNEL_CAPACITY;

/// A unique identifier for an observer, represented as a UUID.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObserverId(Uuid);

impl ObserverId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ObserverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverState {
    Disconnected,
    Observing,
}

type ChangeCallback = Box<dyn FnMut(CookieChangeBatch) + Send + 'static>;

/// Callback plus the receiving end it drains, waiting for a runtime to run on.
struct Pump {
    rx: mpsc::Receiver<CookieChangeBatch>,
    callback: ChangeCallback,
}

struct Attachment {
    service: Arc<CookieService>,
    context: Arc<ExecutionContext>,
}

pub struct CookieObserver {
    id: ObserverId,
    outbox: Arc<Outbox>,
    pump: Option<Pump>,
    attached: Option<Attachment>,
}

impl CookieObserver {
    /// Creates an observer that invokes `callback` once per batch.
    pub fn new(callback: impl FnMut(CookieChangeBatch) + Send + 'static) -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY, callback)
    }

    pub fn with_capacity(capacity: usize, callback: impl FnMut(CookieChangeBatch) + Send + 'static) -> Self {
        let id = ObserverId::new();
        let (outbox, rx) = Outbox::channel(id, capacity.max(1));
        Self {
            id,
            outbox,
            pump: Some(Pump {
                rx,
                callback: Box::new(callback),
            }),
            attached: None,
        }
    }

    /// Creates an observer whose batches are read from the returned receiver.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<CookieChangeBatch>) {
        let id = ObserverId::new();
        let (outbox, rx) = Outbox::channel(id, capacity.max(1));
        let observer = Self {
            id,
            outbox,
            pump: None,
            attached: None,
        };
        (observer, rx)
    }

    pub fn id(&self) -> ObserverId {
        self.id
    }

    pub fn state(&self) -> ObserverState {
        if self.attached.is_some() {
            ObserverState::Observing
        } else {
            ObserverState::Disconnected
        }
    }

    /// Adds interests resolved against `store`'s context.
    ///
    /// `None` observes every script-visible cookie at the context's default
    /// scope. The first call after construction (or after a disconnect)
    /// schedules an initial snapshot. All interests are resolved before any
    /// is added, so a bad `url` leaves the observer unchanged.
    pub fn observe(
        &mut self,
        store: &CookieStore,
        interests: Option<Vec<GetOptions>>,
    ) -> Result<(), CookieError> {
        if let Some(attached) = &self.attached {
            let same_service = Arc::ptr_eq(&attached.service, store.service());
            if !same_service || attached.context.id() != store.context().id() {
                return Err(CookieError::InvalidState(
                    "observer is already observing a different cookie store".into(),
                ));
            }
        }

        let options = interests.unwrap_or_else(|| vec![GetOptions::default()]);
        let resolved = options
            .iter()
            .map(|o| CookieQuery::resolve(store.context(), o))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(Pump { mut rx, mut callback }) = self.pump.take() {
            store.service().runtime().spawn(async move {
                while let Some(batch) = rx.recv().await {
                    callback(batch);
                }
            });
        }

        let link = ObserverLink {
            id: self.id,
            context: Arc::clone(store.context()),
            outbox: Arc::clone(&self.outbox),
        };
        store.service().observe(&link, resolved);

        self.attached = Some(Attachment {
            service: Arc::clone(store.service()),
            context: Arc::clone(store.context()),
        });
        Ok(())
    }

    /// Stops deliveries and forgets all interests.
    pub fn disconnect(&mut self) {
        if let Some(attached) = self.attached.take() {
            attached.service.detach(self.id);
        }
    }
}

impl Drop for CookieObserver {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::CookieStoreConfig;
    use crate::engine::cookies::event::ChangeType;
    use crate::engine::cookies::SetOptions;
    use std::time::Duration;
    use tokio::runtime::Handle;
    use url::Url;

    fn store_at(service: &Arc<CookieService>, url: &str) -> CookieStore {
        service.store_for(ExecutionContext::document(Url::parse(url).unwrap()))
    }

    #[tokio::test]
    async fn lifecycle_states() {
        let service = CookieService::new(CookieStoreConfig::default(), Handle::current());
        let store = store_at(&service, "https://example.org/");
        let (mut observer, _rx) = CookieObserver::channel(4);

        assert_eq!(observer.state(), ObserverState::Disconnected);
        observer.observe(&store, None).unwrap();
        assert_eq!(observer.state(), ObserverState::Observing);
        assert_eq!(service.observer_count(), 1);

        observer.disconnect();
        assert_eq!(observer.state(), ObserverState::Disconnected);
        assert_eq!(service.observer_count(), 0);
    }

    #[tokio::test]
    async fn bad_interest_url_leaves_observer_untouched() {
        let service = CookieService::new(CookieStoreConfig::default(), Handle::current());
        let store = store_at(&service, "https://example.org/");
        let (mut observer, _rx) = CookieObserver::channel(4);

        let err = observer
            .observe(&store, Some(vec![GetOptions::default(), GetOptions::default().url("https://evil.test/")]))
            .unwrap_err();
        assert!(matches!(err, CookieError::Validation(_)));
        assert_eq!(observer.state(), ObserverState::Disconnected);
        assert_eq!(service.observer_count(), 0);
    }

    #[tokio::test]
    async fn observing_a_second_store_is_rejected() {
        let service = CookieService::new(CookieStoreConfig::default(), Handle::current());
        let a = store_at(&service, "https://example.org/");
        let b = store_at(&service, "https://example.org/");
        let (mut observer, _rx) = CookieObserver::channel(4);

        observer.observe(&a, None).unwrap();
        // the same store may be observed again
        observer.observe(&a, Some(vec![GetOptions::named("x")])).unwrap();

        let err = observer.observe(&b, None).unwrap_err();
        assert!(matches!(err, CookieError::InvalidState(_)));
    }

    #[tokio::test]
    async fn callback_receives_batches() {
        let service = CookieService::new(CookieStoreConfig::default(), Handle::current());
        let store = store_at(&service, "https://example.org/");

        let (tx, mut seen) = mpsc::unbounded_channel();
        let mut observer = CookieObserver::new(move |batch| {
            let _ = tx.send(batch);
        });
        observer.observe(&store, None).unwrap();

        let initial = seen.recv().await.unwrap();
        assert!(initial.initial);
        assert_eq!(initial.observer, observer.id());

        store.set("a", "1", SetOptions::default()).await.unwrap();
        let batch = tokio::time::timeout(Duration::from_secs(1), seen.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.changes[0].change_type, ChangeType::Visible);
        assert_eq!(batch.changes[0].name, "a");
    }

    #[tokio::test]
    async fn dropping_the_observer_detaches_it() {
        let service = CookieService::new(CookieStoreConfig::default(), Handle::current());
        let store = store_at(&service, "https://example.org/");
        {
            let (mut observer, _rx) = CookieObserver::channel(4);
            observer.observe(&store, None).unwrap();
            assert_eq!(service.observer_count(), 1);
        }
        assert_eq!(service.observer_count(), 0);
    }
}
