//! Asynchronous, origin- and path-scoped cookie store.
//!
//! Scripts reach cookies through a [`CookieStore`](cookies::CookieStore)
//! handed out by the [`CookieService`](cookies::CookieService) of their
//! origin. Writes are validated before they reach the shared jar, reads
//! resolve against the URL scope of the calling context, and observers get
//! batched `Visible`/`Hidden` change notifications.
//!
//! # Available modules
//!
//! - [`cookies`]: jar, validator, matcher, notifier, observers and the store facade.
//! - [`context`]: execution contexts (documents and workers) and cookie access.
//! - [`worker`]: install-time subscriptions for workers without a persistent context.
//! - [`config`]: limits and channel sizes.
//! - [`clock`]: injectable time source.
//! - [`errors`]: the [`CookieError`](errors::CookieError) rejections.

/// Injectable millisecond clock.
pub mod clock;
/// Store configuration and its builder.
pub mod config;
/// Execution contexts.
pub mod context;
/// Cookie jar, store facade and change notifications.
pub mod cookies;
/// Error types.
pub mod errors;
/// Deferred-context (worker) subscriptions.
pub mod worker;

/// Default bound of an observer's delivery queue.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 128;

pub use config::CookieStoreConfig;
pub use context::{ContextId, ContextKind, ExecutionContext};
pub use errors::{CookieError, CookieErrorKind};
pub use worker::{CookieChangeEvent, InstallEvent, RegistrationState, WorkerRegistration};
