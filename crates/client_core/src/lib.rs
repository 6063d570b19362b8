use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod api;
pub mod config;
pub mod conversations;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod focus;
pub mod groups;
pub mod presence;
pub mod reconcile;
pub mod session;
pub mod transport;
pub mod types;
pub mod typing;
pub mod unread;

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

pub use api::{AttachmentUpload, ChatApi, HttpChatApi};
pub use config::{load_settings, load_settings_from, ClientSettings};
pub use engine::SyncEngine;
pub use error::SyncError;
pub use session::ChatSession;
pub use transport::{ConnectionState, EventChannel, Subscription, WsEventChannel};
pub use types::{ClientEvent, Dispatch, Effect, HandleOutcome, MessageDraft};

/// State guarded here stays consistent across a panicking holder, so a
/// poisoned lock is still usable.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
