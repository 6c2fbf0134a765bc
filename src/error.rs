//! Error types for the state core.
//!
//! The core never fails for ordinary CRUD usage. The two failure signals it
//! does produce are listener panics surfaced after delivery, and registry
//! type mismatches on store creation.

use std::sync::Arc;

use thiserror::Error;

use crate::notifier::SubscriptionId;

/// A caller-supplied error stored verbatim by `set_error`.
///
/// The core never inspects or classifies it; it is only held and broadcast.
pub type ErrorValue = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Convert anything error-like into a stored [`ErrorValue`].
pub(crate) fn into_error_value<E>(err: E) -> ErrorValue
where
    E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
{
    Arc::from(err.into())
}

/// Failure reported by a notification pass.
///
/// The state change that triggered the pass is already committed when this
/// is returned; every remaining listener has still been called.
#[derive(Debug, Clone, Error)]
pub enum NotifyError {
    #[error("listener {subscription} panicked: {message} ({failed} listener(s) failed in this pass)")]
    ListenerPanicked {
        /// The first listener that failed, in registration order.
        subscription: SubscriptionId,
        message: String,
        /// Total number of listeners that failed during the pass.
        failed: usize,
    },
}

/// Errors from the store registry.
#[derive(Debug, Clone, Error)]
pub enum StateError {
    #[error("store '{name}' is registered as {registered}, requested as {requested}")]
    TypeMismatch {
        name: String,
        registered: &'static str,
        requested: &'static str,
    },
}
