//! Webhook [`Request`]-related read definitions.

use crate::domain::webhook;
#[cfg(doc)]
use crate::domain::webhook::Request;

/// Selector of the latest [`Request`] of a [`webhook::Subject`] received
/// before another one.
#[derive(Clone, Debug)]
pub struct Latest {
    /// [`webhook::Subject`] of the [`Request`].
    pub subject: webhook::Subject,

    /// Earliest reception moment to consider.
    pub since: webhook::ReceptionDateTime,

    /// ID of the [`Request`] to ignore.
    pub except: webhook::Id,
}
