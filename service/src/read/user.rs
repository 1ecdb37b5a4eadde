//! [`User`]-related read definitions.

use crate::domain::lead;
#[cfg(doc)]
use crate::domain::User;

/// Selector of an agent [`User`] whose CRM contact is among the provided
/// ones.
#[derive(Clone, Debug, Default)]
pub struct AgentAmong(pub Vec<lead::ContactId>);
