//! Concurrency-safe registries owned by a [`Bridge`](crate::Bridge):
//! clients per identity, derived entity handles, and stream listeners.
//!
//! None of them is held across a call into the messaging library.

mod cache;
mod identity;
mod subscription;

pub use cache::{EntityCache, EntityKey};
pub use identity::{AuthTicket, ClientEntry, IdentityRegistry, Lease};
pub use subscription::{SubscriptionKey, SubscriptionKind, SubscriptionRegistry};
