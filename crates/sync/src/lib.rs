//! vsync sync: reconciliation between a virtual cluster and its host.
//!
//! Each tracked kind gets a [`Reconciler`] with three entry points
//! (`sync_down`, `sync_up`, `sync`) and the identity functions the dispatch
//! loop needs. Names that cannot be parsed back are recovered through the
//! configuration index or the managed owner, and remembered in a per-kind
//! name cache.

#![forbid(unsafe_code)]

mod dispatch;
pub mod index;
mod reconciler;
mod resolver;

pub use dispatch::{Dispatcher, Event, Notification, Verb};
pub use reconciler::{KindProfile, Naming, Outcome, Reconciler, SkipReason};
pub use resolver::{ManagedParent, OwnershipResolver};
