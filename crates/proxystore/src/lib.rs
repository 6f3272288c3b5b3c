//! In-memory proxy store.
//!
//! The store holds one row per service and one row per endpoint source.
//! All mutation goes through [`Store::update`], which runs a closure
//! against a [`Tx`] under the write lock; reads go through
//! [`Store::view`]. Each transaction that changed anything becomes a
//! numbered generation that consumers pull through a [`DiffReader`].
//!
//! [`LocalDiffJob`] connects a reader to a [`kpng_sync_common::Sink`].

mod diff;
mod job;
mod store;
mod tx;

pub use diff::DiffReader;
pub use job::LocalDiffJob;
pub use store::{Set, Store, StoreConfig};
pub use tx::{Tx, View};
