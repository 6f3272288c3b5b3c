//! Common synchronization abstractions for kpng.
//!
//! This crate provides the building blocks shared by the proxy store and
//! every sink:
//!
//! - [`DiffSet`]: keyed set with staged adds/deletes and commit/rollback
//! - [`RefTable`]: reference-counted table that never auto-creates entries
//! - [`Op`] / [`Generation`]: the store-to-sink diff protocol
//! - [`Sink`]: the consumer side of that protocol
//!
//! # Protocol
//!
//! 1. The store records every transaction as a deduplicated [`Changes`] log
//! 2. A consumer pulls a [`Generation`]: either a full-state bootstrap or
//!    the operations of one transaction
//! 3. Every generation ends with [`Op::Sync`], on which the sink commits
//!    its staged state in one pass
//! 4. A sink that fails mid-generation is reset and receives a bootstrap

mod diff_set;
mod error;
mod op;
mod ref_table;
mod sink;

pub use diff_set::{Committed, DiffSet, InvalidEntry};
pub use error::{SinkError, SinkResult};
pub use op::{Changes, Generation, Op, OpKey, SyncMode};
pub use ref_table::{HasRefCount, RefCountError, RefTable};
pub use sink::{apply_generation, Sink};
