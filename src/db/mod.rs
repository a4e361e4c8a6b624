//! Database layer
//!
//! `DocumentBackend` is the persistence boundary; `MongoClient` and
//! `MemoryBackend` implement it. `RecordStore<T>` sits on top and is the
//! only thing services talk to.

pub mod backend;
pub mod join;
pub mod memory;
pub mod mongo;
pub mod outcome;
pub mod query;
pub mod record_store;
pub mod schemas;
pub mod token;
pub mod view;

pub use backend::{DocumentBackend, IntoIndexes, UpdateCounts, WriteScope};
pub use join::LeftJoin;
pub use memory::MemoryBackend;
pub use mongo::MongoClient;
pub use outcome::{Outcome, OutcomeSet};
pub use record_store::{KeyKind, RecordStore};
pub use token::{FieldShape, UpdateToken};
pub use view::{FindView, ViewOption};
