//! The host substrate: a transactional document store plus a deferred-
//! function scheduler, treated elsewhere in this repository as an external
//! collaborator. This crate supplies the trait boundary
//! ([`store::Store`]/[`store::Transaction`], [`scheduler::Scheduler`]) and
//! one in-process implementation of each ([`memory`]) so the rest of the
//! workspace is runnable without a hosted backend.

pub mod error;
pub mod memory;
pub mod registry;
pub mod scheduler;
pub mod store;

pub use error::HostError;
pub use memory::{InMemoryScheduler, InMemoryStore};
pub use registry::{FunctionRegistry, Handler, HandlerFuture};
pub use scheduler::{Scheduler, SchedulerId, SchedulerStatus};
pub use store::{transact_typed, Store, Transaction, TransactionExt};
