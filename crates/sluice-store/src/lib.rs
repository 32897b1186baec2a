//! # sluice-store
//!
//! In-process reference backends for the sluice collaborator traits.
//!
//! - [`MemoryEventStore`]: pending change records per destination, batch
//!   bookkeeping per client, and a table-name [`TableFilter`] applied at
//!   publish time. Implements [`EventDelivery`] and [`FilterInstaller`].
//! - [`LocalWorkerController`]: tracks which destinations have a running
//!   capture worker. Implements [`WorkerLifecycle`].
//!
//! Neither survives a restart; they exist so the server runs standalone and
//! so the session layer can be exercised end to end.
//!
//! [`EventDelivery`]: sluice_core::EventDelivery
//! [`FilterInstaller`]: sluice_core::FilterInstaller
//! [`WorkerLifecycle`]: sluice_core::WorkerLifecycle

#![deny(unsafe_code)]

pub mod filter;
pub mod memory;
pub mod worker;

pub use filter::TableFilter;
pub use memory::{MemoryEventStore, Record};
pub use worker::{LocalWorkerController, WorkerCounts};
