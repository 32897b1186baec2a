//! # sluice-core
//!
//! Foundation types shared by every sluice crate.
//!
//! - **Identities**: [`Destination`], [`ClientId`] and [`ClientIdentity`], the
//!   value that names one logical subscriber of a change stream
//! - **Batches**: [`Batch`], a numbered group of pending records with the
//!   `-1` "nothing to deliver" sentinel
//! - **Errors**: [`CollaboratorError`] surfaced by delivery, filter and worker
//!   backends, and [`IdentityError`] for malformed identities
//! - **Collaborators**: [`EventDelivery`], [`FilterInstaller`] and
//!   [`WorkerLifecycle`], the seams to storage and capture backends
//! - **Logging**: subscriber initialisation and a log-capture layer for tests

#![deny(unsafe_code)]

pub mod batch;
pub mod errors;
pub mod identity;
pub mod logging;
pub mod traits;

pub use batch::{Batch, BatchId};
pub use errors::{CollaboratorError, IdentityError};
pub use identity::{ClientId, ClientIdentity, Destination};
pub use traits::{CollaboratorResult, EventDelivery, FilterInstaller, WorkerLifecycle};
