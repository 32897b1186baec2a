//! # sluice-server
//!
//! Consumer session layer and the network listeners around it.
//!
//! - Subscription registry: who is subscribed to which destination, and the
//!   rule that the first subscriber starts a capture worker and the last one
//!   stops it
//! - Session handler: SUBSCRIBE, UNSUBSCRIBE, GET, `CLIENT_ACK` and
//!   `CLIENT_ROLLBACK` dispatch, with the bound-subscriber state kept per
//!   connection
//! - TCP accept loop with a connection limit, plus `/health`,
//!   `/destinations` and `/metrics` over HTTP
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;

pub use config::ServerConfig;
pub use errors::SessionError;
pub use registry::{DestinationSummary, SubscriptionRegistry};
pub use server::SluiceServer;
pub use session::{SessionContext, SessionState, SessionStats, handle_packet};
pub use shutdown::ShutdownCoordinator;
