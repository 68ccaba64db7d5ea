//! # pulse-server
//!
//! Fans bus events out to Server-Sent Events viewers.
//!
//! - [`ClientRegistry`]: the set of connected viewers
//! - [`Broadcaster`]: writes one event into every open viewer's outbox
//! - [`RelayHandler`]: normalizes bus messages and broadcasts them
//! - [`start`]: binds `/events`, `/health` and `/metrics` and runs the bus consumer

#![deny(unsafe_code)]

pub mod broadcast;
pub mod error;
pub mod health;
pub mod outbox;
pub mod registry;
pub mod relay;
pub mod server;
pub mod session;
pub mod shutdown;
mod sse;

pub use broadcast::{Broadcaster, DeliveryReport};
pub use error::ServerError;
pub use outbox::{DeliveryError, Outbox, PushOutcome};
pub use registry::{ClientRegistry, RegistryDrained};
pub use relay::RelayHandler;
pub use server::{build_router, start, AppState, RelayHandle};
pub use session::{SessionState, ViewerSession};
pub use shutdown::ShutdownCoordinator;
