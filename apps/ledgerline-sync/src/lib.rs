//! Client side of the Ledgerline portal's real-time sync layer.
//!
//! One shared socket per signed-in user keeps open sessions consistent with
//! server-side mutations. Nothing pushed over the socket is applied as data:
//! inbound changes only mark cached queries stale so the next read goes back
//! to REST, which stays the source of truth.
//!
//! Entry point is [`ConnectionRegistry::acquire`].

pub mod broadcast;
pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod notify;
pub mod registry;
pub mod router;
pub mod session;
pub mod subscription;
pub mod telemetry;
pub mod transport;

pub use broadcast::{Broadcaster, MessageSink};
pub use cache::{Invalidator, QueryCache, QueryStore};
pub use config::{ConfigError, SyncConfig};
pub use connection::{ConnectionManager, ConnectionPhase, ConnectionSnapshot};
pub use error::SyncError;
pub use notify::{Notifier, Severity, TracingNotifier};
pub use registry::{ConnectionRegistry, SyncLease};
pub use router::MessageRouter;
pub use session::{SessionProvider, SessionUser, StaticSession};
pub use subscription::{SubscriptionGuard, SubscriptionScope};
