pub mod audit;
pub mod calendar;
pub mod clock;
pub mod config;
pub mod context;
pub mod db;
pub mod delivery;
pub mod error;
pub mod schema;
pub mod store;
pub mod token;
pub mod types;

pub use audit::{AuditEvent, AuditSink};
pub use calendar::LocalClock;
pub use clock::{Clock, SystemClock};
pub use config::Config;
pub use context::ShivaContext;
pub use db::DbPool;
pub use delivery::{DeliveryOutcome, DeliveryProvider, OutgoingEmail};
pub use error::{ShivaError, ShivaResult};
pub use store::Store;
pub use token::{authorize, generate_token, Authorized, Capability, Privilege};
