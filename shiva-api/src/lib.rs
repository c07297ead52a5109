pub mod auth;
pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use rate_limit::{RateLimits, SlidingWindow};
pub use server::{router, run};
