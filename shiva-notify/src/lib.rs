//! Email notifications: rendering, logged delivery, the scheduled queue and
//! the timer that drives it.

pub mod mailer;
pub mod queue;
pub mod runner;
pub mod templates;

pub use mailer::{Delivered, Letter, Mailer, MAX_RETRIES};
pub use queue::{NotificationQueue, QueueReport, StageCount};
pub use runner::{run, NotificationRunner};
pub use templates::{Rendered, Templates};
