pub mod email;

pub use email::ResendDelivery;
