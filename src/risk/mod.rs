pub mod errors;
pub mod tracker;

pub use tracker::FailedPaymentTracker;
