pub mod models;
pub mod runner;
pub mod store;
pub mod worker;

pub use models::{JobStatus, NewPaymentJob, PaymentJob};
pub use runner::QueueRunner;
pub use store::PaymentJobStore;
pub use worker::PaymentWorker;
