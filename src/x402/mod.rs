pub mod facilitator;
pub mod service;
pub mod signer;
pub mod types;

pub use facilitator::FacilitatorClient;
pub use service::X402PaymentService;
pub use signer::{LocalSigner, SigningAccount};
