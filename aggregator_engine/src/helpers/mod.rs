mod address_derivation;
mod backoff;
mod signature;

pub use address_derivation::{lock_order_id, SeededAddressDeriver};
pub use backoff::BackoffPolicy;
pub use signature::{sign_payload, verify_signature, SignatureError};
