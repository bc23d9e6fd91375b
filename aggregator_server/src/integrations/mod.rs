mod chain;
pub mod notifications;
mod webhook_transport;

pub use chain::ScannerChainHead;
pub use webhook_transport::{HttpWebhookTransport, EVENT_HEADER, SIGNATURE_HEADER};
