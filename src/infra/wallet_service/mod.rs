//! Remote wallet service integration.

mod http;
pub mod signer;

pub use http::{HttpWalletClient, HttpWalletConfig, HttpWalletService};
