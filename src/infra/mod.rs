//! Infrastructure layer implementations.

pub mod database;
pub mod notifier;
pub mod observability;
pub mod wallet_service;

pub use database::{PostgresClient, PostgresConfig};
pub use notifier::{LogNotifier, WebhookNotifier};
pub use wallet_service::{HttpWalletClient, HttpWalletConfig, HttpWalletService};
