//! Database adapters implementing the repository traits.

pub mod postgres;

pub use postgres::{PostgresClient, PostgresConfig};
