//! Application layer: workflows, job scheduling and the use cases built on them.

pub mod aggregator;
pub mod jobs;
pub mod pipeline;
pub mod provisioning;
pub mod scheduler;
pub mod service;
pub mod state;
pub mod transaction;
pub mod worker;

pub use aggregator::{AggregatedWallet, AggregatedWallets, WalletAggregator};
pub use pipeline::{Pipeline, WorkflowStep};
pub use provisioning::{ProvisioningSettings, ProvisioningWorkflow};
pub use scheduler::{JobHandler, JobOutcome, JobScheduler, SchedulerConfig, handler_fn};
pub use service::{ServiceDependencies, WalletOverview, WalletService};
pub use state::AppState;
pub use transaction::FundsTransfer;
pub use worker::{WorkerConfig, spawn_worker_pool};
