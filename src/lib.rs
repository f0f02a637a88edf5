//! Wallet Orchestrator
//!
//! Custodial wallet provisioning and signed-transaction workflows for a
//! consumer wallet product, driven by a persistent job scheduler.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                   API Layer                  │
//! │      Thin HTTP triggers, error mapping       │
//! ├─────────────────────────────────────────────┤
//! │               Application Layer              │
//! │  Pipelines, job scheduler, workers, service  │
//! ├─────────────────────────────────────────────┤
//! │                 Domain Layer                 │
//! │   Traits, types, errors (no dependencies)    │
//! ├─────────────────────────────────────────────┤
//! │             Infrastructure Layer             │
//! │ PostgreSQL, wallet service client, notifier  │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Provisioning and transfers are typed pipelines of [`app::WorkflowStep`]s.
//! A failed step stops the pipeline and reports which steps already completed;
//! there is no rollback, because the remote wallet service has no compensating
//! operations.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use wallet_orchestrator::api::create_router;
//! use wallet_orchestrator::app::{
//!     AppState, ServiceDependencies, WalletService, WorkerConfig, spawn_worker_pool,
//! };
//!
//! let service = Arc::new(WalletService::new(ServiceDependencies { /* ... */ }));
//! let (workers, shutdown) = spawn_worker_pool(service.scheduler(), WorkerConfig::default());
//! let router = create_router(Arc::new(AppState::new(service)));
//! axum::serve(listener, router).await?;
//! ```

pub mod api;
pub mod app;
pub mod config;
pub mod domain;
pub mod infra;

// Test utilities are available in tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
