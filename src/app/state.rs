//! Application state management.
//!
//! This module provides the shared application state that is
//! accessible to all request handlers via Axum's State extractor.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use super::scheduler::JobScheduler;
use super::service::WalletService;

/// Shared application state for the Axum web server.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<WalletService>,
    pub scheduler: Arc<JobScheduler>,
    /// Renders `/metrics`; absent when no recorder was installed.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    #[must_use]
    pub fn new(service: Arc<WalletService>) -> Self {
        let scheduler = service.scheduler();
        Self {
            service,
            scheduler,
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::provisioning::ProvisioningSettings;
    use crate::app::scheduler::SchedulerConfig;
    use crate::app::service::ServiceDependencies;
    use crate::test_utils::{InMemoryStore, MockNotifier, MockRemoteWalletService};

    fn state() -> AppState {
        let store = Arc::new(InMemoryStore::new());
        let service = WalletService::new(ServiceDependencies {
            wallets: store.clone(),
            jobs: store,
            wallet_service: Arc::new(MockRemoteWalletService::new()),
            notifier: Arc::new(MockNotifier::new()),
            provisioning: ProvisioningSettings::default(),
            scheduler: SchedulerConfig::default(),
        });
        AppState::new(Arc::new(service))
    }

    #[test]
    fn test_app_state_shares_scheduler_with_service() {
        let state = state();
        assert!(Arc::ptr_eq(&state.scheduler, &state.service.scheduler()));
        assert!(state.metrics.is_none());
    }

    #[test]
    fn test_app_state_is_clone() {
        let state = state();
        let cloned = state.clone();
        assert!(Arc::ptr_eq(&state.service, &cloned.service));
    }
}
