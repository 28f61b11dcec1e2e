use crate::features::observability::repo::ObservabilityRepository;
use crate::features::observability::service::ObservabilityService;
use crate::shared::error::{RegistryError, RegistryResult};
use std::sync::Arc;

/// One per registry server, so independent servers in one process keep
/// separate counters.
pub struct ObservabilityController {
    service: ObservabilityService,
}

impl ObservabilityController {
    pub fn new(service: ObservabilityService) -> Self {
        Self { service }
    }

    pub fn create() -> RegistryResult<Arc<Self>> {
        let repo = Arc::new(ObservabilityRepository::new().map_err(RegistryError::MetricsError)?);
        Ok(Arc::new(Self::new(ObservabilityService::new(repo))))
    }

    pub fn record_api_request(&self, endpoint: &str, status: &str, seconds: f64) {
        self.service.record_api_request(endpoint, status, seconds);
    }

    pub fn set_active_instances(&self, count: usize) {
        self.service.set_active_instances(count);
    }

    pub fn record_registration(&self) {
        self.service.record_registration();
    }

    pub fn record_removal(&self) {
        self.service.record_removal();
    }

    pub fn record_evictions(&self, evicted: usize) {
        self.service.record_evictions(evicted);
    }

    pub fn render_metrics(&self) -> RegistryResult<String> {
        self.service
            .render_metrics()
            .map_err(RegistryError::MetricsError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_render_contains_known_metric_names() {
        let controller = ObservabilityController::create().unwrap();
        controller.record_api_request("/workers", "200", 0.01);
        controller.record_registration();
        controller.set_active_instances(3);

        let rendered = controller.render_metrics().unwrap();
        assert!(rendered.contains("devlink_api_request_total"));
        assert!(rendered.contains("devlink_registration_total 1"));
        assert!(rendered.contains("devlink_active_instance_count 3"));
    }

    #[test]
    fn test_zero_evictions_leave_counter_untouched() {
        let controller = ObservabilityController::create().unwrap();
        controller.record_evictions(0);
        controller.record_evictions(2);

        let rendered = controller.render_metrics().unwrap();
        assert!(rendered.contains("devlink_eviction_total 2"));
    }
}
