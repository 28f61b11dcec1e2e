use crate::features::observability::repo::ObservabilityRepository;
use std::sync::Arc;

pub struct ObservabilityService {
    repo: Arc<ObservabilityRepository>,
}

impl ObservabilityService {
    pub fn new(repo: Arc<ObservabilityRepository>) -> Self {
        Self { repo }
    }

    pub fn record_api_request(&self, endpoint: &str, status: &str, seconds: f64) {
        self.repo.observe_api_request(endpoint, status, seconds);
    }

    pub fn set_active_instances(&self, count: usize) {
        self.repo.set_active_instance_count(count as f64);
    }

    pub fn record_registration(&self) {
        self.repo.inc_registration_total();
    }

    pub fn record_removal(&self) {
        self.repo.inc_removal_total();
    }

    pub fn record_evictions(&self, evicted: usize) {
        if evicted > 0 {
            self.repo.inc_eviction_total(evicted);
        }
    }

    pub fn render_metrics(&self) -> Result<String, String> {
        self.repo.render_metrics()
    }
}
