use prometheus::{
    opts, Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Registry, TextEncoder,
};

pub struct ObservabilityRepository {
    registry: Registry,
    active_instance_count: Gauge,
    registration_total: Counter,
    removal_total: Counter,
    eviction_total: Counter,
    api_request_total: CounterVec,
    api_request_latency_seconds: HistogramVec,
}

impl ObservabilityRepository {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();

        let active_instance_count = Gauge::with_opts(opts!(
            "devlink_active_instance_count",
            "Instances currently registered"
        ))
        .map_err(|e| e.to_string())?;
        let registration_total = Counter::with_opts(opts!(
            "devlink_registration_total",
            "Registrations and re-registrations total"
        ))
        .map_err(|e| e.to_string())?;
        let removal_total = Counter::with_opts(opts!(
            "devlink_removal_total",
            "Explicit deregistrations total"
        ))
        .map_err(|e| e.to_string())?;
        let eviction_total = Counter::with_opts(opts!(
            "devlink_eviction_total",
            "Registrations evicted for missing heartbeats"
        ))
        .map_err(|e| e.to_string())?;
        let api_request_total = CounterVec::new(
            opts!("devlink_api_request_total", "Registry API request total"),
            &["endpoint", "status"],
        )
        .map_err(|e| e.to_string())?;
        let api_request_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "devlink_api_request_latency_seconds",
                "Registry API request latency (seconds)",
            ),
            &["endpoint"],
        )
        .map_err(|e| e.to_string())?;

        registry
            .register(Box::new(active_instance_count.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(registration_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(removal_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(eviction_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(api_request_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(api_request_latency_seconds.clone()))
            .map_err(|e| e.to_string())?;

        Ok(Self {
            registry,
            active_instance_count,
            registration_total,
            removal_total,
            eviction_total,
            api_request_total,
            api_request_latency_seconds,
        })
    }

    pub fn set_active_instance_count(&self, count: f64) {
        self.active_instance_count.set(count);
    }

    pub fn inc_registration_total(&self) {
        self.registration_total.inc();
    }

    pub fn inc_removal_total(&self) {
        self.removal_total.inc();
    }

    pub fn inc_eviction_total(&self, evicted: usize) {
        self.eviction_total.inc_by(evicted as f64);
    }

    pub fn observe_api_request(&self, endpoint: &str, status: &str, seconds: f64) {
        self.api_request_total
            .with_label_values(&[endpoint, status])
            .inc();
        self.api_request_latency_seconds
            .with_label_values(&[endpoint])
            .observe(seconds);
    }

    pub fn render_metrics(&self) -> Result<String, String> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|e| e.to_string())?;
        String::from_utf8(buffer).map_err(|e| e.to_string())
    }
}
