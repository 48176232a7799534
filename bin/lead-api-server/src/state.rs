use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use lead_store::{LeadRepository, NotificationRepository};

pub type IpRateLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

pub fn keyed_limiter(requests_per_second: u32) -> IpRateLimiter {
    let rps = NonZeroU32::new(requests_per_second.max(1)).expect("rps >= 1");
    RateLimiter::keyed(Quota::per_second(rps))
}

#[derive(Clone)]
pub struct AppState {
    pub leads: Arc<dyn LeadRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
    pub admin_token: String,
    pub env: String,
    pub http_host: String,
    pub http_port: u16,
    pub notify_email_enabled: bool,
    pub notify_webhook_enabled: bool,
    pub trusted_proxies: Vec<IpAddr>,
    pub metrics: lead_metrics::MetricsHandle,
    pub rum_dedupe: Arc<lead_metrics::DedupeCache>,
    pub lead_limiter: Arc<IpRateLimiter>,
    pub telemetry_limiter: Arc<IpRateLimiter>,
}

pub struct AppStateConfig {
    pub admin_token: String,
    pub env: String,
    pub http_host: String,
    pub http_port: u16,
    pub notify_email_enabled: bool,
    pub notify_webhook_enabled: bool,
    pub trusted_proxies: Vec<IpAddr>,
    pub lead_rate_limit_rps: u32,
}

impl AppState {
    pub fn new(
        leads: Arc<dyn LeadRepository>,
        notifications: Arc<dyn NotificationRepository>,
        cfg: AppStateConfig,
    ) -> Self {
        Self {
            leads,
            notifications,
            admin_token: cfg.admin_token,
            env: cfg.env,
            http_host: cfg.http_host,
            http_port: cfg.http_port,
            notify_email_enabled: cfg.notify_email_enabled,
            notify_webhook_enabled: cfg.notify_webhook_enabled,
            trusted_proxies: cfg.trusted_proxies,
            metrics: lead_metrics::init_recorder(),
            rum_dedupe: Arc::new(lead_metrics::DedupeCache::new(20_000, Duration::from_secs(600))),
            lead_limiter: Arc::new(keyed_limiter(cfg.lead_rate_limit_rps)),
            telemetry_limiter: Arc::new(keyed_limiter(30)),
        }
    }
}
