//! Metric series, traceparent propagation, and RUM dedupe for the lead
//! intake/outbox service. Series names and label sets mirror a Prometheus
//! client registered once at process start; rendering happens through
//! `metrics-exporter-prometheus`'s text exporter.

mod dedupe;
mod exemplar;
mod registry;
mod series;
mod traceparent;

pub use dedupe::DedupeCache;
pub use exemplar::ExemplarStore;
pub use registry::{init_recorder, MetricsHandle};
pub use series::{
    inc_lead_submission, inc_website_event, observe_http_request,
    observe_lead_notification_enqueue, observe_lead_notification_send, observe_web_vital,
    set_lead_notification_backlog,
};
pub use traceparent::{ensure_traceparent, generate_traceparent, trace_id_from_traceparent};
