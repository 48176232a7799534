use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::exemplar::ExemplarStore;

const HTTP_DURATION_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];
const SEND_DURATION_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

static HANDLE: OnceLock<MetricsHandle> = OnceLock::new();

/// Holds the installed Prometheus recorder handle plus the exemplar side
/// table, since the `metrics` facade has no first-class exemplar support.
#[derive(Clone)]
pub struct MetricsHandle {
    prometheus: PrometheusHandle,
    pub exemplars: ExemplarStore,
}

impl MetricsHandle {
    /// Renders the registry as OpenMetrics text, with trace-id exemplars
    /// spliced onto the histogram bucket lines they were observed against.
    pub fn render(&self) -> String {
        let rendered = self.prometheus.render();
        self.exemplars.annotate(&rendered)
    }
}

/// Installs the global recorder and registers series metadata. Idempotent:
/// later calls return the handle created by the first one, matching the
/// register-once semantics this is ported from.
pub fn init_recorder() -> MetricsHandle {
    HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new()
                .set_buckets_for_metric(
                    metrics_exporter_prometheus::Matcher::Full(
                        "lead_api_http_request_duration_seconds".to_string(),
                    ),
                    HTTP_DURATION_BUCKETS,
                )
                .expect("valid http duration buckets")
                .set_buckets_for_metric(
                    metrics_exporter_prometheus::Matcher::Full(
                        "lead_api_lead_notification_send_duration_seconds".to_string(),
                    ),
                    SEND_DURATION_BUCKETS,
                )
                .expect("valid send duration buckets");

            let prometheus = builder.install_recorder().expect("install prometheus recorder");

            metrics::describe_counter!(
                "lead_api_http_requests_total",
                "HTTP requests observed by the API, labeled by route/method/status_class."
            );
            metrics::describe_histogram!(
                "lead_api_http_request_duration_seconds",
                "HTTP request duration in seconds, labeled by route/method."
            );
            metrics::describe_counter!(
                "lead_api_lead_submissions_total",
                "Total lead submissions observed by the API, labeled by result."
            );
            metrics::describe_gauge!(
                "lead_api_lead_notifications_count",
                "Count of lead_notifications rows, labeled by status."
            );
            metrics::describe_gauge!(
                "lead_api_lead_notifications_pending_ready_total",
                "Number of pending notifications ready to be sent (next_attempt_at <= now)."
            );
            metrics::describe_gauge!(
                "lead_api_lead_notifications_pending_delayed_total",
                "Number of pending notifications delayed for retry/backoff."
            );
            metrics::describe_gauge!(
                "lead_api_lead_notifications_oldest_ready_pending_age_seconds",
                "Age in seconds of the oldest ready-to-send pending notification. 0 when none."
            );
            metrics::describe_gauge!(
                "lead_api_lead_notifications_oldest_ready_pending_present",
                "1 if there is at least one ready-to-send pending notification, else 0."
            );
            metrics::describe_counter!(
                "lead_api_lead_notification_send_total",
                "Outbox send attempts, labeled by channel/result."
            );
            metrics::describe_histogram!(
                "lead_api_lead_notification_send_duration_seconds",
                "Outbox send duration in seconds, labeled by channel/result."
            );
            metrics::describe_counter!(
                "lead_api_lead_notification_enqueue_total",
                "Notification enqueue attempts made right after lead creation, labeled by channel/result."
            );
            metrics::describe_histogram!(
                "lead_api_lead_notification_enqueue_duration_seconds",
                "Notification enqueue duration in seconds, labeled by channel/result."
            );
            metrics::describe_counter!(
                "lead_api_website_events_total",
                "Website analytics events, labeled by name/device_type."
            );
            metrics::describe_histogram!(
                "lead_api_web_vital",
                "Web Vitals values reported by RUM, labeled by metric/device_type/rating."
            );

            MetricsHandle {
                prometheus,
                exemplars: ExemplarStore::default(),
            }
        })
        .clone()
}
