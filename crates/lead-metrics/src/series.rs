use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};

use crate::registry::init_recorder;

fn status_class(status_code: u16) -> &'static str {
    match status_code / 100 {
        1 => "1xx",
        2 => "2xx",
        3 => "3xx",
        4 => "4xx",
        5 => "5xx",
        _ => "other",
    }
}

/// Records one HTTP request. `route` must be a stable template
/// (`"/api/v1/leads"`), never the raw path, to keep label cardinality flat.
pub fn observe_http_request(route: &str, method: &str, status_code: u16, dur: Duration) {
    init_recorder();
    counter!(
        "lead_api_http_requests_total",
        "route" => route.to_string(),
        "method" => method.to_string(),
        "status_class" => status_class(status_code),
    )
    .increment(1);
    histogram!(
        "lead_api_http_request_duration_seconds",
        "route" => route.to_string(),
        "method" => method.to_string(),
    )
    .record(dur.as_secs_f64());
}

pub fn inc_lead_submission(result: &str) {
    init_recorder();
    counter!("lead_api_lead_submissions_total", "result" => result.to_string()).increment(1);
}

const KNOWN_STATUSES: &[&str] = &["pending", "processing", "sent", "failed"];

/// Mirrors the reset-then-set pattern: every known status gauge is zeroed
/// first so a status that drops to zero rows doesn't keep reporting a
/// stale positive count.
pub fn set_lead_notification_backlog(
    counts_by_status: &HashMap<String, i64>,
    pending_ready: i64,
    pending_delayed: i64,
    oldest_ready_pending_created_at: Option<DateTime<Utc>>,
) {
    init_recorder();
    for status in KNOWN_STATUSES {
        gauge!("lead_api_lead_notifications_count", "status" => *status).set(0.0);
    }
    for (status, count) in counts_by_status {
        gauge!("lead_api_lead_notifications_count", "status" => status.clone()).set(*count as f64);
    }

    gauge!("lead_api_lead_notifications_pending_ready_total").set(pending_ready as f64);
    gauge!("lead_api_lead_notifications_pending_delayed_total").set(pending_delayed as f64);

    match oldest_ready_pending_created_at {
        Some(ts) => {
            let secs = (Utc::now() - ts).num_milliseconds() as f64 / 1000.0;
            gauge!("lead_api_lead_notifications_oldest_ready_pending_present").set(1.0);
            gauge!("lead_api_lead_notifications_oldest_ready_pending_age_seconds").set(secs.max(0.0));
        }
        None => {
            gauge!("lead_api_lead_notifications_oldest_ready_pending_present").set(0.0);
            gauge!("lead_api_lead_notifications_oldest_ready_pending_age_seconds").set(0.0);
        }
    }
}

/// Records an outbox send attempt and, if a traceparent is present,
/// stamps an exemplar onto the duration histogram so an operator can jump
/// from a slow bucket straight to the trace that produced it.
pub fn observe_lead_notification_send(
    channel: &str,
    result: &str,
    dur: Duration,
    traceparent: Option<&str>,
) {
    let handle = init_recorder();
    counter!(
        "lead_api_lead_notification_send_total",
        "channel" => channel.to_string(),
        "result" => result.to_string(),
    )
    .increment(1);
    histogram!(
        "lead_api_lead_notification_send_duration_seconds",
        "channel" => channel.to_string(),
        "result" => result.to_string(),
    )
    .record(dur.as_secs_f64());

    if let Some(tp) = traceparent.and_then(crate::traceparent::trace_id_from_traceparent) {
        handle.exemplars.record(
            "lead_api_lead_notification_send_duration_seconds",
            &format!("channel=\"{channel}\",result=\"{result}\""),
            &tp,
            dur.as_secs_f64(),
        );
    }
}

/// Records an attempt to enqueue a notification job right after a lead is
/// created. Distinct from `observe_lead_notification_send`, which covers the
/// outbox worker's later delivery attempt against the channel itself.
pub fn observe_lead_notification_enqueue(channel: &str, result: &str, dur: Duration) {
    init_recorder();
    counter!(
        "lead_api_lead_notification_enqueue_total",
        "channel" => channel.to_string(),
        "result" => result.to_string(),
    )
    .increment(1);
    histogram!(
        "lead_api_lead_notification_enqueue_duration_seconds",
        "channel" => channel.to_string(),
        "result" => result.to_string(),
    )
    .record(dur.as_secs_f64());
}

pub fn inc_website_event(name: &str, device_type: &str) {
    init_recorder();
    counter!(
        "lead_api_website_events_total",
        "name" => name.to_string(),
        "device_type" => device_type.to_string(),
    )
    .increment(1);
}

pub fn observe_web_vital(metric: &str, value: f64, device_type: &str, rating: &str) {
    init_recorder();
    histogram!(
        "lead_api_web_vital",
        "metric" => metric.to_string(),
        "device_type" => device_type.to_string(),
        "rating" => rating.to_string(),
    )
    .record(value);
}
