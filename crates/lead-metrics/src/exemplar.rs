use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

#[derive(Debug, Clone)]
struct Recorded {
    trace_id: String,
    value: f64,
    recorded_at: DateTime<Utc>,
}

/// Side table of the most recent trace id observed per (metric, label set).
/// `metrics-exporter-prometheus` has no first-class exemplar support, so
/// exemplars are spliced onto the rendered text afterward.
#[derive(Clone, Default)]
pub struct ExemplarStore {
    inner: Arc<Mutex<HashMap<String, Recorded>>>,
}

/// Exemplars older than this are no longer attached to a render; a stale
/// trace id pointing at a long-gone request is worse than no exemplar.
const MAX_AGE_SECONDS: i64 = 300;

impl ExemplarStore {
    pub fn record(&self, metric: &str, labels: &str, trace_id: &str, value: f64) {
        let key = format!("{metric}{{{labels}}}");
        let mut guard = self.inner.lock();
        guard.insert(
            key,
            Recorded {
                trace_id: trace_id.to_string(),
                value,
                recorded_at: Utc::now(),
            },
        );
    }

    /// Appends an OpenMetrics exemplar comment to the smallest histogram
    /// bucket line (`<metric>_bucket{...,le="..."}`) whose label set
    /// matches a recorded exemplar and whose bucket boundary is greater
    /// than or equal to the exemplar's observed value. Each exemplar
    /// annotates at most one bucket line per render.
    pub fn annotate(&self, rendered: &str) -> String {
        let guard = self.inner.lock();
        let now = Utc::now();
        let mut used: Vec<bool> = vec![false; guard.len()];
        let entries: Vec<(&String, &Recorded)> = guard.iter().collect();

        let mut out = String::with_capacity(rendered.len());
        for line in rendered.lines() {
            out.push_str(line);
            if let Some(annotated) = annotate_line(line, &entries, &mut used, now) {
                out.push(' ');
                out.push_str(&annotated);
            }
            out.push('\n');
        }
        out
    }
}

fn annotate_line(
    line: &str,
    entries: &[(&String, &Recorded)],
    used: &mut [bool],
    now: DateTime<Utc>,
) -> Option<String> {
    let bucket_start = line.find("_bucket{")?;
    let labels_start = bucket_start + "_bucket{".len();
    let labels_end = line[labels_start..].find('}')? + labels_start;
    let labels = &line[labels_start..labels_end];
    let le = parse_le(labels)?;

    for (i, (key, recorded)) in entries.iter().enumerate() {
        if used[i] {
            continue;
        }
        if (now - recorded.recorded_at).num_seconds() > MAX_AGE_SECONDS {
            continue;
        }
        let label_part = key.splitn(2, '{').nth(1).unwrap_or("").trim_end_matches('}');
        if !labels.contains(label_part) {
            continue;
        }
        if recorded.value > le {
            continue;
        }
        used[i] = true;
        return Some(format!(
            "# {{trace_id=\"{}\"}} {} {}",
            recorded.trace_id,
            recorded.value,
            now.timestamp()
        ));
    }
    None
}

fn parse_le(labels: &str) -> Option<f64> {
    for pair in labels.split(',') {
        if let Some(v) = pair.strip_prefix("le=\"") {
            let v = v.trim_end_matches('"');
            if v == "+Inf" {
                return Some(f64::INFINITY);
            }
            return v.parse().ok();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotates_matching_bucket_once() {
        let store = ExemplarStore::default();
        store.record("lead_api_lead_notification_send_duration_seconds", "channel=\"email\",result=\"ok\"", "abc123", 0.2);

        let rendered = "lead_api_lead_notification_send_duration_seconds_bucket{channel=\"email\",result=\"ok\",le=\"0.1\"} 1\n\
             lead_api_lead_notification_send_duration_seconds_bucket{channel=\"email\",result=\"ok\",le=\"0.25\"} 2\n";

        let annotated = store.annotate(rendered);
        let lines: Vec<&str> = annotated.lines().collect();
        assert!(!lines[0].contains("trace_id"));
        assert!(lines[1].contains("trace_id=\"abc123\""));
    }

    #[test]
    fn leaves_unmatched_render_untouched() {
        let store = ExemplarStore::default();
        let rendered = "lead_api_http_requests_total{route=\"/x\",method=\"GET\",status_class=\"2xx\"} 1\n";
        assert_eq!(store.annotate(rendered), rendered);
    }
}
