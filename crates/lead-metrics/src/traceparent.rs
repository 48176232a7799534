use rand::RngCore;

/// Generates a fresh W3C traceparent: `00-<32 hex>-<16 hex>-01`. Deliberately
/// minimal — this is request correlation for logs and exemplars, not a full
/// distributed tracing implementation.
pub fn generate_traceparent() -> String {
    let mut trace_id = [0u8; 16];
    let mut span_id = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut trace_id);
    rand::thread_rng().fill_bytes(&mut span_id);
    format!("00-{}-{}-01", hex::encode(trace_id), hex::encode(span_id))
}

/// Returns `incoming` unchanged if it looks like a well-formed traceparent,
/// otherwise generates a new one. Client-supplied trace context is echoed
/// back, never overridden, so downstream correlation survives proxies.
pub fn ensure_traceparent(incoming: Option<&str>) -> String {
    match incoming {
        Some(tp) if trace_id_from_traceparent(tp).is_some() => tp.to_string(),
        _ => generate_traceparent(),
    }
}

/// Extracts the 32-hex-character trace-id field from a traceparent header,
/// validating the overall `version-traceid-spanid-flags` shape loosely
/// (exact version/flags values aren't load-bearing for correlation).
pub fn trace_id_from_traceparent(header: &str) -> Option<String> {
    let mut parts = header.trim().split('-');
    let _version = parts.next()?;
    let trace_id = parts.next()?;
    let span_id = parts.next()?;
    let _flags = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    if trace_id.len() != 32 || !trace_id.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    if span_id.len() != 16 || !span_id.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    if trace_id.bytes().all(|b| b == b'0') {
        return None;
    }
    Some(trace_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_traceparent_round_trips() {
        let tp = generate_traceparent();
        assert!(trace_id_from_traceparent(&tp).is_some());
    }

    #[test]
    fn malformed_header_is_rejected() {
        assert!(trace_id_from_traceparent("not-a-traceparent").is_none());
        assert!(trace_id_from_traceparent("00-00000000000000000000000000000000-0000000000000000-01").is_none());
    }

    #[test]
    fn ensure_traceparent_echoes_valid_incoming() {
        let tp = generate_traceparent();
        assert_eq!(ensure_traceparent(Some(&tp)), tp);
    }

    #[test]
    fn ensure_traceparent_generates_when_missing() {
        let tp = ensure_traceparent(None);
        assert!(trace_id_from_traceparent(&tp).is_some());
    }
}
