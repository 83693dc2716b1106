//! Shared utilities for the relay core: backoff/jitter helpers used by the
//! hooks dispatcher and the on-demand controller.

/// Exponential backoff with jitter.
///
/// Delays for `initial_ms * 2^(attempt-1)` capped at `max_ms`, with +/- 25% jitter
/// to prevent thundering herd on retry storms.
pub async fn backoff(attempt: u32, initial_ms: u64, max_ms: u64) {
    let base = initial_ms.saturating_mul(1u64 << attempt.min(16).saturating_sub(1));
    let capped = base.min(max_ms);
    // Add jitter: +/- 25%
    let jitter = capped / 4;
    let random_offset = u64::from(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos(),
    ) % (jitter * 2 + 1);
    let delay = (capped.saturating_sub(jitter) + random_offset).min(max_ms);
    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
}

/// Full-jitter exponential backoff (AWS-style): the delay is drawn uniformly
/// from `[0, min(max_ms, initial_ms * 2^attempt)]` rather than centered
/// around the capped value. Used by the on-demand controller's upstream
/// puller, which reconnects often enough that evenly-spread jitter matters
/// more than staying close to the ideal backoff curve.
pub async fn full_jitter_backoff(attempt: u32, initial_ms: u64, max_ms: u64) {
    let ceiling = initial_ms.saturating_mul(1u64 << attempt.min(16)).min(max_ms);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    let delay = if ceiling == 0 { 0 } else { u64::from(nanos) % (ceiling + 1) };
    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
}
