/// Wall-clock milliseconds since the Unix epoch, used for persisted timestamps.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
