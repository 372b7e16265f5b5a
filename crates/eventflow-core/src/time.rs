//! Wall-clock helpers. All timestamps in EventFlow are milliseconds
//! since the UNIX epoch, stored as `i64`.

/// Current time in milliseconds since epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_is_after_2020() {
        assert!(now_ms() > 1_577_836_800_000);
    }
}
