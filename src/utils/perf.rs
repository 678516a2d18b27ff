//! Performance measurement utilities for memory and timing analysis.
//!
//! Peak memory is read from /proc/self/status on Linux. Timing goes through
//! [`timed`], which every phase of a KPM computation uses to fill its
//! [`crate::stats::Stats`] record.

use std::time::{Duration, Instant};

/// Runs `f` and returns its result together with the elapsed wall-clock time.
#[inline]
pub fn timed<R>(f: impl FnOnce() -> R) -> (R, Duration) {
    let start = Instant::now();
    let result = f();
    (result, start.elapsed())
}

/// Reads the peak resident set size (VmHWM) from /proc/self/status on Linux.
///
/// # Returns
/// The peak memory usage in kilobytes (KB), or 0 if the value cannot be read
/// or the platform is not Linux.
#[cfg(target_os = "linux")]
pub fn peak_rss_kb() -> u64 {
    let status_content = match std::fs::read_to_string("/proc/self/status") {
        Ok(content) => content,
        Err(_) => return 0,
    };

    status_content
        .lines()
        .find(|line| line.starts_with("VmHWM:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

/// A dummy implementation for non-Linux platforms to ensure the code compiles.
#[cfg(not(target_os = "linux"))]
pub fn peak_rss_kb() -> u64 {
    use std::sync::Once;
    static WARN_ONCE: Once = Once::new();
    WARN_ONCE.call_once(|| {
        log::warn!("Peak RSS measurement is only supported on Linux; returning 0.");
    });
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timed_returns_result() {
        let (value, elapsed) = timed(|| (0..1000u64).sum::<u64>());
        assert_eq!(value, 499_500);
        assert!(elapsed < Duration::from_secs(10));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_peak_rss_is_positive_on_linux() {
        assert!(peak_rss_kb() > 0);
    }
}
