//! Raw `/proc` readers used by the sampler and the adapter.
//!
//! Field positions are taken relative to the closing paren of the comm
//! field, so command names containing spaces cannot shift the parse.

use std::fs;
use std::path::Path;

/// Kernel clock ticks per second (`SC_CLK_TCK`); 100 when unknown.
pub fn clock_ticks_per_sec() -> i64 {
    #[cfg(unix)]
    {
        let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        if ticks > 0 {
            return ticks;
        }
    }
    100
}

/// Fields of `/proc/<pid>/stat` after the comm field, split on spaces.
fn stat_rest(pid: i32) -> Option<Vec<String>> {
    let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let rest = stat.rsplit_once(')')?.1;
    Some(rest.split_whitespace().map(|s| s.to_string()).collect())
}

/// `(utime, stime)` in clock ticks for `pid`.
///
/// utime and stime are overall stat fields 14 and 15; after the comm
/// field they sit at indices 11 and 12.
pub fn read_cpu_ticks(pid: i32) -> Option<(u64, u64)> {
    let rest = stat_rest(pid)?;
    let utime = rest.get(11)?.parse().ok()?;
    let stime = rest.get(12)?.parse().ok()?;
    Some((utime, stime))
}

/// Resident set size in KB from `/proc/<pid>/statm` (pages * 4KB).
pub fn read_rss_kb(pid: i32) -> u64 {
    fs::read_to_string(format!("/proc/{pid}/statm"))
        .ok()
        .and_then(|s| {
            s.split_whitespace()
                .nth(1)
                .and_then(|pages| pages.parse::<u64>().ok())
        })
        .map(|pages| pages * 4)
        .unwrap_or(0)
}

/// Command name of `pid`, trimmed.
pub fn read_comm(pid: i32) -> Option<String> {
    fs::read_to_string(format!("/proc/{pid}/comm"))
        .ok()
        .map(|s| s.trim().to_string())
}

/// Whether `/proc/<pid>` exists.
pub fn pid_alive(pid: i32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

/// Boot time in epoch seconds from the `btime` line of `/proc/stat`.
pub fn boot_time_secs() -> Option<i64> {
    let stat = fs::read_to_string("/proc/stat").ok()?;
    for line in stat.lines() {
        if let Some(rest) = line.strip_prefix("btime ") {
            return rest.trim().parse().ok();
        }
    }
    None
}

/// Process start time in epoch milliseconds.
///
/// Computed from the starttime tick count (overall stat field 22,
/// index 19 after comm) and the boot time; this survives scheduler
/// delays between fork and exec, unlike sampling the wall clock.
pub fn process_start_epoch_ms(pid: i32) -> Option<i64> {
    let rest = stat_rest(pid)?;
    let start_ticks: f64 = rest.get(19)?.parse().ok()?;
    let btime = boot_time_secs()?;
    let ticks = clock_ticks_per_sec() as f64;
    let start_sec = btime as f64 + start_ticks / ticks;
    Some((start_sec * 1000.0).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_ticks_positive() {
        assert!(clock_ticks_per_sec() > 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_read_own_process() {
        let pid = std::process::id() as i32;
        assert!(pid_alive(pid));
        let (utime, stime) = read_cpu_ticks(pid).unwrap();
        // Ticks only accumulate; both fields parse as integers.
        assert!(utime < u64::MAX && stime < u64::MAX);
        assert!(read_rss_kb(pid) > 0);
        assert!(read_comm(pid).is_some());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_start_time_is_in_the_past() {
        let pid = std::process::id() as i32;
        let start = process_start_epoch_ms(pid).unwrap();
        let now = crate::core::now_ms();
        assert!(start <= now);
        // Started within the last day.
        assert!(now - start < 24 * 3600 * 1000);
    }

    #[test]
    fn test_dead_pid_reads_none() {
        // PID 0 has no /proc entry on Linux; elsewhere the file is absent.
        assert_eq!(read_cpu_ticks(-1), None);
        assert_eq!(read_comm(-1), None);
        assert!(!pid_alive(-1));
    }
}
