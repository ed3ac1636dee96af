//! Best-effort resource usage readings via getrusage and procfs.

/// Peak resident set size of this process, in bytes.
///
/// On Linux this is `VmHWM`, which [`reset_peak_rss`] can lower again.
pub fn peak_rss_self() -> Option<u64> {
    imp::peak_rss_self()
}

/// Resets this process's resident set high-water mark to the current RSS.
///
/// Returns false where the mark cannot be reset; readings from
/// [`peak_rss_self`] then cover the whole process lifetime.
pub fn reset_peak_rss() -> bool {
    imp::reset_peak_rss()
}

/// User plus system CPU time consumed by this process, in seconds
pub fn cpu_seconds_self() -> Option<f64> {
    imp::cpu_seconds(imp::Who::SelfProcess)
}

/// User plus system CPU time of all reaped children, in seconds
pub fn cpu_seconds_children() -> Option<f64> {
    imp::cpu_seconds(imp::Who::Children)
}

/// Current virtual memory size of this process, in bytes
pub fn virtual_memory_self() -> Option<u64> {
    imp::status_kb("VmSize:")
}

#[cfg(unix)]
mod imp {
    use nix::sys::resource::{UsageWho, getrusage};

    pub(super) enum Who {
        SelfProcess,
        Children,
    }

    // ru_maxrss is kilobytes on Linux and bytes on macOS
    #[cfg(target_os = "macos")]
    const MAXRSS_UNIT: u64 = 1;
    #[cfg(not(target_os = "macos"))]
    const MAXRSS_UNIT: u64 = 1024;

    pub(super) fn peak_rss_self() -> Option<u64> {
        if let Some(hwm) = status_kb("VmHWM:") {
            return Some(hwm);
        }
        let usage = getrusage(UsageWho::RUSAGE_SELF).ok()?;
        u64::try_from(usage.max_rss())
            .ok()
            .filter(|rss| *rss > 0)
            .map(|rss| rss * MAXRSS_UNIT)
    }

    #[cfg(target_os = "linux")]
    pub(super) fn reset_peak_rss() -> bool {
        // "5" resets VmHWM, see proc(5)
        std::fs::write("/proc/self/clear_refs", "5").is_ok()
    }

    #[cfg(not(target_os = "linux"))]
    pub(super) fn reset_peak_rss() -> bool {
        false
    }

    pub(super) fn cpu_seconds(who: Who) -> Option<f64> {
        let who = match who {
            Who::SelfProcess => UsageWho::RUSAGE_SELF,
            Who::Children => UsageWho::RUSAGE_CHILDREN,
        };
        let usage = getrusage(who).ok()?;
        let user = usage.user_time();
        let system = usage.system_time();
        let micros = (user.tv_sec() + system.tv_sec()) as f64 * 1e6
            + (user.tv_usec() + system.tv_usec()) as f64;
        Some(micros / 1e6)
    }

    /// A `kB` field of /proc/self/status, in bytes
    pub(super) fn status_kb(field: &str) -> Option<u64> {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        status
            .lines()
            .find_map(|line| line.strip_prefix(field))
            .and_then(|rest| rest.trim().trim_end_matches("kB").trim().parse::<u64>().ok())
            .map(|kb| kb * 1024)
    }
}

#[cfg(not(unix))]
mod imp {
    pub(super) enum Who {
        SelfProcess,
        Children,
    }

    pub(super) fn peak_rss_self() -> Option<u64> {
        None
    }

    pub(super) fn reset_peak_rss() -> bool {
        false
    }

    pub(super) fn cpu_seconds(_who: Who) -> Option<f64> {
        None
    }

    pub(super) fn status_kb(_field: &str) -> Option<u64> {
        None
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn test_self_readings_available() {
        assert!(peak_rss_self().unwrap() > 0);
        assert!(virtual_memory_self().unwrap() > 0);
        assert!(cpu_seconds_self().unwrap() >= 0.0);
        assert!(cpu_seconds_children().unwrap() >= 0.0);
    }

    #[test]
    fn test_reset_lowers_high_water_mark() {
        let spike = vec![1u8; 64 * 1024 * 1024];
        std::hint::black_box(&spike);
        let peak = peak_rss_self().unwrap();
        drop(spike);

        if !reset_peak_rss() {
            return;
        }
        let after = peak_rss_self().unwrap();
        assert!(after < peak, "high-water mark {} not below {}", after, peak);
    }
}
