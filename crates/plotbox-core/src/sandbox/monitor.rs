//! Scoped OS resource ceilings for in-process execution
//!
//! [`ResourceMonitor::acquire`] lowers the soft `RLIMIT_AS` and `RLIMIT_CPU`
//! limits of the current process and returns a guard that restores the
//! previous values when dropped, on every exit path. Only soft limits are
//! touched so the originals can always be restored.
//!
//! Ceilings are process-global, so at most one guard exists at a time;
//! `acquire` blocks until the previous guard is dropped.

use super::limits::ResourceLimits;
use parking_lot::{Mutex, MutexGuard, const_mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

static CEILING_LOCK: Mutex<()> = const_mutex(());

/// Applies resource ceilings around a unit of work
#[derive(Debug, Clone)]
pub struct ResourceMonitor {
    limits: ResourceLimits,
}

impl ResourceMonitor {
    pub fn new(limits: ResourceLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Apply the ceilings until the returned guard is dropped
    pub fn acquire(&self) -> ResourceGuard {
        let lock = CEILING_LOCK.lock();
        let cpu_exceeded = Arc::new(AtomicBool::new(false));
        let state = platform::apply(&self.limits, &cpu_exceeded);
        ResourceGuard {
            state,
            cpu_exceeded,
            _lock: lock,
        }
    }
}

/// Restores the previous ceilings on drop
pub struct ResourceGuard {
    state: platform::AppliedLimits,
    cpu_exceeded: Arc<AtomicBool>,
    _lock: MutexGuard<'static, ()>,
}

impl ResourceGuard {
    /// Whether any ceiling is actually in force
    pub fn is_enforcing(&self) -> bool {
        self.state.is_enforcing()
    }

    /// Set once the kernel signals that the CPU ceiling was crossed
    pub fn cpu_exceeded(&self) -> bool {
        self.cpu_exceeded.load(Ordering::SeqCst)
    }

    /// Shared flag for watchers on other threads
    pub fn cpu_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cpu_exceeded)
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        self.state.restore();
    }
}

impl std::fmt::Debug for ResourceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGuard")
            .field("enforcing", &self.is_enforcing())
            .field("cpu_exceeded", &self.cpu_exceeded())
            .finish()
    }
}

#[cfg(unix)]
mod platform {
    use super::super::limits::ResourceLimits;
    use super::super::usage;
    use nix::sys::resource::{Resource, getrlimit, setrlimit};
    use signal_hook::SigId;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use tracing::{debug, warn};

    #[derive(Debug)]
    struct SavedLimit {
        resource: Resource,
        soft: libc::rlim_t,
        hard: libc::rlim_t,
    }

    #[derive(Debug, Default)]
    pub(super) struct AppliedLimits {
        saved: Vec<SavedLimit>,
        signal: Option<SigId>,
        restored: bool,
    }

    impl AppliedLimits {
        pub(super) fn is_enforcing(&self) -> bool {
            !self.saved.is_empty()
        }

        pub(super) fn restore(&mut self) {
            if self.restored {
                return;
            }
            self.restored = true;

            for saved in self.saved.drain(..).rev() {
                if let Err(e) = setrlimit(saved.resource, saved.soft, saved.hard) {
                    warn!(resource = ?saved.resource, error = %e, "failed to restore resource limit");
                }
            }
            if let Some(id) = self.signal.take() {
                signal_hook::low_level::unregister(id);
            }
            debug!("resource limits restored");
        }
    }

    pub(super) fn apply(limits: &ResourceLimits, cpu_flag: &Arc<AtomicBool>) -> AppliedLimits {
        let mut applied = AppliedLimits::default();

        if let Some(max_memory) = limits.max_memory_bytes {
            match usage::virtual_memory_self() {
                Some(current) => {
                    lower_soft_limit(&mut applied, Resource::RLIMIT_AS, current.saturating_add(max_memory))
                }
                None => warn!("cannot read current address space size, memory ceiling skipped"),
            }
        }

        if let Some(max_cpu) = limits.max_cpu_seconds {
            let used = usage::cpu_seconds_self().unwrap_or(0.0).ceil() as u64;
            match signal_hook::flag::register(signal_hook::consts::SIGXCPU, Arc::clone(cpu_flag)) {
                Ok(id) => {
                    applied.signal = Some(id);
                    lower_soft_limit(&mut applied, Resource::RLIMIT_CPU, used.saturating_add(max_cpu));
                }
                Err(e) => warn!(error = %e, "cannot watch SIGXCPU, CPU ceiling skipped"),
            }
        }

        applied
    }

    /// Lower the soft limit to `target` (never raising it), remembering the old pair
    fn lower_soft_limit(applied: &mut AppliedLimits, resource: Resource, target: u64) {
        let (soft, hard) = match getrlimit(resource) {
            Ok(pair) => pair,
            Err(e) => {
                warn!(resource = ?resource, error = %e, "getrlimit failed, ceiling skipped");
                return;
            }
        };

        let target = target as libc::rlim_t;
        let new_soft = target.min(soft).min(hard);
        if new_soft == soft {
            debug!(resource = ?resource, "existing limit already tighter");
            return;
        }

        match setrlimit(resource, new_soft, hard) {
            Ok(()) => {
                debug!(resource = ?resource, soft = new_soft, "resource ceiling applied");
                applied.saved.push(SavedLimit {
                    resource,
                    soft,
                    hard,
                });
            }
            Err(e) => warn!(resource = ?resource, error = %e, "setrlimit failed, ceiling skipped"),
        }
    }
}

#[cfg(not(unix))]
mod platform {
    use super::super::limits::ResourceLimits;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    #[derive(Debug, Default)]
    pub(super) struct AppliedLimits;

    impl AppliedLimits {
        pub(super) fn is_enforcing(&self) -> bool {
            false
        }

        pub(super) fn restore(&mut self) {}
    }

    pub(super) fn apply(_limits: &ResourceLimits, _cpu_flag: &Arc<AtomicBool>) -> AppliedLimits {
        tracing::warn!("resource limits are not supported on this platform, running without ceilings");
        AppliedLimits
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use nix::sys::resource::{Resource, getrlimit};
    use serial_test::serial;

    fn limits(memory: Option<u64>, cpu: Option<u64>) -> ResourceLimits {
        ResourceLimits {
            max_memory_bytes: memory,
            max_cpu_seconds: cpu,
            ..ResourceLimits::unlimited()
        }
    }

    #[test]
    #[serial]
    fn test_limits_restored_on_drop() {
        let before_as = getrlimit(Resource::RLIMIT_AS).unwrap();
        let before_cpu = getrlimit(Resource::RLIMIT_CPU).unwrap();

        {
            let monitor = ResourceMonitor::new(limits(Some(512 * 1024 * 1024), Some(60)));
            let guard = monitor.acquire();
            let (soft_as, hard_as) = getrlimit(Resource::RLIMIT_AS).unwrap();
            assert!(soft_as <= before_as.0);
            assert_eq!(hard_as, before_as.1);
            if before_as.0 == libc::RLIM_INFINITY {
                assert!(guard.is_enforcing());
                assert!(soft_as < libc::RLIM_INFINITY);
            }
            assert!(!guard.cpu_exceeded());
        }

        assert_eq!(getrlimit(Resource::RLIMIT_AS).unwrap(), before_as);
        assert_eq!(getrlimit(Resource::RLIMIT_CPU).unwrap(), before_cpu);
    }

    #[test]
    #[serial]
    fn test_limits_restored_after_panic() {
        let before_as = getrlimit(Resource::RLIMIT_AS).unwrap();

        let outcome = std::panic::catch_unwind(|| {
            let monitor = ResourceMonitor::new(limits(Some(256 * 1024 * 1024), None));
            let _guard = monitor.acquire();
            panic!("work failed");
        });
        assert!(outcome.is_err());
        assert_eq!(getrlimit(Resource::RLIMIT_AS).unwrap(), before_as);
    }

    #[test]
    #[serial]
    fn test_unlimited_is_noop() {
        let monitor = ResourceMonitor::new(ResourceLimits::unlimited());
        let guard = monitor.acquire();
        assert!(!guard.is_enforcing());
    }
}
