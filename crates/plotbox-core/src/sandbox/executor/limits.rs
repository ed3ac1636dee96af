//! Platform-specific resource limit handling for the child interpreter

use crate::sandbox::limits::ResourceLimits;
use tokio::process::Command;

/// Apply Unix-specific resource limits to the child before exec
#[cfg(unix)]
pub(super) fn apply_child_limits(cmd: &mut Command, limits: &ResourceLimits) {
    use nix::sys::resource::Resource;

    let max_memory = limits.max_memory_bytes;
    let max_cpu = limits.max_cpu_seconds;
    let max_files = limits.max_open_files;
    let max_processes = limits.max_processes;

    // The child gets its own process group so the supervisor can kill
    // everything it spawns.
    cmd.process_group(0);

    // SAFETY: pre_exec runs between fork() and exec() in the child process.
    // The closure only calls getrlimit/setrlimit, which are async-signal-safe,
    // and captures Copy values only. The parent's limits are unaffected.
    unsafe {
        cmd.pre_exec(move || {
            if let Some(mem) = max_memory {
                cap_limit(Resource::RLIMIT_AS, mem, mem)?;
            }

            // SIGXCPU at the soft limit, SIGKILL one second later
            if let Some(cpu) = max_cpu {
                cap_limit(Resource::RLIMIT_CPU, cpu, cpu.saturating_add(1))?;
            }

            if let Some(files) = max_files {
                cap_limit(Resource::RLIMIT_NOFILE, files, files)?;
            }

            limit_processes(max_processes)?;
            Ok(())
        });
    }
}

/// Set a limit pair, never above the inherited hard limit
#[cfg(unix)]
fn cap_limit(resource: nix::sys::resource::Resource, soft: u64, hard: u64) -> nix::Result<()> {
    use nix::sys::resource::{getrlimit, setrlimit};

    let (_, current_hard) = getrlimit(resource)?;
    let hard = (hard as libc::rlim_t).min(current_hard);
    let soft = (soft as libc::rlim_t).min(hard);
    setrlimit(resource, soft, hard)
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "freebsd"))]
fn limit_processes(max_processes: Option<u64>) -> nix::Result<()> {
    match max_processes {
        Some(processes) => cap_limit(nix::sys::resource::Resource::RLIMIT_NPROC, processes, processes),
        None => Ok(()),
    }
}

#[cfg(all(unix, not(any(target_os = "linux", target_os = "macos", target_os = "freebsd"))))]
fn limit_processes(_max_processes: Option<u64>) -> nix::Result<()> {
    Ok(())
}

/// No-op for non-Unix platforms
#[cfg(not(unix))]
pub(super) fn apply_child_limits(_cmd: &mut Command, _limits: &ResourceLimits) {
    tracing::warn!("child resource limits are not supported on this platform");
}

/// Kill the child's whole process group
#[cfg(unix)]
pub(super) fn kill_process_group(pid: Option<u32>) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    if let Some(pid) = pid.and_then(|pid| i32::try_from(pid).ok()) {
        if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
            tracing::debug!(pid, error = %e, "killpg failed, process group already gone");
        }
    }
}

#[cfg(not(unix))]
pub(super) fn kill_process_group(_pid: Option<u32>) {}
