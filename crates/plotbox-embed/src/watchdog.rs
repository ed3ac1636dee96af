//! Watchdog that interrupts the interpreter thread running a submission.
//!
//! Python checks for asynchronous exceptions between bytecodes, so a pending
//! [`WatchdogExpired`] stops pure-Python loops promptly. Code blocked inside a
//! C call is only interrupted once that call returns.

use pyo3::create_exception;
use pyo3::exceptions::PyBaseException;
use pyo3::ffi;
use pyo3::prelude::*;
use std::os::raw::c_ulong;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

// Derives from BaseException so `except Exception` in the submission does
// not swallow it.
create_exception!(
    plotbox_embed,
    WatchdogExpired,
    PyBaseException,
    "Raised in the submission thread when its time is up."
);

/// Poll interval; the exception is re-raised every tick until disarmed
const TICK: Duration = Duration::from_millis(50);

/// Why the watchdog fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expiry {
    Timeout,
    CpuLimit,
    Cancelled,
}

/// Armed watchdog; dropping the disarm sender stops it
pub(crate) struct Watchdog {
    disarm: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<Option<Expiry>>>,
}

impl Watchdog {
    /// Start watching the interpreter thread `thread_id`
    pub fn arm(
        thread_id: c_ulong,
        timeout: Duration,
        cpu_flag: Arc<AtomicBool>,
        cancel: CancellationToken,
    ) -> std::io::Result<Self> {
        let (disarm, disarmed) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("plotbox-watchdog".to_string())
            .spawn(move || watch(thread_id, timeout, &cpu_flag, &cancel, &disarmed))?;
        Ok(Self {
            disarm: Some(disarm),
            handle: Some(handle),
        })
    }

    /// Stop the watchdog and report whether it fired.
    ///
    /// Must be called with the GIL released: the watchdog thread may be
    /// waiting for it.
    pub fn disarm(mut self) -> Option<Expiry> {
        self.disarm.take();
        self.handle
            .take()
            .and_then(|handle| handle.join().ok())
            .flatten()
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        // the thread notices the closed channel and exits on its own
        self.disarm.take();
    }
}

fn watch(
    thread_id: c_ulong,
    timeout: Duration,
    cpu_flag: &AtomicBool,
    cancel: &CancellationToken,
    disarmed: &mpsc::Receiver<()>,
) -> Option<Expiry> {
    let deadline = Instant::now().checked_add(timeout);
    let mut fired = None;

    loop {
        match disarmed.recv_timeout(TICK) {
            Err(RecvTimeoutError::Timeout) => {}
            _ => return fired,
        }

        let reason = if cpu_flag.load(Ordering::SeqCst) {
            Some(Expiry::CpuLimit)
        } else if cancel.is_cancelled() {
            Some(Expiry::Cancelled)
        } else if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            Some(Expiry::Timeout)
        } else {
            None
        };

        if let Some(reason) = reason {
            if fired.is_none() {
                warn!(?reason, thread_id, "watchdog fired, interrupting submission");
            }
            fired.get_or_insert(reason);
            Python::with_gil(|py| raise_in(py, thread_id));
        }
    }
}

fn raise_in(py: Python<'_>, thread_id: c_ulong) {
    let exc = py.get_type_bound::<WatchdogExpired>();
    // SAFETY: the GIL is held and `exc` is a live exception type object.
    let affected = unsafe { ffi::PyThreadState_SetAsyncExc(thread_id as _, exc.as_ptr()) };
    if affected == 0 {
        debug!(thread_id, "interpreter thread not found");
    }
}

/// Drop an asynchronous exception the watchdog left pending after the run ended
pub(crate) fn clear_pending(_py: Python<'_>, thread_id: c_ulong) {
    // SAFETY: the GIL is held; a null exception clears any pending one.
    unsafe {
        ffi::PyThreadState_SetAsyncExc(thread_id as _, std::ptr::null_mut());
    }
}
