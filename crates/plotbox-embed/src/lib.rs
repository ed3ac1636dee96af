//! In-process restricted executor for plotbox.
//!
//! Embeds a CPython interpreter through `pyo3` and runs validated
//! submissions in a restricted namespace on a blocking thread. Runs are
//! serialized: the interpreter, `sys.stdout` and the process resource
//! ceilings are all shared state.

mod executor;
mod namespace;
mod watchdog;

pub use executor::RestrictedExecutor;
