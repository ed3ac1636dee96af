//! Restricted globals for a submission: safe builtins, a gated `__import__`
//! and the preloaded library handles.

use plotbox_core::sandbox::policy::{top_level, ModuleVerdict, SecurityPolicy};
use pyo3::create_exception;
use pyo3::exceptions::PyImportError;
use pyo3::prelude::*;
use pyo3::types::PyDict;
use std::sync::Arc;
use tracing::debug;

create_exception!(
    plotbox_embed,
    ImportDenied,
    PyImportError,
    "Import refused by the sandbox policy."
);

/// Replacement for `__import__` in the submission's builtins.
///
/// Applies the same verdict as the static validator before delegating to
/// the real import machinery.
#[pyclass(module = "plotbox_embed")]
pub(crate) struct ImportGate {
    policy: Arc<SecurityPolicy>,
    real_import: PyObject,
}

#[pymethods]
impl ImportGate {
    #[pyo3(signature = (name, globals=None, locals=None, fromlist=None, level=0))]
    fn __call__(
        &self,
        py: Python<'_>,
        name: &str,
        globals: Option<Bound<'_, PyAny>>,
        locals: Option<Bound<'_, PyAny>>,
        fromlist: Option<Bound<'_, PyAny>>,
        level: i32,
    ) -> PyResult<PyObject> {
        if level != 0 {
            return Err(ImportDenied::new_err("relative import is not permitted"));
        }
        match self.policy.module_verdict(name) {
            ModuleVerdict::Allowed => {}
            ModuleVerdict::Denied => {
                return Err(ImportDenied::new_err(format!(
                    "import of forbidden module '{}' is not permitted",
                    name
                )));
            }
            ModuleVerdict::Unapproved => {
                return Err(ImportDenied::new_err(format!(
                    "import of unapproved module '{}' is not permitted",
                    name
                )));
            }
        }
        self.real_import
            .call1(py, (name, globals, locals, fromlist, level))
    }
}

/// Globals dict for one run
pub(crate) fn build_namespace<'py>(
    py: Python<'py>,
    policy: &Arc<SecurityPolicy>,
    output_path: &str,
) -> PyResult<Bound<'py, PyDict>> {
    let builtins = py.import_bound("builtins")?;

    let safe = PyDict::new_bound(py);
    for name in policy.safe_builtins() {
        if let Ok(value) = builtins.getattr(name.as_str()) {
            safe.set_item(name, value)?;
        }
    }
    let gate = ImportGate {
        policy: Arc::clone(policy),
        real_import: builtins.getattr("__import__")?.unbind(),
    };
    safe.set_item("__import__", Bound::new(py, gate)?)?;

    let namespace = PyDict::new_bound(py);
    namespace.set_item("__builtins__", safe)?;
    namespace.set_item("__name__", "__plotbox__")?;
    namespace.set_item("output_path", output_path)?;

    for (alias, module) in policy.preloaded_modules() {
        match preload(py, module) {
            Ok(handle) => namespace.set_item(alias, handle)?,
            Err(e) => debug!(module = %module, error = %e, "preload skipped"),
        }
    }
    Ok(namespace)
}

fn preload<'py>(py: Python<'py>, module: &str) -> PyResult<Bound<'py, PyModule>> {
    if top_level(module) == "matplotlib" {
        // must happen before pyplot is first imported
        py.import_bound("matplotlib")?
            .call_method1("use", ("Agg",))?;
    }
    py.import_bound(module)
}

/// Close figures left open by the last run
pub(crate) fn release_figures(py: Python<'_>) {
    let loaded = py
        .import_bound("sys")
        .and_then(|sys| sys.getattr("modules"))
        .and_then(|modules| modules.contains("matplotlib.pyplot"))
        .unwrap_or(false);
    if loaded {
        if let Err(e) = py
            .import_bound("matplotlib.pyplot")
            .and_then(|plt| plt.call_method1("close", ("all",)))
        {
            debug!(error = %e, "failed to close figures");
        }
    }
}
