//! Fixed wrapper script for the process strategy.
//!
//! The submission is embedded as a string literal and executed with
//! `compile`/`exec` in a namespace holding only the safe builtins, a gated
//! `__import__` and the preloaded libraries, so line numbers in tracebacks
//! match the submitted code. Once the code has run, the harness prints one
//! report line starting with a per-run marker: a JSON object holding the
//! child's peak RSS and, when bound and serialisable, `result`.

use crate::sandbox::SandboxError;
use crate::sandbox::policy::SecurityPolicy;
use std::path::Path;

/// Exit status for an exception raised by the code
pub(super) const EXIT_RUNTIME_ERROR: i32 = 1;
/// Exit status for `MemoryError`
pub(super) const EXIT_MEMORY_ERROR: i32 = 3;
/// Exit status for an import refused by the gate
pub(super) const EXIT_IMPORT_DENIED: i32 = 4;
/// Exit status for a compile-time `SyntaxError`
pub(super) const EXIT_SYNTAX_ERROR: i32 = 5;

const TEMPLATE: &str = r#"import builtins as _pb_builtins
import importlib as _pb_importlib
import json as _pb_json
import sys as _pb_sys
import traceback as _pb_traceback

_PB_CODE = @CODE@
_PB_MARKER = @MARKER@
_PB_OUTPUT_PATH = @OUTPUT_PATH@
_PB_SAFE_BUILTINS = @SAFE_BUILTINS@
_PB_DENIED = frozenset(@DENIED@)
_PB_ALLOWED = frozenset(@ALLOWED@)
_PB_PRELOAD = @PRELOAD@
_pb_real_import = _pb_builtins.__import__


class ImportDenied(ImportError):
    pass


def _pb_gated_import(name, globals=None, locals=None, fromlist=(), level=0):
    if level:
        raise ImportDenied("relative import is not permitted")
    top = name.split(".")[0]
    if top in _PB_DENIED:
        raise ImportDenied("import of forbidden module '%s' is not permitted" % name)
    if top not in _PB_ALLOWED and name not in _PB_ALLOWED:
        raise ImportDenied("import of unapproved module '%s' is not permitted" % name)
    return _pb_real_import(name, globals, locals, fromlist, level)


def _pb_namespace():
    safe = {}
    for name in _PB_SAFE_BUILTINS:
        if hasattr(_pb_builtins, name):
            safe[name] = getattr(_pb_builtins, name)
    safe["__import__"] = _pb_gated_import
    namespace = {
        "__builtins__": safe,
        "__name__": "__plotbox__",
        "output_path": _PB_OUTPUT_PATH,
    }
    for alias, module in _PB_PRELOAD:
        try:
            namespace[alias] = _pb_importlib.import_module(module)
        except Exception:
            pass
    return namespace


def _pb_peak_rss():
    try:
        import resource as _pb_resource
        peak = _pb_resource.getrusage(_pb_resource.RUSAGE_SELF).ru_maxrss
    except Exception:
        return None
    return peak if _pb_sys.platform == "darwin" else peak * 1024


def _pb_report(namespace):
    report = {"max_rss_bytes": _pb_peak_rss()}
    if "result" in namespace:
        report["result"] = namespace["result"]
    try:
        payload = _pb_json.dumps(report, ensure_ascii=False, default=str, allow_nan=False)
    except Exception as exc:
        print("result could not be serialised: %s" % exc, file=_pb_sys.stderr)
        report.pop("result", None)
        payload = _pb_json.dumps(report)
    _pb_sys.stdout.write("\n" + _PB_MARKER + payload + "\n")
    _pb_sys.stdout.flush()


def _pb_run(code, namespace):
    try:
        exec(code, namespace)
    except ImportDenied:
        _pb_traceback.print_exc()
        return @EXIT_IMPORT@
    except MemoryError:
        _pb_traceback.print_exc()
        return @EXIT_MEMORY@
    except BaseException:
        _pb_traceback.print_exc()
        return @EXIT_RUNTIME@
    return 0


def _pb_main():
    try:
        code = compile(_PB_CODE, "<submission>", "exec")
    except SyntaxError:
        _pb_traceback.print_exc(limit=0)
        return @EXIT_SYNTAX@
    namespace = _pb_namespace()
    status = _pb_run(code, namespace)
    try:
        _pb_report(namespace)
    except BaseException:
        pass
    return status


_pb_sys.exit(_pb_main())
"#;

/// Render the wrapper for one submission
pub(super) fn render(
    code: &str,
    output_path: &Path,
    marker: &str,
    policy: &SecurityPolicy,
) -> Result<String, SandboxError> {
    let output_path = output_path
        .to_str()
        .ok_or_else(|| SandboxError::harness("output path is not valid UTF-8"))?;
    let preload: Vec<[&str; 2]> = policy
        .preloaded_modules()
        .iter()
        .map(|(alias, module)| [alias.as_str(), module.as_str()])
        .collect();

    let code = literal(code)?;
    let marker = literal(marker)?;
    let output_path = literal(output_path)?;
    let safe_builtins = literal(policy.safe_builtins())?;
    let denied = literal(policy.denied_modules())?;
    let allowed = literal(policy.allowed_modules())?;
    let preload = literal(&preload)?;
    let exit_syntax = EXIT_SYNTAX_ERROR.to_string();
    let exit_import = EXIT_IMPORT_DENIED.to_string();
    let exit_memory = EXIT_MEMORY_ERROR.to_string();
    let exit_runtime = EXIT_RUNTIME_ERROR.to_string();

    substitute(
        TEMPLATE,
        &[
            ("CODE", code.as_str()),
            ("MARKER", marker.as_str()),
            ("OUTPUT_PATH", output_path.as_str()),
            ("SAFE_BUILTINS", safe_builtins.as_str()),
            ("DENIED", denied.as_str()),
            ("ALLOWED", allowed.as_str()),
            ("PRELOAD", preload.as_str()),
            ("EXIT_SYNTAX", exit_syntax.as_str()),
            ("EXIT_IMPORT", exit_import.as_str()),
            ("EXIT_MEMORY", exit_memory.as_str()),
            ("EXIT_RUNTIME", exit_runtime.as_str()),
        ],
    )
}

/// Replace `@NAME@` placeholders in one pass; inserted text is never rescanned
fn substitute(template: &str, values: &[(&str, &str)]) -> Result<String, SandboxError> {
    let extra: usize = values.iter().map(|(_, value)| value.len()).sum();
    let mut out = String::with_capacity(template.len() + extra);
    let mut rest = template;

    while let Some(open) = rest.find('@') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after
            .find('@')
            .ok_or_else(|| SandboxError::harness("unterminated harness placeholder"))?;
        let name = &after[..close];
        let value = values
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| *value)
            .ok_or_else(|| SandboxError::harness(format!("unknown harness placeholder '{}'", name)))?;
        out.push_str(value);
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// JSON text of strings and lists of strings is also a Python literal
fn literal<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, SandboxError> {
    serde_json::to_string(value)
        .map_err(|e| SandboxError::harness(format!("failed to encode harness literal: {}", e)))
}
