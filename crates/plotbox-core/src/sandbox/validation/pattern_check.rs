//! Raw-text pattern checks: dangerous idioms, file access and network access.

use super::syntax::{ParsedSource, line_at, preorder};
use crate::sandbox::policy::SecurityPolicy;
use std::collections::HashSet;
use std::ops::Range;

/// Name of the one sanctioned file-writing call
const SAVE_CALL: &str = "savefig";

/// Search the source for each dangerous pattern, reporting the first match
pub(super) fn check_dangerous_patterns(source: &str, policy: &SecurityPolicy) -> Vec<String> {
    policy
        .dangerous_patterns()
        .iter()
        .filter_map(|rule| {
            rule.regex().find(source).map(|m| {
                format!(
                    "line {}: dangerous pattern `{}`",
                    line_at(source, m.start()),
                    rule.source()
                )
            })
        })
        .collect()
}

/// Report file-open idioms that are not part of the artifact save call.
///
/// A match is exempt only when it lies inside the argument span of a
/// `savefig(...)` call.
pub(super) fn check_file_operations(parsed: &ParsedSource<'_>, policy: &SecurityPolicy) -> Vec<String> {
    let source = parsed.source;
    let save_spans = save_call_spans(parsed);
    let mut seen_ends = HashSet::new();
    let mut issues = Vec::new();

    for rule in policy.file_operation_patterns() {
        for m in rule.regex().find_iter(source) {
            if save_spans.iter().any(|span| span.contains(&m.start())) {
                continue;
            }
            // `with open(` and `open(` end on the same parenthesis
            if !seen_ends.insert(m.end()) {
                continue;
            }
            issues.push(format!(
                "line {}: file operation '{}' is not permitted",
                line_at(source, m.start()),
                m.as_str().trim_end_matches('(').trim()
            ));
        }
    }

    issues
}

/// Report network idioms; there is no exemption
pub(super) fn check_network_access(source: &str, policy: &SecurityPolicy) -> Vec<String> {
    policy
        .network_patterns()
        .iter()
        .filter_map(|rule| {
            rule.regex().find(source).map(|m| {
                format!(
                    "line {}: network access `{}` is not permitted",
                    line_at(source, m.start()),
                    rule.source()
                )
            })
        })
        .collect()
}

/// Byte ranges of the argument lists of every `savefig(...)` call
fn save_call_spans(parsed: &ParsedSource<'_>) -> Vec<Range<usize>> {
    preorder(parsed.root())
        .into_iter()
        .filter(|node| node.kind() == "call")
        .filter(|call| {
            call.child_by_field_name("function")
                .map(|function| match function.kind() {
                    "identifier" => parsed.text(function) == SAVE_CALL,
                    "attribute" => function
                        .child_by_field_name("attribute")
                        .is_some_and(|attr| parsed.text(attr) == SAVE_CALL),
                    _ => false,
                })
                .unwrap_or(false)
        })
        .filter_map(|call| call.child_by_field_name("arguments"))
        .map(|args| args.start_byte()..args.end_byte())
        .collect()
}
