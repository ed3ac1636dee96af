//! Non-fatal code quality observations.

use super::syntax::{ParsedSource, preorder};
use std::collections::HashSet;
use tree_sitter::Node;

const MAX_CODE_CHARS: usize = 10_000;
const MIN_CODE_CHARS: usize = 100;
const MAX_NESTING_DEPTH: usize = 4;
const DUPLICATION_MIN_LINES: usize = 50;
const MIN_UNIQUE_LINE_RATIO: f64 = 0.7;

const NESTING_KINDS: &[&str] = &[
    "for_statement",
    "while_statement",
    "if_statement",
    "with_statement",
];

/// Quality warnings; these never affect validity
pub(super) fn check_quality(parsed: &ParsedSource<'_>) -> Vec<String> {
    let source = parsed.source;
    let mut warnings = Vec::new();

    let chars = source.chars().count();
    if chars > MAX_CODE_CHARS {
        warnings.push(format!("code is very long ({} characters)", chars));
    } else if chars < MIN_CODE_CHARS {
        warnings.push(format!(
            "code is very short ({} characters) and may be incomplete",
            chars
        ));
    }

    let depth = max_nesting_depth(parsed.root());
    if depth > MAX_NESTING_DEPTH {
        warnings.push(format!("loops and conditionals nested too deeply (depth {})", depth));
    }

    let lines: Vec<&str> = source.split('\n').collect();
    if lines.len() > DUPLICATION_MIN_LINES {
        let unique: HashSet<&str> = lines
            .iter()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .collect();
        let ratio = unique.len() as f64 / lines.len() as f64;
        if ratio < MIN_UNIQUE_LINE_RATIO {
            warnings.push(format!(
                "high line duplication ({:.0}% unique lines)",
                ratio * 100.0
            ));
        }
    }

    warnings.extend(check_required_elements(parsed));
    warnings
}

fn check_required_elements(parsed: &ParsedSource<'_>) -> Vec<String> {
    let source = parsed.source;
    let mut warnings = Vec::new();

    if !source.contains("matplotlib") && !source.contains("plt") {
        warnings.push("code does not use matplotlib for visualization".to_string());
    }
    if !source.to_lowercase().contains("savefig") {
        warnings.push("code does not save the figure with savefig".to_string());
    }
    if !binds_result(parsed) {
        warnings.push("no `result` variable is assigned, no result data will be returned".to_string());
    }
    if !source.contains("Agg") {
        warnings.push("backend is not set, call matplotlib.use('Agg')".to_string());
    }

    warnings
}

/// Whether any assignment target binds the name `result`
fn binds_result(parsed: &ParsedSource<'_>) -> bool {
    preorder(parsed.root())
        .into_iter()
        .filter(|node| matches!(node.kind(), "assignment" | "augmented_assignment"))
        .filter_map(|node| node.child_by_field_name("left"))
        .any(|target| {
            preorder(target)
                .into_iter()
                .any(|n| n.kind() == "identifier" && parsed.text(n) == "result" && !is_attribute_part(n))
        })
}

fn is_attribute_part(node: Node<'_>) -> bool {
    node.parent().is_some_and(|p| p.kind() == "attribute")
}

fn max_nesting_depth(root: Node<'_>) -> usize {
    let mut max_depth = 0;
    let mut stack = vec![(root, 0usize)];

    while let Some((node, depth)) = stack.pop() {
        max_depth = max_depth.max(depth);
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            let child_depth = if NESTING_KINDS.contains(&child.kind()) {
                depth + 1
            } else {
                depth
            };
            stack.push((child, child_depth));
        }
    }

    max_depth
}
