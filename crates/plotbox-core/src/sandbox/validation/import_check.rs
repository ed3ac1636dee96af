//! Import statement checks against the module allow-list and deny-list.

use super::syntax::{ParsedSource, line_of, preorder};
use crate::sandbox::policy::{ModuleVerdict, SecurityPolicy};
use tree_sitter::Node;

/// Check every import statement in the tree
pub(super) fn check_imports(parsed: &ParsedSource<'_>, policy: &SecurityPolicy) -> Vec<String> {
    let mut issues = Vec::new();

    for node in preorder(parsed.root()) {
        match node.kind() {
            "import_statement" => {
                let mut cursor = node.walk();
                for name in node.children_by_field_name("name", &mut cursor) {
                    if let Some(module) = imported_module(parsed, name) {
                        check_module(policy, &module, line_of(node), "import of", &mut issues);
                    }
                }
            }
            "import_from_statement" => {
                let Some(module_node) = node.child_by_field_name("module_name") else {
                    continue;
                };
                if module_node.kind() == "relative_import" {
                    issues.push(format!(
                        "line {}: relative import is not permitted",
                        line_of(node)
                    ));
                    continue;
                }
                let module = module_name(parsed.text(module_node));
                check_module(policy, &module, line_of(node), "import from", &mut issues);
            }
            "future_import_statement" => {
                check_module(policy, "__future__", line_of(node), "import from", &mut issues);
            }
            _ => {}
        }
    }

    issues
}

fn check_module(
    policy: &SecurityPolicy,
    module: &str,
    line: usize,
    action: &str,
    issues: &mut Vec<String>,
) {
    match policy.module_verdict(module) {
        ModuleVerdict::Allowed => {}
        ModuleVerdict::Denied => issues.push(format!(
            "line {}: {} forbidden module '{}'",
            line, action, module
        )),
        ModuleVerdict::Unapproved => issues.push(format!(
            "line {}: {} unapproved module '{}'",
            line, action, module
        )),
    }
}

/// Dotted module name of an `import` target (`a.b` or `a.b as c`)
fn imported_module(parsed: &ParsedSource<'_>, node: Node<'_>) -> Option<String> {
    match node.kind() {
        "dotted_name" => Some(module_name(parsed.text(node))),
        "aliased_import" => node
            .child_by_field_name("name")
            .map(|name| module_name(parsed.text(name))),
        _ => None,
    }
}

fn module_name(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

#[cfg(test)]
mod tests {
    use super::super::syntax::{ParseOutcome, parse};
    use super::*;

    fn issues_of(source: &str) -> Vec<String> {
        let policy = SecurityPolicy::builtin().unwrap();
        match parse(source).unwrap() {
            ParseOutcome::Parsed(parsed) => check_imports(&parsed, &policy),
            ParseOutcome::Invalid(errors) => panic!("unexpected syntax errors: {:?}", errors),
        }
    }

    #[test]
    fn test_denied_module() {
        let issues = issues_of("import os\n");
        assert_eq!(issues, vec!["line 1: import of forbidden module 'os'"]);
    }

    #[test]
    fn test_denied_submodule_and_from_import() {
        let issues = issues_of("import os.path as p\nfrom subprocess import run\n");
        assert_eq!(
            issues,
            vec![
                "line 1: import of forbidden module 'os.path'",
                "line 2: import from forbidden module 'subprocess'",
            ]
        );
    }

    #[test]
    fn test_unapproved_module() {
        let issues = issues_of("import pandas as pd\n");
        assert_eq!(issues, vec!["line 1: import of unapproved module 'pandas'"]);
    }

    #[test]
    fn test_allowed_modules() {
        let source = "import matplotlib\nimport matplotlib.pyplot as plt\nimport numpy as np\nfrom math import sqrt\n";
        assert!(issues_of(source).is_empty());
    }

    #[test]
    fn test_relative_import_rejected() {
        let issues = issues_of("from . import helpers\n");
        assert_eq!(issues, vec!["line 1: relative import is not permitted"]);
    }

    #[test]
    fn test_multiple_names_in_one_statement() {
        let issues = issues_of("import math, socket\n");
        assert_eq!(issues, vec!["line 1: import of forbidden module 'socket'"]);
    }
}
