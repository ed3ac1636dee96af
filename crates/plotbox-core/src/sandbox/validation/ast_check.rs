//! Forbidden capability detection on the syntax tree.
//!
//! Flags calls to denied builtins, method calls and attribute access using a
//! denied name, bare references to a denied name, and attribute paths that
//! reach a private member or a denied module (`random._os`, `matplotlib.os`).

use super::syntax::{ParsedSource, line_of, preorder};
use crate::sandbox::policy::SecurityPolicy;
use tree_sitter::Node;

/// How an identifier is used at its position in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdentRole {
    Call,
    MethodCall,
    Attribute,
    Reference,
    /// Binding sites (parameters, keyword names, definitions) and import paths
    Ignored,
}

/// Check the tree for uses of denied capabilities
pub(super) fn check_capabilities(parsed: &ParsedSource<'_>, policy: &SecurityPolicy) -> Vec<String> {
    let mut issues = Vec::new();

    for node in preorder(parsed.root()) {
        match node.kind() {
            "identifier" => {
                let name = parsed.text(node);
                if !policy.is_denied_function(name) {
                    continue;
                }
                let line = line_of(node);
                match identifier_role(node) {
                    IdentRole::Call => issues.push(format!(
                        "line {}: call to forbidden function '{}'",
                        line, name
                    )),
                    IdentRole::MethodCall => issues.push(format!(
                        "line {}: call to forbidden method '{}'",
                        line, name
                    )),
                    IdentRole::Attribute => issues.push(format!(
                        "line {}: access to forbidden attribute '{}'",
                        line, name
                    )),
                    IdentRole::Reference => issues.push(format!(
                        "line {}: reference to forbidden name '{}'",
                        line, name
                    )),
                    IdentRole::Ignored => {}
                }
            }
            "attribute" => issues.extend(check_attribute(parsed, node, policy)),
            // Python 2 `exec "..."` statement
            "exec_statement" => issues.push(format!(
                "line {}: call to forbidden function 'exec'",
                line_of(node)
            )),
            _ => {}
        }
    }

    issues
}

/// Preloaded modules keep their own imports as attributes, so the attribute
/// name alone decides
fn check_attribute(parsed: &ParsedSource<'_>, node: Node<'_>, policy: &SecurityPolicy) -> Option<String> {
    let attribute = node.child_by_field_name("attribute")?;
    let name = parsed.text(attribute);
    if name.starts_with('_') {
        Some(format!(
            "line {}: access to private attribute '{}'",
            line_of(node),
            name
        ))
    } else if policy.is_denied_module(name) {
        Some(format!(
            "line {}: access to forbidden module '{}' through an attribute",
            line_of(node),
            name
        ))
    } else {
        None
    }
}

fn is_field<'t>(parent: Node<'t>, field: &str, node: Node<'t>) -> bool {
    parent.child_by_field_name(field) == Some(node)
}

fn is_call_target(node: Node<'_>) -> bool {
    node.parent()
        .is_some_and(|parent| parent.kind() == "call" && is_field(parent, "function", node))
}

fn identifier_role(node: Node<'_>) -> IdentRole {
    let Some(parent) = node.parent() else {
        return IdentRole::Reference;
    };

    match parent.kind() {
        "attribute" if is_field(parent, "attribute", node) => {
            if is_call_target(parent) {
                IdentRole::MethodCall
            } else {
                IdentRole::Attribute
            }
        }
        "call" if is_field(parent, "function", node) => IdentRole::Call,
        "keyword_argument"
        | "function_definition"
        | "class_definition"
        | "default_parameter"
        | "typed_default_parameter"
            if is_field(parent, "name", node) =>
        {
            IdentRole::Ignored
        }
        "parameters" | "lambda_parameters" | "typed_parameter" => IdentRole::Ignored,
        "list_splat_pattern" | "dictionary_splat_pattern" => {
            let in_signature = parent.parent().is_some_and(|gp| {
                matches!(
                    gp.kind(),
                    "parameters" | "lambda_parameters" | "typed_parameter"
                )
            });
            if in_signature {
                IdentRole::Ignored
            } else {
                IdentRole::Reference
            }
        }
        "global_statement" | "nonlocal_statement" => IdentRole::Ignored,
        "dotted_name" | "aliased_import" | "relative_import" => {
            if within_import(parent) {
                IdentRole::Ignored
            } else {
                IdentRole::Reference
            }
        }
        _ => IdentRole::Reference,
    }
}

fn within_import(mut node: Node<'_>) -> bool {
    loop {
        match node.kind() {
            "import_statement" | "import_from_statement" | "future_import_statement" => {
                return true;
            }
            "dotted_name" | "aliased_import" | "relative_import" => match node.parent() {
                Some(parent) => node = parent,
                None => return false,
            },
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::syntax::{ParseOutcome, parse};
    use super::*;

    fn issues_of(source: &str) -> Vec<String> {
        let policy = SecurityPolicy::builtin().unwrap();
        match parse(source).unwrap() {
            ParseOutcome::Parsed(parsed) => check_capabilities(&parsed, &policy),
            ParseOutcome::Invalid(errors) => panic!("unexpected syntax errors: {:?}", errors),
        }
    }

    #[test]
    fn test_forbidden_call() {
        let issues = issues_of("x = eval('1 + 1')\n");
        assert_eq!(issues, vec!["line 1: call to forbidden function 'eval'"]);
    }

    #[test]
    fn test_forbidden_method_and_attribute() {
        let issues = issues_of("obj.compile('x')\nf = obj.eval\n");
        assert!(issues.contains(&"line 1: call to forbidden method 'compile'".to_string()));
        assert!(issues.contains(&"line 2: access to forbidden attribute 'eval'".to_string()));
    }

    #[test]
    fn test_bare_reference() {
        let issues = issues_of("g = getattr\n");
        assert_eq!(issues, vec!["line 1: reference to forbidden name 'getattr'"]);
    }

    #[test]
    fn test_binding_sites_ignored() {
        let source = "def plot(type=None, *vars, **help):\n    return 1\n\nax = dict(id=3)\n";
        assert!(issues_of(source).is_empty());
    }

    #[test]
    fn test_import_paths_ignored() {
        assert!(issues_of("from matplotlib import figure as hash\n").is_empty());
    }

    #[test]
    fn test_module_internals_reached_through_attributes() {
        let issues = issues_of(
            "random._os.execv('/usr/bin/touch', ['touch', 'x'])\n\
             stamp = datetime._sys.version\n\
             matplotlib.os.getcwd()\n",
        );
        assert!(issues.contains(&"line 1: access to private attribute '_os'".to_string()));
        assert!(issues.contains(&"line 2: access to private attribute '_sys'".to_string()));
        assert!(issues.contains(
            &"line 3: access to forbidden module 'os' through an attribute".to_string()
        ));
    }

    #[test]
    fn test_public_attributes_pass() {
        let source = "import matplotlib.pyplot as plt\nfig, ax = plt.subplots()\nax.set_title(str(random.random()))\n";
        assert!(issues_of(source).is_empty());
    }

    #[test]
    fn test_safe_plotting_code() {
        let source = "import numpy as np\nvalues = np.arange(10)\nresult = {'total': int(values.sum())}\n";
        assert!(issues_of(source).is_empty());
    }
}
