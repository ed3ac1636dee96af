//! Python parsing on top of tree-sitter.

use crate::error::{PlotboxError, PlotboxResult};
use tree_sitter::{Node, Parser, Tree};

/// Most syntax errors reported for one submission
const MAX_SYNTAX_ERRORS: usize = 10;

/// A parsed submission
pub(super) struct ParsedSource<'a> {
    pub tree: Tree,
    pub source: &'a str,
}

impl<'a> ParsedSource<'a> {
    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    /// Source text covered by `node`
    pub fn text(&self, node: Node<'_>) -> &'a str {
        self.source
            .get(node.start_byte()..node.end_byte())
            .unwrap_or_default()
    }
}

/// Outcome of parsing: a usable tree or the syntax errors found
pub(super) enum ParseOutcome<'a> {
    Parsed(ParsedSource<'a>),
    Invalid(Vec<String>),
}

pub(super) fn new_parser() -> PlotboxResult<Parser> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| PlotboxError::parser(format!("failed to load Python grammar: {}", e)))?;
    Ok(parser)
}

pub(super) fn parse(source: &str) -> PlotboxResult<ParseOutcome<'_>> {
    let mut parser = new_parser()?;
    let Some(tree) = parser.parse(source, None) else {
        return Ok(ParseOutcome::Invalid(vec![
            "source could not be parsed".to_string(),
        ]));
    };

    let parsed = ParsedSource { tree, source };
    let errors = collect_syntax_errors(&parsed);
    if errors.is_empty() {
        Ok(ParseOutcome::Parsed(parsed))
    } else {
        Ok(ParseOutcome::Invalid(errors))
    }
}

fn collect_syntax_errors(parsed: &ParsedSource<'_>) -> Vec<String> {
    let root = parsed.root();
    let mut errors = Vec::new();
    let mut stack = vec![root];

    while let Some(node) = stack.pop() {
        if errors.len() >= MAX_SYNTAX_ERRORS {
            break;
        }
        let pos = node.start_position();
        if node.is_missing() {
            errors.push(format!(
                "line {}, column {}: missing '{}'",
                pos.row + 1,
                pos.column + 1,
                node.kind()
            ));
            continue;
        }
        if node.is_error() {
            errors.push(format!(
                "line {}, column {}: invalid syntax near '{}'",
                pos.row + 1,
                pos.column + 1,
                snippet(parsed.text(node))
            ));
            continue;
        }
        if node.kind() == "print_statement" && !is_call_form_print(parsed, node) {
            errors.push(format!(
                "line {}, column {}: print statement requires parentheses",
                pos.row + 1,
                pos.column + 1
            ));
            continue;
        }
        push_children(&mut stack, node);
    }

    errors
}

fn is_call_form_print(parsed: &ParsedSource<'_>, node: Node<'_>) -> bool {
    parsed
        .text(node)
        .trim_start()
        .strip_prefix("print")
        .is_some_and(|rest| rest.trim_start().starts_with('('))
}

fn snippet(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default().trim();
    let mut out: String = line.chars().take(24).collect();
    if line.chars().count() > 24 {
        out.push_str("...");
    }
    out
}

fn push_children<'t>(stack: &mut Vec<Node<'t>>, node: Node<'t>) {
    let mut cursor = node.walk();
    let children: Vec<Node<'t>> = node.children(&mut cursor).collect();
    stack.extend(children.into_iter().rev());
}

/// All nodes under `root` (inclusive) in pre-order
pub(super) fn preorder(root: Node<'_>) -> Vec<Node<'_>> {
    let mut nodes = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        nodes.push(node);
        push_children(&mut stack, node);
    }
    nodes
}

/// 1-based line of a node
pub(super) fn line_of(node: Node<'_>) -> usize {
    node.start_position().row + 1
}

/// 1-based line containing byte offset `offset`
pub(super) fn line_at(source: &str, offset: usize) -> usize {
    source
        .as_bytes()
        .iter()
        .take(offset)
        .filter(|b| **b == b'\n')
        .count()
        + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn errors_of(source: &str) -> Vec<String> {
        match parse(source).unwrap() {
            ParseOutcome::Parsed(_) => Vec::new(),
            ParseOutcome::Invalid(errors) => errors,
        }
    }

    #[test]
    fn test_valid_source_parses() {
        assert!(errors_of("x = [i * 2 for i in range(3)]\nprint(x)\n").is_empty());
    }

    #[test]
    fn test_unbalanced_parenthesis() {
        assert!(!errors_of("print((1 + 2)\n").is_empty());

        let errors = errors_of("x = 1\ny = = 2\n");
        assert!(errors.iter().any(|e| e.starts_with("line 2")));
    }

    #[test]
    fn test_python2_print_rejected() {
        let errors = errors_of("print 'hello'\n");
        assert!(!errors.is_empty());
    }

    #[test]
    fn test_line_at() {
        assert_eq!(line_at("a\nb\nc", 0), 1);
        assert_eq!(line_at("a\nb\nc", 2), 2);
        assert_eq!(line_at("a\nb\nc", 4), 3);
    }

    #[test]
    fn test_preorder_visits_root_first() {
        let ParseOutcome::Parsed(parsed) = parse("a = 1\n").unwrap() else {
            panic!("expected a tree");
        };
        let nodes = preorder(parsed.root());
        assert_eq!(nodes[0].kind(), "module");
        assert!(nodes.iter().any(|n| n.kind() == "assignment"));
    }
}
