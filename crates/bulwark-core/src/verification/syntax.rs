//! Syntax layer
//!
//! Local parse check, no external calls. Tree-sitter grammars for source
//! languages, `serde_json` and `toml` for data files.

use super::language::{self, Language};
use super::pipeline::{LayerVerifier, VerificationInput};
use super::{LayerResult, VerificationLayer};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tree_sitter::Node;

/// Location and description of the first parse error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxIssue {
    /// 1-indexed
    pub line: usize,
    /// 1-indexed
    pub column: usize,
    pub message: String,
}

/// Check `source`. `Ok(None)` when it parses cleanly.
pub fn check_source(language: Language, source: &str) -> Result<Option<SyntaxIssue>> {
    match language {
        Language::Json => Ok(serde_json::from_str::<serde_json::Value>(source)
            .err()
            .map(|e| SyntaxIssue {
                line: e.line(),
                column: e.column(),
                message: e.to_string(),
            })),
        Language::Toml => Ok(toml::from_str::<toml::Value>(source).err().map(|e| {
            let (line, column) = e
                .span()
                .map(|span| line_col(source, span.start))
                .unwrap_or((1, 1));
            SyntaxIssue {
                line,
                column,
                message: e.message().to_string(),
            }
        })),
        _ => {
            let tree = match language::parse(language, source)? {
                Some(tree) => tree,
                None => return Ok(None),
            };
            let root = tree.root_node();
            if !root.has_error() {
                return Ok(None);
            }
            let node = first_error(root).unwrap_or(root);
            let position = node.start_position();
            let message = if node.is_missing() {
                format!("missing `{}`", node.kind())
            } else {
                let snippet: String = node
                    .utf8_text(source.as_bytes())
                    .unwrap_or("")
                    .chars()
                    .take(40)
                    .collect();
                format!("unexpected `{}`", snippet.trim())
            };
            Ok(Some(SyntaxIssue {
                line: position.row + 1,
                column: position.column + 1,
                message,
            }))
        }
    }
}

fn first_error(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(found) = first_error(child) {
            return Some(found);
        }
    }
    None
}

fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let prefix = &source[..offset.min(source.len())];
    let line = prefix.matches('\n').count() + 1;
    let column = prefix.rsplit('\n').next().map(|l| l.chars().count()).unwrap_or(0) + 1;
    (line, column)
}

#[derive(Debug, Default)]
pub struct SyntaxLayer;

#[async_trait]
impl LayerVerifier for SyntaxLayer {
    fn layer(&self) -> VerificationLayer {
        VerificationLayer::Syntax
    }

    async fn verify(&self, input: &VerificationInput) -> Result<LayerResult> {
        let layer = VerificationLayer::Syntax;
        let (path, content) = match (&input.target_file, &input.content) {
            (Some(path), Some(content)) => (path, content),
            _ => return Ok(LayerResult::pass(layer, 0.5, "No file content to check")),
        };
        let language = match Language::from_path(path) {
            Some(language) => language,
            None => {
                return Ok(LayerResult::pass(layer, 0.5, format!("No parser for {}", path))
                    .with_detail("language", "unknown"))
            }
        };

        match check_source(language, content)? {
            None => Ok(LayerResult::pass(layer, 0.95, format!("Valid {} syntax", language.name()))
                .with_detail("language", language.name())),
            Some(issue) => Ok(LayerResult::fail(
                layer,
                format!(
                    "Syntax error at {}:{}:{}: {}",
                    path, issue.line, issue.column, issue.message
                ),
            )
            .with_detail("language", language.name())
            .with_detail("line", issue.line)
            .with_detail("column", issue.column)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_sources() {
        assert!(check_source(Language::Python, "def f(x):\n    return x\n").unwrap().is_none());
        assert!(check_source(Language::Rust, "fn main() { let x = 1; }").unwrap().is_none());
        assert!(check_source(Language::TypeScript, "const x: number = 1;").unwrap().is_none());
        assert!(check_source(Language::JavaScript, "const el = <div>hi</div>;").unwrap().is_none());
        assert!(check_source(Language::Json, r#"{"a": [1, 2]}"#).unwrap().is_none());
        assert!(check_source(Language::Toml, "a = 1\n[b]\nc = 'x'\n").unwrap().is_none());
    }

    #[test]
    fn test_python_error_location() {
        let issue = check_source(Language::Python, "x = 1\ndef f(:\n    pass\n")
            .unwrap()
            .unwrap();
        assert_eq!(issue.line, 2);
    }

    #[test]
    fn test_rust_error() {
        assert!(check_source(Language::Rust, "fn main( {").unwrap().is_some());
    }

    #[test]
    fn test_json_error_location() {
        let issue = check_source(Language::Json, "{\n  \"a\": ,\n}").unwrap().unwrap();
        assert_eq!(issue.line, 2);
    }

    #[test]
    fn test_toml_error() {
        assert!(check_source(Language::Toml, "a = = 1").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_layer_without_content_passes_low_confidence() {
        let result = SyntaxLayer.verify(&VerificationInput::default()).await.unwrap();
        assert!(result.passed);
        assert_eq!(result.confidence, 0.5);
    }

    #[tokio::test]
    async fn test_layer_fails_on_bad_python() {
        let input = VerificationInput {
            target_file: Some("bad.py".into()),
            content: Some("def broken(\n".into()),
            ..Default::default()
        };
        let result = SyntaxLayer.verify(&input).await.unwrap();
        assert!(!result.passed);
        assert!(result.reason.contains("bad.py"));
        assert!(result.details.contains_key("line"));
    }
}
