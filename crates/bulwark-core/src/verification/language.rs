//! Language detection and tree-sitter parsing

use crate::error::{Result, VerificationError};
use serde::{Deserialize, Serialize};
use tree_sitter::{Parser, Tree};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Rust,
    TypeScript,
    Tsx,
    JavaScript,
    Json,
    Toml,
}

impl Language {
    /// Infer the language from a file extension
    pub fn from_path(path: &str) -> Option<Language> {
        let ext = path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase())?;
        match ext.as_str() {
            "py" | "pyi" => Some(Language::Python),
            "rs" => Some(Language::Rust),
            "ts" | "mts" | "cts" => Some(Language::TypeScript),
            "tsx" => Some(Language::Tsx),
            "js" | "jsx" | "mjs" | "cjs" => Some(Language::JavaScript),
            "json" => Some(Language::Json),
            "toml" => Some(Language::Toml),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Rust => "rust",
            Language::TypeScript => "typescript",
            Language::Tsx => "tsx",
            Language::JavaScript => "javascript",
            Language::Json => "json",
            Language::Toml => "toml",
        }
    }

    /// Grammar used for this language, when parsed with tree-sitter
    pub fn grammar(self) -> Option<tree_sitter::Language> {
        match self {
            Language::Python => Some(tree_sitter_python::language()),
            Language::Rust => Some(tree_sitter_rust::language()),
            Language::TypeScript => Some(tree_sitter_typescript::language_typescript()),
            // JSX is only accepted by the TSX grammar
            Language::Tsx | Language::JavaScript => Some(tree_sitter_typescript::language_tsx()),
            Language::Json | Language::Toml => None,
        }
    }

    /// Whether `path` looks like a test file for this language
    pub fn is_test_file(self, path: &str) -> bool {
        let file = path.rsplit('/').next().unwrap_or(path);
        match self {
            Language::Python => file.starts_with("test_") || file.ends_with("_test.py"),
            Language::Rust => path.starts_with("tests/") || path.contains("/tests/"),
            Language::TypeScript | Language::Tsx | Language::JavaScript => {
                file.contains(".test.") || file.contains(".spec.")
            }
            Language::Json | Language::Toml => false,
        }
    }
}

/// Parse `source` with the language's grammar.
///
/// `Ok(None)` when the language has no tree-sitter grammar.
pub fn parse(language: Language, source: &str) -> Result<Option<Tree>> {
    let grammar = match language.grammar() {
        Some(grammar) => grammar,
        None => return Ok(None),
    };
    let mut parser = Parser::new();
    parser.set_language(grammar).map_err(|e| VerificationError::LayerError {
        layer: "syntax".to_string(),
        message: format!("failed to load {} grammar: {}", language.name(), e),
    })?;
    parser
        .parse(source, None)
        .map(Some)
        .ok_or_else(|| {
            VerificationError::LayerError {
                layer: "syntax".to_string(),
                message: format!("{} parser returned no tree", language.name()),
            }
            .into()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_path() {
        assert_eq!(Language::from_path("src/app.py"), Some(Language::Python));
        assert_eq!(Language::from_path("src/lib.rs"), Some(Language::Rust));
        assert_eq!(Language::from_path("web/App.tsx"), Some(Language::Tsx));
        assert_eq!(Language::from_path("web/index.JS"), Some(Language::JavaScript));
        assert_eq!(Language::from_path("Makefile"), None);
        assert_eq!(Language::from_path("notes.md"), None);
    }

    #[test]
    fn test_is_test_file() {
        assert!(Language::Python.is_test_file("tests/test_app.py"));
        assert!(!Language::Python.is_test_file("app.py"));
        assert!(Language::Rust.is_test_file("tests/e2e.rs"));
        assert!(Language::TypeScript.is_test_file("src/api.spec.ts"));
    }

    #[test]
    fn test_parse_gives_tree() {
        let tree = parse(Language::Python, "x = 1\n").unwrap().unwrap();
        assert!(!tree.root_node().has_error());
        assert!(parse(Language::Json, "{}").unwrap().is_none());
    }
}
