//! Semantic layer
//!
//! Static checks over the tree-sitter parse: undefined names and unresolved
//! imports for Python, duplicate top-level definitions and leftover
//! placeholders for Rust and TypeScript/JavaScript. Errors fail the layer;
//! warnings only lower its confidence.

use super::language::{self, Language};
use super::pipeline::{LayerVerifier, VerificationInput};
use super::{LayerResult, VerificationLayer};
use crate::error::Result;
use crate::executor::SandboxExecutor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tree_sitter::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticIssue {
    pub severity: Severity,
    pub message: String,
    /// 1-indexed
    pub line: usize,
    /// 1-indexed
    pub column: usize,
    /// Stable check identifier, e.g. `undefined-name`
    pub code: String,
    /// Offending symbol
    pub symbol: String,
}

impl SemanticIssue {
    fn at(node: Node<'_>, severity: Severity, code: &str, symbol: &str, message: String) -> Self {
        let position = node.start_position();
        Self {
            severity,
            message,
            line: position.row + 1,
            column: position.column + 1,
            code: code.to_string(),
            symbol: symbol.to_string(),
        }
    }
}

/// Analyze `source`. `is_local_module` tells whether a Python top-level
/// module name resolves inside the sandbox.
pub fn analyze(
    language: Language,
    source: &str,
    is_local_module: &dyn Fn(&str) -> bool,
) -> Result<Vec<SemanticIssue>> {
    let tree = match language::parse(language, source)? {
        Some(tree) => tree,
        None => return Ok(Vec::new()),
    };
    let root = tree.root_node();
    let bytes = source.as_bytes();
    let issues = match language {
        Language::Python => python::analyze(root, bytes, is_local_module),
        Language::Rust => rust::analyze(root, bytes),
        Language::TypeScript | Language::Tsx | Language::JavaScript => script::analyze(root, bytes),
        Language::Json | Language::Toml => Vec::new(),
    };
    Ok(issues)
}

fn text<'a>(node: Node<'_>, source: &'a [u8]) -> &'a str {
    node.utf8_text(source).unwrap_or("")
}

fn named_children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

fn all_children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).collect()
}

/// Report every name defined more than once in `definitions`
fn duplicates(definitions: Vec<(String, Node<'_>, &'static str)>) -> Vec<SemanticIssue> {
    let mut seen: HashMap<(String, &'static str), usize> = HashMap::new();
    let mut issues = Vec::new();
    for (name, node, namespace) in definitions {
        let count = seen.entry((name.clone(), namespace)).or_insert(0);
        *count += 1;
        if *count == 2 {
            issues.push(SemanticIssue::at(
                node,
                Severity::Error,
                "duplicate-definition",
                &name,
                format!("'{}' is defined more than once", name),
            ));
        }
    }
    issues
}

mod python {
    use super::*;

    const BUILTINS: &[&str] = &[
        "abs", "aiter", "all", "anext", "any", "ascii", "bin", "bool", "breakpoint", "bytearray",
        "bytes", "callable", "chr", "classmethod", "compile", "complex", "copyright", "credits",
        "delattr", "dict", "dir", "divmod", "enumerate", "eval", "exec", "exit", "filter", "float",
        "format", "frozenset", "getattr", "globals", "hasattr", "hash", "help", "hex", "id",
        "input", "int", "isinstance", "issubclass", "iter", "len", "license", "list", "locals",
        "map", "max", "memoryview", "min", "next", "object", "oct", "open", "ord", "pow", "print",
        "property", "quit", "range", "repr", "reversed", "round", "set", "setattr", "slice",
        "sorted", "staticmethod", "str", "sum", "super", "tuple", "type", "vars", "zip",
        "self", "cls", "_", "NotImplemented", "Ellipsis", "True", "False", "None",
        "BaseException", "BaseExceptionGroup", "Exception", "ExceptionGroup", "ArithmeticError",
        "AssertionError", "AttributeError", "BlockingIOError", "BrokenPipeError", "BufferError",
        "ChildProcessError", "ConnectionAbortedError", "ConnectionError", "ConnectionRefusedError",
        "ConnectionResetError", "EOFError", "EnvironmentError", "FileExistsError",
        "FileNotFoundError", "FloatingPointError", "GeneratorExit", "IOError", "ImportError",
        "IndentationError", "IndexError", "InterruptedError", "IsADirectoryError", "KeyError",
        "KeyboardInterrupt", "LookupError", "MemoryError", "ModuleNotFoundError", "NameError",
        "NotADirectoryError", "NotImplementedError", "OSError", "OverflowError",
        "PermissionError", "ProcessLookupError", "RecursionError", "ReferenceError",
        "RuntimeError", "StopAsyncIteration", "StopIteration", "SyntaxError", "SystemError",
        "SystemExit", "TabError", "TimeoutError", "TypeError", "UnboundLocalError",
        "UnicodeDecodeError", "UnicodeEncodeError", "UnicodeError", "UnicodeTranslateError",
        "ValueError", "ZeroDivisionError", "Warning", "UserWarning", "DeprecationWarning",
        "PendingDeprecationWarning", "RuntimeWarning", "SyntaxWarning", "FutureWarning",
        "ImportWarning", "UnicodeWarning", "BytesWarning", "ResourceWarning", "EncodingWarning",
    ];

    const STDLIB: &[&str] = &[
        "__future__", "abc", "argparse", "array", "ast", "asyncio", "base64", "bisect", "builtins",
        "calendar", "cmath", "codecs", "collections", "concurrent", "configparser", "contextlib",
        "contextvars", "copy", "csv", "ctypes", "dataclasses", "datetime", "decimal", "difflib",
        "dis", "email", "enum", "errno", "fcntl", "filecmp", "fnmatch", "fractions", "functools",
        "gc", "getpass", "gettext", "glob", "gzip", "hashlib", "heapq", "hmac", "html", "http",
        "importlib", "inspect", "io", "ipaddress", "itertools", "json", "keyword", "locale",
        "logging", "lzma", "math", "mimetypes", "multiprocessing", "numbers", "operator", "os",
        "pathlib", "pickle", "pkgutil", "platform", "pprint", "queue", "random", "re",
        "secrets", "select", "selectors", "shlex", "shutil", "signal", "socket", "sqlite3",
        "ssl", "stat", "statistics", "string", "struct", "subprocess", "sys", "sysconfig",
        "tarfile", "tempfile", "textwrap", "threading", "time", "timeit", "tkinter", "token",
        "tokenize", "tomllib", "traceback", "types", "typing", "unicodedata", "unittest",
        "urllib", "uuid", "venv", "warnings", "weakref", "xml", "zipfile", "zlib", "zoneinfo",
    ];

    #[derive(Default)]
    struct Scan<'tree> {
        defined: HashSet<String>,
        uses: Vec<(String, Node<'tree>)>,
        imports: Vec<(String, Node<'tree>)>,
        wildcard: bool,
    }

    pub(super) fn analyze(
        root: Node<'_>,
        source: &[u8],
        is_local_module: &dyn Fn(&str) -> bool,
    ) -> Vec<SemanticIssue> {
        let mut scan = Scan::default();
        visit(root, false, source, &mut scan);

        let mut issues = Vec::new();
        let mut reported = HashSet::new();

        for (module, node) in &scan.imports {
            if !STDLIB.contains(&module.as_str()) && !is_local_module(module) && reported.insert(module.clone()) {
                issues.push(SemanticIssue::at(
                    *node,
                    Severity::Warning,
                    "unresolved-import",
                    module,
                    format!("Cannot resolve import '{}'", module),
                ));
            }
        }

        if !scan.wildcard {
            for (name, node) in &scan.uses {
                let known = scan.defined.contains(name)
                    || BUILTINS.contains(&name.as_str())
                    || (name.starts_with("__") && name.ends_with("__"));
                if !known && reported.insert(name.clone()) {
                    issues.push(SemanticIssue::at(
                        *node,
                        Severity::Error,
                        "undefined-name",
                        name,
                        format!("Undefined name '{}'", name),
                    ));
                }
            }
        }
        issues
    }

    fn is_use(node: Node<'_>) -> bool {
        let parent = match node.parent() {
            Some(parent) => parent,
            None => return true,
        };
        match parent.kind() {
            "attribute" => parent.child_by_field_name("attribute") != Some(node),
            "keyword_argument" => parent.child_by_field_name("name") != Some(node),
            "dotted_name" => false,
            _ => true,
        }
    }

    fn visit<'tree>(node: Node<'tree>, binding: bool, source: &[u8], scan: &mut Scan<'tree>) {
        match node.kind() {
            "identifier" => {
                let name = text(node, source).to_string();
                if binding {
                    scan.defined.insert(name);
                } else if is_use(node) {
                    scan.uses.push((name, node));
                }
            }
            "import_statement" | "import_from_statement" | "future_import_statement" => {
                collect_import(node, source, scan);
            }
            "function_definition" | "class_definition" => {
                let name = node.child_by_field_name("name");
                for child in all_children(node) {
                    visit(child, Some(child) == name, source, scan);
                }
            }
            "parameters" | "lambda_parameters" | "global_statement" | "nonlocal_statement"
            | "case_pattern" => {
                for child in all_children(node) {
                    visit(child, true, source, scan);
                }
            }
            "assignment" | "augmented_assignment" | "for_statement" | "for_in_clause" => {
                let left = node.child_by_field_name("left");
                for child in all_children(node) {
                    visit(child, binding || Some(child) == left, source, scan);
                }
            }
            "named_expression" => {
                let name = node.child_by_field_name("name");
                for child in all_children(node) {
                    visit(child, binding || Some(child) == name, source, scan);
                }
            }
            _ => {
                // `except E as e`, `with x as y`: the target after `as` binds
                let mut after_as = false;
                for child in all_children(node) {
                    if child.kind() == "as" {
                        after_as = true;
                        continue;
                    }
                    if child.is_named() {
                        visit(child, binding || after_as, source, scan);
                        after_as = false;
                    }
                }
            }
        }
    }

    fn first_identifier<'a>(node: Node<'_>, source: &'a [u8]) -> Option<&'a str> {
        if node.kind() == "identifier" {
            return Some(text(node, source));
        }
        named_children(node)
            .into_iter()
            .find(|c| c.kind() == "identifier")
            .map(|c| text(c, source))
    }

    fn collect_import<'tree>(node: Node<'tree>, source: &[u8], scan: &mut Scan<'tree>) {
        let module = node.child_by_field_name("module_name");
        if let Some(module) = module {
            if module.kind() == "dotted_name" && node.kind() == "import_from_statement" {
                if let Some(top) = first_identifier(module, source) {
                    scan.imports.push((top.to_string(), module));
                }
            }
        }

        for child in named_children(node) {
            if Some(child) == module {
                continue;
            }
            match child.kind() {
                "dotted_name" => {
                    if let Some(top) = first_identifier(child, source) {
                        scan.defined.insert(top.to_string());
                        if node.kind() == "import_statement" {
                            scan.imports.push((top.to_string(), child));
                        }
                    }
                }
                "aliased_import" => {
                    if let Some(alias) = child.child_by_field_name("alias") {
                        scan.defined.insert(text(alias, source).to_string());
                    }
                    if node.kind() == "import_statement" {
                        if let Some(name) = child.child_by_field_name("name") {
                            if let Some(top) = first_identifier(name, source) {
                                scan.imports.push((top.to_string(), name));
                            }
                        }
                    }
                }
                "wildcard_import" => scan.wildcard = true,
                _ => {}
            }
        }
    }
}

mod rust {
    use super::*;

    fn is_cfg_gated(node: Node<'_>, source: &[u8]) -> bool {
        let mut prev = node.prev_named_sibling();
        while let Some(sibling) = prev {
            if sibling.kind() != "attribute_item" {
                break;
            }
            if text(sibling, source).contains("cfg") {
                return true;
            }
            prev = sibling.prev_named_sibling();
        }
        false
    }

    pub(super) fn analyze(root: Node<'_>, source: &[u8]) -> Vec<SemanticIssue> {
        let mut definitions = Vec::new();
        for item in named_children(root) {
            let namespace = match item.kind() {
                "function_item" | "const_item" | "static_item" => "value",
                "struct_item" | "enum_item" | "trait_item" | "type_item" | "union_item" => "type",
                _ => continue,
            };
            if is_cfg_gated(item, source) {
                continue;
            }
            if let Some(name) = item.child_by_field_name("name") {
                definitions.push((text(name, source).to_string(), name, namespace));
            }
        }

        let mut issues = duplicates(definitions);
        placeholders(root, source, &mut issues);
        issues
    }

    fn placeholders(node: Node<'_>, source: &[u8], issues: &mut Vec<SemanticIssue>) {
        if node.kind() == "macro_invocation" {
            if let Some(mac) = node.child_by_field_name("macro") {
                let name = text(mac, source);
                if matches!(name, "todo" | "unimplemented" | "dbg") {
                    issues.push(SemanticIssue::at(
                        node,
                        Severity::Warning,
                        "placeholder",
                        name,
                        format!("{}! left in code", name),
                    ));
                }
            }
        }
        for child in named_children(node) {
            placeholders(child, source, issues);
        }
    }
}

mod script {
    use super::*;

    fn declared_names<'tree>(decl: Node<'tree>, source: &[u8], out: &mut Vec<(String, Node<'tree>, &'static str)>) {
        match decl.kind() {
            "function_declaration" | "generator_function_declaration" | "class_declaration" => {
                if let Some(name) = decl.child_by_field_name("name") {
                    out.push((text(name, source).to_string(), name, "value"));
                }
            }
            "lexical_declaration" => {
                for declarator in named_children(decl) {
                    if declarator.kind() != "variable_declarator" {
                        continue;
                    }
                    if let Some(name) = declarator.child_by_field_name("name") {
                        if name.kind() == "identifier" {
                            out.push((text(name, source).to_string(), name, "value"));
                        }
                    }
                }
            }
            "export_statement" => {
                if let Some(inner) = decl.child_by_field_name("declaration") {
                    declared_names(inner, source, out);
                }
            }
            _ => {}
        }
    }

    pub(super) fn analyze(root: Node<'_>, source: &[u8]) -> Vec<SemanticIssue> {
        let mut definitions = Vec::new();
        for item in named_children(root) {
            declared_names(item, source, &mut definitions);
        }
        let mut issues = duplicates(definitions);
        debuggers(root, &mut issues);
        issues
    }

    fn debuggers(node: Node<'_>, issues: &mut Vec<SemanticIssue>) {
        if node.kind() == "debugger_statement" {
            issues.push(SemanticIssue::at(
                node,
                Severity::Warning,
                "debugger",
                "debugger",
                "debugger statement left in code".to_string(),
            ));
        }
        for child in named_children(node) {
            debuggers(child, issues);
        }
    }
}

/// Semantic layer; resolves local Python modules through the sandbox when one is attached
#[derive(Default)]
pub struct SemanticLayer {
    executor: Option<Arc<dyn SandboxExecutor>>,
}

impl std::fmt::Debug for SemanticLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticLayer")
            .field("has_executor", &self.executor.is_some())
            .finish()
    }
}

impl SemanticLayer {
    pub fn new(executor: Option<Arc<dyn SandboxExecutor>>) -> Self {
        Self { executor }
    }

    fn module_resolves(&self, target: &str, module: &str) -> bool {
        let executor = match &self.executor {
            Some(executor) => executor,
            None => return false,
        };
        let dir = target.rsplit_once('/').map(|(dir, _)| dir);
        let mut candidates = vec![
            format!("{}.py", module),
            format!("{}/__init__.py", module),
            format!("src/{}.py", module),
            format!("src/{}/__init__.py", module),
        ];
        if let Some(dir) = dir {
            candidates.push(format!("{}/{}.py", dir, module));
            candidates.push(format!("{}/{}/__init__.py", dir, module));
        }
        candidates.iter().any(|c| executor.file_exists(c))
    }
}

#[async_trait]
impl LayerVerifier for SemanticLayer {
    fn layer(&self) -> VerificationLayer {
        VerificationLayer::Semantic
    }

    async fn verify(&self, input: &VerificationInput) -> Result<LayerResult> {
        let layer = VerificationLayer::Semantic;
        let (path, content) = match (&input.target_file, &input.content) {
            (Some(path), Some(content)) => (path, content),
            _ => return Ok(LayerResult::pass(layer, 0.5, "No file content to analyze")),
        };
        let language = match Language::from_path(path) {
            Some(language) if language.grammar().is_some() => language,
            _ => return Ok(LayerResult::pass(layer, 0.5, format!("No semantic checks for {}", path))),
        };

        let resolver = |module: &str| self.module_resolves(path, module);
        let issues = analyze(language, content, &resolver)?;
        let (errors, warnings): (Vec<_>, Vec<_>) =
            issues.iter().partition(|i| i.severity == Severity::Error);
        let details = serde_json::to_value(&issues)?;

        let result = if !errors.is_empty() {
            let symbols: Vec<&str> = errors.iter().map(|i| i.symbol.as_str()).collect();
            LayerResult::fail(
                layer,
                format!("{} semantic error(s): {}", errors.len(), symbols.join(", ")),
            )
        } else if !warnings.is_empty() {
            LayerResult::pass(layer, 0.7, format!("{} warning(s)", warnings.len()))
        } else {
            LayerResult::pass(layer, 0.9, "No semantic issues")
        };
        Ok(result.with_detail("issues", details))
    }
}
