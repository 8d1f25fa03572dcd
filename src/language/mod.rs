//! Grammar loading for the four languages this crate indexes: Python,
//! JavaScript, TypeScript, and TSX (§4.3). Symbol extraction walks the
//! tree-sitter AST directly in `crate::parser` rather than through a
//! generic query registry — these four languages' node shapes are close
//! enough that a shared query DSL would add indirection without buying
//! anything.

use std::collections::HashMap;
use std::sync::LazyLock;

/// Source language, as detected from a file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Tsx,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Tsx => "tsx",
        }
    }

    pub fn grammar(&self) -> tree_sitter::Language {
        match self {
            Language::Python => tree_sitter_python::LANGUAGE.into(),
            Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Language::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
        }
    }

    /// Whether this language's function/method definitions use JS/TS-style
    /// `function_declaration`/`class_declaration`/`method_definition` node
    /// kinds (as opposed to Python's `function_definition`/`class_definition`).
    pub fn is_js_family(&self) -> bool {
        !matches!(self, Language::Python)
    }
}

static EXTENSION_MAP: LazyLock<HashMap<&'static str, Language>> = LazyLock::new(|| {
    HashMap::from([
        ("py", Language::Python),
        ("pyi", Language::Python),
        ("js", Language::JavaScript),
        ("jsx", Language::JavaScript),
        ("mjs", Language::JavaScript),
        ("cjs", Language::JavaScript),
        ("ts", Language::TypeScript),
        ("mts", Language::TypeScript),
        ("cts", Language::TypeScript),
        ("tsx", Language::Tsx),
    ])
});

/// Supported extensions, without the leading dot (§4.1, `SUPPORTED_EXTENSIONS`).
pub fn supported_extensions() -> impl Iterator<Item = &'static str> {
    EXTENSION_MAP.keys().copied()
}

/// Detect a language from a file extension (no leading dot).
pub fn from_extension(ext: &str) -> Option<Language> {
    EXTENSION_MAP.get(ext).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_all_four_languages() {
        assert_eq!(from_extension("py"), Some(Language::Python));
        assert_eq!(from_extension("js"), Some(Language::JavaScript));
        assert_eq!(from_extension("ts"), Some(Language::TypeScript));
        assert_eq!(from_extension("tsx"), Some(Language::Tsx));
    }

    #[test]
    fn unknown_extension_is_none() {
        assert_eq!(from_extension("rs"), None);
    }

    #[test]
    fn grammars_load_with_valid_abi() {
        for lang in [
            Language::Python,
            Language::JavaScript,
            Language::TypeScript,
            Language::Tsx,
        ] {
            assert!(lang.grammar().abi_version() > 0);
        }
    }
}
