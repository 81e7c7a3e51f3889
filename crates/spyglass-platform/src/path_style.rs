//! Debuggee path handling.
//!
//! Script paths reported by the debuggee use the separators and case rules
//! of the machine the debuggee runs on, not of the machine the bridge runs
//! on. Everything that compares, splits, or matches such paths goes through
//! [`PathStyle`] so the Windows branch lives in exactly one place.

use regex::{Regex, RegexBuilder};

use crate::error::PlatformError;

/// Path conventions of a debuggee-reported path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStyle {
    /// `/`-separated, case-sensitive.
    Posix,
    /// `\`- or `/`-separated, case-insensitive (`C:\x`, `\\server\share`).
    Windows,
}

impl PathStyle {
    /// Guess the style of a single path from its shape.
    pub fn detect(path: &str) -> Self {
        let bytes = path.as_bytes();
        let drive = bytes.len() >= 3
            && bytes[0].is_ascii_alphabetic()
            && bytes[1] == b':'
            && (bytes[2] == b'\\' || bytes[2] == b'/');
        if drive || path.starts_with("\\\\") {
            PathStyle::Windows
        } else {
            PathStyle::Posix
        }
    }

    fn is_separator(self, c: char) -> bool {
        match self {
            PathStyle::Posix => c == '/',
            PathStyle::Windows => c == '/' || c == '\\',
        }
    }

    /// Whether the path is absolute under this style.
    pub fn is_absolute(self, path: &str) -> bool {
        match self {
            PathStyle::Posix => path.starts_with('/'),
            PathStyle::Windows => PathStyle::detect(path) == PathStyle::Windows,
        }
    }

    /// Path suffixes from the bare file name up to the full path.
    ///
    /// `/a/b/c.js` yields `c.js`, `b/c.js`, `a/b/c.js`, `/a/b/c.js`.
    pub fn suffixes(self, path: &str) -> Vec<&str> {
        let mut out: Vec<&str> = path
            .char_indices()
            .filter(|&(_, c)| self.is_separator(c))
            .map(|(i, _)| &path[i + 1..])
            .filter(|s| !s.is_empty())
            .collect();
        out.reverse();
        if out.last() != Some(&path) {
            out.push(path);
        }
        out
    }

    /// Compare two paths under this style's case rules.
    pub fn same_path(self, a: &str, b: &str) -> bool {
        match self {
            PathStyle::Posix => a == b,
            PathStyle::Windows => {
                a.len() == b.len()
                    && a.chars().zip(b.chars()).all(|(x, y)| {
                        x.eq_ignore_ascii_case(&y) || (self.is_separator(x) && self.is_separator(y))
                    })
            }
        }
    }

    /// Build a JavaScript regular expression that matches `path` exactly,
    /// honouring this style's case rules.
    ///
    /// The debuggee evaluates the pattern with JavaScript semantics and no
    /// flags, so case folding is spelled out per letter (`[cC]`).
    pub fn exact_match_pattern(self, path: &str) -> String {
        let mut out = String::with_capacity(path.len() * 2 + 2);
        out.push('^');
        for c in path.chars() {
            match c {
                c if self == PathStyle::Windows && c.is_ascii_alphabetic() => {
                    out.push('[');
                    out.push(c.to_ascii_lowercase());
                    out.push(c.to_ascii_uppercase());
                    out.push(']');
                }
                c if self == PathStyle::Windows && self.is_separator(c) => {
                    out.push_str("[\\\\/]");
                }
                '\\' | '^' | '$' | '.' | '|' | '?' | '*' | '+' | '(' | ')' | '[' | ']' | '{'
                | '}' | '/' => {
                    out.push('\\');
                    out.push(c);
                }
                c => out.push(c),
            }
        }
        out.push('$');
        out
    }
}

/// Configured hide patterns: a script whose path matches any of them is
/// hidden from the UI.
#[derive(Debug, Clone, Default)]
pub struct HidePatterns {
    exact: Vec<Regex>,
    folded: Vec<Regex>,
}

impl HidePatterns {
    /// Compile the given regular expressions.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Pattern` for the first pattern that fails to
    /// compile.
    pub fn new<I, S>(patterns: I) -> Result<Self, PlatformError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut exact = Vec::new();
        let mut folded = Vec::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let compile = |insensitive: bool| {
                RegexBuilder::new(pattern)
                    .case_insensitive(insensitive)
                    .build()
                    .map_err(|e| PlatformError::Pattern {
                        pattern: pattern.to_string(),
                        detail: e.to_string(),
                    })
            };
            exact.push(compile(false)?);
            folded.push(compile(true)?);
        }
        Ok(Self { exact, folded })
    }

    /// Whether no patterns are configured.
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }

    /// Whether `path` matches any pattern.
    pub fn is_hidden(&self, path: &str) -> bool {
        let set = match PathStyle::detect(path) {
            PathStyle::Posix => &self.exact,
            PathStyle::Windows => &self.folded,
        };
        set.iter().any(|re| re.is_match(path))
    }
}
