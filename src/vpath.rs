//! Virtual path handling.
//!
//! Every path entering the file system is normalised once: drive prefixes
//! stripped, backslashes flipped, ASCII lowercased, `.` and empty components
//! collapsed. After that, comparison is plain string equality, which keeps
//! the lookup tables simple and matches the game's case-insensitive
//! behaviour on case-preserving filesystems.

use regex::Regex;

use crate::error::{ForgeError, Result};

/// Normalise an external path spelling into canonical virtual-path form.
///
/// ```
/// use x4forge::vpath::normalize;
/// assert_eq!(normalize("Libraries\\Jobs.XML"), "libraries/jobs.xml");
/// assert_eq!(normalize("C:/x4/./libraries//jobs.xml"), "x4/libraries/jobs.xml");
/// ```
pub fn normalize(path: &str) -> String {
    let mut s = path.replace('\\', "/");
    // Drive prefixes only show up when users paste absolute paths.
    if s.len() >= 2 && s.as_bytes()[1] == b':' && s.as_bytes()[0].is_ascii_alphabetic() {
        s.drain(..2);
    }
    s.make_ascii_lowercase();

    let mut parts: Vec<&str> = Vec::new();
    for component in s.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

/// A compiled wildcard pattern over virtual paths.
///
/// Supports `*`, `?` and `[...]` character classes, matched case-folded
/// against the normalised path form. `*` crosses directory separators, the
/// way shell-style filename matching treats a flat namespace.
#[derive(Debug, Clone)]
pub struct Glob {
    pattern: String,
    regex: Regex,
}

impl Glob {
    pub fn new(pattern: &str) -> Result<Self> {
        let normalized = normalize(pattern);
        let mut regex_src = String::with_capacity(normalized.len() + 8);
        regex_src.push('^');

        let mut chars = normalized.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '*' => regex_src.push_str(".*"),
                '?' => regex_src.push('.'),
                '[' => {
                    regex_src.push('[');
                    if chars.peek() == Some(&'!') {
                        chars.next();
                        regex_src.push('^');
                    }
                    // Leading ']' is a literal member of the class.
                    if chars.peek() == Some(&']') {
                        chars.next();
                        regex_src.push_str("\\]");
                    }
                    let mut closed = false;
                    for inner in chars.by_ref() {
                        if inner == ']' {
                            closed = true;
                            break;
                        }
                        if inner == '\\' {
                            regex_src.push_str("\\\\");
                        } else {
                            regex_src.push(inner);
                        }
                    }
                    if !closed {
                        return Err(ForgeError::InvalidGlob {
                            pattern: pattern.to_string(),
                            message: "unterminated character class".to_string(),
                        });
                    }
                    regex_src.push(']');
                }
                other => regex_src.push_str(&regex::escape(&other.to_string())),
            }
        }
        regex_src.push('$');

        let regex = Regex::new(&regex_src).map_err(|e| ForgeError::InvalidGlob {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        Ok(Glob {
            pattern: normalized,
            regex,
        })
    }

    /// Test a path against the pattern. The path is normalised first, so
    /// any spelling of the same file matches.
    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(&normalize(path))
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}
