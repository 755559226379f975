//! `{{name}}` tag substitution.
//!
//! Two names are reserved: `clipboard` and `input`. Every other name is a
//! step id looked up in the result map. Substitution is a single pass, so a
//! substituted value that itself contains `{{tag}}` text is left alone.

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Tag resolving to the clipboard text captured at flow start
pub const CLIPBOARD_TAG: &str = "clipboard";
/// Tag resolving to the free-text command-line input
pub const INPUT_TAG: &str = "input";

/// Values that exist independently of any step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ambient {
    /// Clipboard text read once at start
    pub clipboard: String,
    /// Command-line input
    pub input: String,
}

impl Ambient {
    /// Ambient values for a run
    pub fn new(clipboard: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            clipboard: clipboard.into(),
            input: input.into(),
        }
    }
}

pub(crate) fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)]
    PATTERN.get_or_init(|| Regex::new(r"\{\{(.*?)\}\}").expect("literal tag pattern compiles"))
}

/// Whether `name` is one of the reserved ambient tags
pub fn is_reserved(name: &str) -> bool {
    name == CLIPBOARD_TAG || name == INPUT_TAG
}

/// Names of every tag in `text`, in order of appearance
pub fn tag_names(text: &str) -> impl Iterator<Item = &str> {
    tag_pattern()
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
}

/// Substitute every known tag in `text`.
///
/// Unknown names are left as written.
pub fn fill(text: &str, results: &HashMap<String, String>, ambient: &Ambient) -> String {
    tag_pattern()
        .replace_all(text, |caps: &Captures<'_>| {
            let name = caps.get(1).map_or("", |m| m.as_str());
            match name {
                CLIPBOARD_TAG => ambient.clipboard.clone(),
                INPUT_TAG => ambient.input.clone(),
                _ => results
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string()),
            }
        })
        .into_owned()
}
