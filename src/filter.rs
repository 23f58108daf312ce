use std::ffi::OsStr;

use regex::Regex;

use crate::error::Result;

/// Default trigger: `core.<identifier>(.<hex>)+.lz4`.
pub const DEFAULT_NAME_PATTERN: &str = r"core\.[a-zA-Z]+(\.[a-f0-9]+)+\.lz4";

/// Full-match filter over created entry names.
///
/// The pattern is anchored on both ends, so `core.a.0.lz4.tmp` does not
/// match the default pattern even though it contains a match.
#[derive(Debug, Clone)]
pub struct NameFilter {
    source: String,
    regex: Regex,
}

impl NameFilter {
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(&format!("^(?:{})$", pattern))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// Names that are not valid UTF-8 never match.
    pub fn matches<S: AsRef<OsStr>>(&self, name: S) -> bool {
        name.as_ref()
            .to_str()
            .map_or(false, |name| self.regex.is_match(name))
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}
