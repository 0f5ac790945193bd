use std::fs;
use std::path::Path;

use crate::error::DesugarError;

/// Class-name prefixes whose methods are eligible for stubbing.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct SkipList {
    prefixes: Vec<String>,
}

impl SkipList {
    pub(crate) fn load(path: &Path) -> Result<Self, DesugarError> {
        let content = fs::read_to_string(path).map_err(|source| DesugarError::SkipListRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&content))
    }

    /// One prefix per line. Blank lines are ignored and internal-form
    /// prefixes (`com/acme/`) are normalized to dotted form.
    pub(crate) fn parse(content: &str) -> Self {
        let prefixes = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| line.replace('/', "."))
            .collect();
        Self { prefixes }
    }

    pub(crate) fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// Whether the class with the given internal name falls under a prefix.
    pub(crate) fn matches(&self, internal_name: &str) -> bool {
        if self.prefixes.is_empty() {
            return false;
        }
        let dotted = internal_name.replace('/', ".");
        self.prefixes
            .iter()
            .any(|prefix| dotted.starts_with(prefix.as_str()))
    }
}
