//! Reference names
//!
//! A reference name is valid iff it contains none of: a leading `.`, `/.`,
//! `..`, a leading or trailing `/`, a trailing `.lock`, `@{`, or any byte in
//! `[\x00-\x20*:?\[\\^~\x7f]`.

use std::fmt;
use std::path::PathBuf;

/// A validated branch (or other short reference) name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BranchName(String);

/// The name of the default branch created on init
pub const DEFAULT_BRANCH: &str = "main";

impl BranchName {
    pub fn try_parse(name: String) -> anyhow::Result<Self> {
        if !Self::is_valid(&name) {
            anyhow::bail!("'{}' is not a valid ref name", name);
        }

        Ok(BranchName(name))
    }

    /// Extract the branch name from a full symbolic reference path
    pub fn try_parse_sym_ref_name(sym_ref: &SymRefName) -> anyhow::Result<Self> {
        Self::try_parse(sym_ref.short_name())
    }

    pub fn is_default_branch(&self) -> bool {
        self.0 == DEFAULT_BRANCH
    }

    fn is_valid(name: &str) -> bool {
        if name.is_empty() {
            return false;
        }
        if name.starts_with('.') || name.starts_with('/') || name.ends_with('/') {
            return false;
        }
        if name.ends_with(".lock") || name.ends_with('.') {
            return false;
        }
        if name.contains("/.") || name.contains("..") || name.contains("@{") {
            return false;
        }

        name.bytes().all(|byte| {
            !(byte <= 0x20
                || byte == 0x7f
                || matches!(byte, b'*' | b':' | b'?' | b'[' | b'\\' | b'^' | b'~'))
        })
    }
}

impl AsRef<str> for BranchName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A symbolic reference path, e.g. `HEAD` or `refs/heads/main`
///
/// Unlike [`BranchName`], this carries the full path below `.git`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymRefName(String);

impl SymRefName {
    pub fn new(name: String) -> Self {
        SymRefName(name)
    }

    pub fn head() -> Self {
        SymRefName("HEAD".to_string())
    }

    pub fn branch(name: &BranchName) -> Self {
        SymRefName(format!("refs/heads/{}", name))
    }

    pub fn remote(remote: &str, name: &str) -> Self {
        SymRefName(format!("refs/remotes/{}/{}", remote, name))
    }

    pub fn is_head(&self) -> bool {
        self.0 == "HEAD"
    }

    /// The path of this ref below the `.git` directory
    pub fn as_ref_path(&self) -> PathBuf {
        PathBuf::from(&self.0)
    }

    /// Strip the longest of `refs/remotes/`, `refs/heads/`, `refs/`
    pub fn short_name(&self) -> String {
        for prefix in ["refs/remotes/", "refs/heads/", "refs/"] {
            if let Some(stripped) = self.0.strip_prefix(prefix) {
                return stripped.to_string();
            }
        }

        self.0.clone()
    }
}

impl AsRef<str> for SymRefName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SymRefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::proptest;

    proptest! {
        #[test]
        fn test_is_valid_branch_name_with_valid_branch_name(
            branch_name in "[a-zA-Z0-9_-]+"
        ) {
            // Valid names: alphanumeric, underscore, hyphen
            assert!(BranchName::try_parse(branch_name).is_ok());
        }

        #[test]
        fn test_is_valid_branch_name_with_slashes(
            prefix in "[a-zA-Z0-9_-]+",
            suffix in "[a-zA-Z0-9_-]+"
        ) {
            // Valid names can have slashes: feature/branch-name
            let branch_name = format!("{}/{}", prefix, suffix);
            assert!(BranchName::try_parse(branch_name).is_ok());
        }

        #[test]
        fn test_is_invalid_branch_name_starting_with_dot(
            suffix in "[a-zA-Z0-9_-]+"
        ) {
            // Invalid: starts with dot
            let branch_name = format!(".{}", suffix);
            assert!(BranchName::try_parse(branch_name).is_err());
        }

        #[test]
        fn test_is_invalid_branch_name_ending_with_lock(
            prefix in "[a-zA-Z0-9_-]+"
        ) {
            // Invalid: ends with .lock
            let branch_name = format!("{}.lock", prefix);
            assert!(BranchName::try_parse(branch_name).is_err());
        }

        #[test]
        fn test_is_invalid_branch_name_with_consecutive_dots(
            prefix in "[a-zA-Z0-9_-]+",
            suffix in "[a-zA-Z0-9_-]+"
        ) {
            // Invalid: consecutive dots
            let branch_name = format!("{}..{}", prefix, suffix);
            assert!(BranchName::try_parse(branch_name).is_err());
        }

        #[test]
        fn test_is_invalid_branch_name_with_slash_dot(
            prefix in "[a-zA-Z0-9_-]+",
            suffix in "[a-zA-Z0-9_-]+"
        ) {
            // Invalid: contains /.
            let branch_name = format!("{}/.{}", prefix, suffix);
            assert!(BranchName::try_parse(branch_name).is_err());
        }

        #[test]
        fn test_is_invalid_branch_name_starting_with_slash(
            suffix in "[a-zA-Z0-9_-]+"
        ) {
            // Invalid: starts with /
            let branch_name = format!("/{}", suffix);
            assert!(BranchName::try_parse(branch_name).is_err());
        }

        #[test]
        fn test_is_invalid_branch_name_ending_with_slash(
            prefix in "[a-zA-Z0-9_-]+"
        ) {
            // Invalid: ends with /
            let branch_name = format!("{}/", prefix);
            assert!(BranchName::try_parse(branch_name).is_err());
        }

        #[test]
        fn test_is_invalid_branch_name_with_at_brace(
            prefix in "[a-zA-Z0-9_-]+",
            suffix in "[a-zA-Z0-9_-]+"
        ) {
            // Invalid: contains @{
            let branch_name = format!("{}@{{{}}}", prefix, suffix);
            assert!(BranchName::try_parse(branch_name).is_err());
        }

        #[test]
        fn test_is_invalid_branch_name_with_control_chars(
            prefix in "[a-zA-Z0-9_-]+",
            suffix in "[a-zA-Z0-9_-]+"
        ) {
            // Invalid: contains control characters
            let branch_name = format!("{}\x00{}", prefix, suffix);
            assert!(BranchName::try_parse(branch_name).is_err());
        }

        #[test]
        fn test_is_invalid_branch_name_with_special_chars(
            prefix in "[a-zA-Z0-9_-]+",
            suffix in "[a-zA-Z0-9_-]+",
            special_char in r"[\*:\?\[\\^~]"
        ) {
            // Invalid: contains special characters
            let branch_name = format!("{}{}{}", prefix, special_char, suffix);
            assert!(BranchName::try_parse(branch_name).is_err());
        }
    }

    #[test]
    fn test_is_invalid_branch_name_empty() {
        assert!(BranchName::try_parse("".to_string()).is_err());
    }

    #[test]
    fn test_is_valid_branch_name_simple() {
        assert!(BranchName::try_parse("main".to_string()).is_ok());
        assert!(BranchName::try_parse("feature-123".to_string()).is_ok());
        assert!(BranchName::try_parse("my_branch".to_string()).is_ok());
    }

    #[test]
    fn test_is_valid_branch_name_with_path() {
        assert!(BranchName::try_parse("feature/new-feature".to_string()).is_ok());
        assert!(BranchName::try_parse("bugfix/issue-123".to_string()).is_ok());
    }

    #[test]
    fn test_short_name_strips_longest_known_prefix() {
        let heads = SymRefName::new("refs/heads/topic".to_string());
        let remotes = SymRefName::new("refs/remotes/origin/topic".to_string());
        let bare = SymRefName::new("refs/stash".to_string());
        let head = SymRefName::head();

        assert_eq!(heads.short_name(), "topic");
        assert_eq!(remotes.short_name(), "origin/topic");
        assert_eq!(bare.short_name(), "stash");
        assert_eq!(head.short_name(), "HEAD");
    }
}
