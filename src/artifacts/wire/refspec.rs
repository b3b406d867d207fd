//! Refspecs
//!
//! A refspec `[+]<src>:<dst>` maps source refs to destination refs, with an
//! optional `*` wildcard on both sides and a leading `+` marking forced
//! updates. Expansion matches a list of refspecs against actual ref names,
//! producing a destination -> (source, forced) table.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refspec {
    pub source: String,
    pub target: String,
    pub forced: bool,
}

impl Refspec {
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let (forced, rest) = match text.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, text),
        };

        let (source, target) = rest
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("invalid refspec: '{}'", text))?;

        if source.matches('*').count() > 1 || target.matches('*').count() > 1 {
            anyhow::bail!("invalid refspec: '{}'", text);
        }
        if (source.contains('*')) != (target.contains('*')) {
            anyhow::bail!("invalid refspec: '{}'", text);
        }

        Ok(Refspec {
            source: source.to_string(),
            target: target.to_string(),
            forced,
        })
    }

    /// The canonical fetch refspec for a remote
    pub fn default_fetch(remote: &str) -> Self {
        Refspec {
            source: "refs/heads/*".to_string(),
            target: format!("refs/remotes/{}/*", remote),
            forced: true,
        }
    }

    /// Match one ref name, substituting the wildcard into the target
    pub fn match_ref(&self, name: &str) -> Option<(String, bool)> {
        if !self.source.contains('*') {
            return (self.source == name).then(|| (self.target.clone(), self.forced));
        }

        let (prefix, suffix) = self.source.split_once('*').unwrap();
        if !name.starts_with(prefix) || !name.ends_with(suffix) {
            return None;
        }

        let matched = &name[prefix.len()..name.len() - suffix.len()];
        Some((self.target.replacen('*', matched, 1), self.forced))
    }

    /// Expand a refspec list against a set of ref names
    ///
    /// Returns target -> (source, forced); later refspecs do not override
    /// earlier matches for the same target.
    pub fn expand(specs: &[Refspec], names: &[String]) -> BTreeMap<String, (String, bool)> {
        let mut mappings = BTreeMap::new();

        for spec in specs {
            for name in names {
                if let Some((target, forced)) = spec.match_ref(name) {
                    mappings
                        .entry(target)
                        .or_insert_with(|| (name.clone(), forced));
                }
            }
        }

        mappings
    }
}

impl std::fmt::Display for Refspec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let plus = if self.forced { "+" } else { "" };
        write!(f, "{}{}:{}", plus, self.source, self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parses_forced_wildcard_spec() {
        let spec = Refspec::parse("+refs/heads/*:refs/remotes/origin/*").unwrap();

        assert!(spec.forced);
        assert_eq!(spec.source, "refs/heads/*");
        assert_eq!(spec.to_string(), "+refs/heads/*:refs/remotes/origin/*");
    }

    #[test]
    fn test_rejects_unbalanced_wildcards() {
        assert!(Refspec::parse("refs/heads/*:refs/remotes/origin/main").is_err());
        assert!(Refspec::parse("refs/heads/main").is_err());
    }

    #[test]
    fn test_wildcard_expansion() {
        let spec = Refspec::default_fetch("origin");
        let names = vec![
            "refs/heads/main".to_string(),
            "refs/heads/topic/a".to_string(),
            "refs/tags/v1".to_string(),
        ];

        let mappings = Refspec::expand(std::slice::from_ref(&spec), &names);

        assert_eq!(
            mappings.get("refs/remotes/origin/main"),
            Some(&("refs/heads/main".to_string(), true))
        );
        assert_eq!(
            mappings.get("refs/remotes/origin/topic/a"),
            Some(&("refs/heads/topic/a".to_string(), true))
        );
        assert!(!mappings.keys().any(|k| k.contains("tags")));
    }

    #[test]
    fn test_exact_spec_matches_one_ref() {
        let spec = Refspec::parse("refs/heads/main:refs/heads/main").unwrap();

        assert_eq!(
            spec.match_ref("refs/heads/main"),
            Some(("refs/heads/main".to_string(), false))
        );
        assert_eq!(spec.match_ref("refs/heads/other"), None);
    }
}
