//! Path filters for revision walks and tree diffs
//!
//! A filter is a trie of allowlisted paths. Walking into a subtree narrows
//! the filter to the matching child node; once a full allowlisted path has
//! been consumed the node is *matching* and every deeper name passes.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

#[derive(Debug, Clone)]
pub struct PathFilter {
    path_trie: SharedTrie,
    root_path: PathBuf,
}

impl PathFilter {
    /// A filter that matches everything
    pub fn empty() -> Self {
        Self {
            path_trie: SharedTrie::with_matching(true),
            root_path: PathBuf::new(),
        }
    }

    /// A filter restricted to the given paths
    ///
    /// An empty path list matches nothing; use [`PathFilter::empty`] for the
    /// match-all filter.
    pub fn new(paths: Vec<PathBuf>) -> Self {
        let mut trie = SharedTrie::new();

        for path in paths {
            let components: Vec<String> = path
                .components()
                .map(|comp| comp.as_os_str().to_string_lossy().to_string())
                .collect();
            trie.insert(&components);
        }

        Self {
            path_trie: trie,
            root_path: PathBuf::new(),
        }
    }

    /// Build the filter for a walk: match-all when no paths were given
    pub fn build(paths: Vec<PathBuf>) -> Self {
        if paths.is_empty() {
            Self::empty()
        } else {
            Self::new(paths)
        }
    }

    /// The tree position this filter has been narrowed to
    pub fn path(&self) -> &Path {
        &self.root_path
    }

    pub fn filter_matching_entries<'e, Entry: 'e>(
        &self,
        entries: impl Iterator<Item = (&'e String, &'e Entry)>,
    ) -> impl Iterator<Item = (&'e String, &'e Entry)> {
        entries.filter(move |(name, _)| self.path_trie.matches_component(name))
    }

    /// Narrow the filter to a child of the current position
    pub fn join_subpath_filter(&self, subpath: &String) -> Self {
        let new_trie = if self.path_trie.is_root_matching() {
            self.path_trie.clone()
        } else {
            let node = self.path_trie.root.borrow();
            match node.children.get(subpath) {
                Some(child_node) => SharedTrie {
                    root: Rc::clone(child_node),
                },
                None => SharedTrie::new(),
            }
        };

        let mut new_root_path = self.root_path.clone();
        new_root_path.push(subpath);

        Self {
            path_trie: new_trie,
            root_path: new_root_path,
        }
    }
}

type TrieNodeRef = Rc<RefCell<TrieNode>>;

#[derive(Debug, Clone, PartialEq, Eq)]
struct SharedTrie {
    root: TrieNodeRef,
}

impl SharedTrie {
    fn new() -> Self {
        Self {
            root: Rc::new(RefCell::new(TrieNode::with_matching(false))),
        }
    }

    fn with_matching(is_matching: bool) -> Self {
        Self {
            root: Rc::new(RefCell::new(TrieNode::with_matching(is_matching))),
        }
    }

    fn is_root_matching(&self) -> bool {
        self.root.borrow().is_end
    }

    fn insert(&mut self, path: &[String]) {
        let mut current = Rc::clone(&self.root);

        for part in path {
            let next = {
                let mut node = current.borrow_mut();

                node.children
                    .entry(part.clone())
                    .or_insert_with(|| Rc::new(RefCell::new(TrieNode::with_matching(false))))
                    .clone()
            };
            current = next;
        }

        current.borrow_mut().is_end = true;
    }

    /// Whether a single component at the current level passes the filter
    fn matches_component(&self, part: &String) -> bool {
        let node = self.root.borrow();

        if node.is_end {
            return true;
        }

        node.children.contains_key(part)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TrieNode {
    is_end: bool,
    children: HashMap<String, TrieNodeRef>,
}

impl TrieNode {
    fn with_matching(is_matching: bool) -> Self {
        Self {
            is_end: is_matching,
            children: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(filter: &PathFilter, candidates: &[&str]) -> Vec<String> {
        let owned: Vec<String> = candidates.iter().map(|s| s.to_string()).collect();
        let entries: Vec<(String, u8)> = owned.into_iter().map(|n| (n, 0u8)).collect();
        filter
            .filter_matching_entries(entries.iter().map(|(n, v)| (n, v)))
            .map(|(n, _)| n.clone())
            .collect()
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = PathFilter::empty();

        assert_eq!(names(&filter, &["src", "docs"]), vec!["src", "docs"]);
    }

    #[test]
    fn test_filter_matches_first_component() {
        let filter = PathFilter::new(vec![PathBuf::from("src/main.rs")]);

        assert_eq!(names(&filter, &["src", "docs", "tests"]), vec!["src"]);
    }

    #[test]
    fn test_narrowing_follows_the_trie() {
        let filter = PathFilter::new(vec![
            PathBuf::from("src/utils/helper.rs"),
            PathBuf::from("src/main.rs"),
        ]);

        let narrowed = filter.join_subpath_filter(&"src".to_string());

        assert_eq!(narrowed.path(), Path::new("src"));
        assert_eq!(
            names(&narrowed, &["utils", "main.rs", "lib.rs"]),
            vec!["utils", "main.rs"]
        );
    }

    #[test]
    fn test_consumed_path_matches_all_deeper_names() {
        let filter = PathFilter::new(vec![PathBuf::from("src")]);

        let below = filter
            .join_subpath_filter(&"src".to_string())
            .join_subpath_filter(&"anything".to_string());

        assert_eq!(names(&below, &["a", "b", "c"]), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_non_matching_branch_matches_nothing() {
        let filter = PathFilter::new(vec![PathBuf::from("src/main.rs")]);

        let narrowed = filter.join_subpath_filter(&"docs".to_string());

        assert!(names(&narrowed, &["README.md"]).is_empty());
    }

    #[test]
    fn test_explicit_empty_list_matches_nothing() {
        let filter = PathFilter::new(vec![]);

        assert!(names(&filter, &["src"]).is_empty());
    }
}
