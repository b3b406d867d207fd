#![allow(dead_code)]

use assert_fs::TempDir;
use chrono::{FixedOffset, TimeZone};
use kit::areas::repository::Repository;
use kit::artifacts::branch::branch_name::BranchName;
use kit::artifacts::branch::revision::Revision;
use kit::artifacts::checkout::migration::Migration;
use kit::artifacts::merge::inputs::Inputs;
use kit::artifacts::merge::resolve::Resolve;
use kit::artifacts::objects::blob::Blob;
use kit::artifacts::objects::commit::{Author, Commit};
use kit::artifacts::objects::object::Object;
use kit::artifacts::objects::object_id::ObjectId;
use kit::artifacts::objects::tree::Tree;
use std::path::PathBuf;

/// A fresh repository in a temp sandbox
pub fn init_repo() -> (TempDir, Repository) {
    let dir = TempDir::new().unwrap();
    let repo = Repository::new(dir.path().to_path_buf()).unwrap();
    repo.init().unwrap();
    (dir, repo)
}

pub fn write_file(repo: &Repository, rel: &str, content: impl AsRef<[u8]>) {
    let path = repo.path().join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

pub fn remove_file(repo: &Repository, rel: &str) {
    std::fs::remove_file(repo.path().join(rel)).unwrap();
}

pub fn read_file(repo: &Repository, rel: &str) -> String {
    String::from_utf8(std::fs::read(repo.path().join(rel)).unwrap()).unwrap()
}

/// A deterministic author; `seq` spaces commits an hour apart
pub fn author_at(seq: i64) -> Author {
    let timestamp = FixedOffset::east_opt(0)
        .unwrap()
        .timestamp_opt(1_704_067_200 + seq * 3600, 0)
        .unwrap();
    Author::new_with_timestamp(
        "A. Hacker".to_string(),
        "hacker@example.com".to_string(),
        timestamp,
    )
}

/// Rebuild the index from the current workspace contents
pub fn stage_all(repo: &Repository) {
    let mut index = repo.index_mut();
    index.load_for_update().unwrap();
    index.clear();

    for rel in repo.workspace().list_files(None).unwrap() {
        let data = repo.workspace().read_file(&rel).unwrap();
        let blob = Blob::from_bytes(data);
        let oid = repo.database().store(&blob).unwrap();
        let stat = repo.workspace().stat_file(&rel).unwrap();
        index.add(rel, oid, stat);
    }

    index.write_updates().unwrap();
}

/// Write the staged tree and commit it with explicit parents
pub fn commit_index(
    repo: &Repository,
    message: &str,
    parents: Vec<ObjectId>,
    seq: i64,
) -> ObjectId {
    let index = repo.index();
    let tree = Tree::build(index.entries().filter(|e| e.stage == 0)).unwrap();
    drop(index);

    tree.traverse(&|subtree| repo.database().store(subtree).map(|_| ()))
        .unwrap();
    let tree_oid = tree.object_id().unwrap();

    let commit = Commit::new(parents, tree_oid, author_at(seq), message.to_string());
    let oid = repo.database().store(&commit).unwrap();
    repo.refs().update_head(&oid).unwrap();

    oid
}

/// Stage everything and commit on top of HEAD
pub fn commit_all(repo: &Repository, message: &str, seq: i64) -> ObjectId {
    stage_all(repo);
    let parents: Vec<ObjectId> = repo.refs().read_head().unwrap().into_iter().collect();
    commit_index(repo, message, parents, seq)
}

pub fn create_branch(repo: &Repository, name: &str) {
    let head = repo.refs().read_head().unwrap().unwrap();
    repo.refs()
        .create_branch(BranchName::try_parse(name.to_string()).unwrap(), head)
        .unwrap();
}

/// Move HEAD and migrate workspace + index to the named branch
pub fn checkout(repo: &Repository, branch: &str) {
    let current = repo.refs().read_head().unwrap();
    let target = Revision::parse(branch)
        .unwrap()
        .resolve(repo)
        .unwrap()
        .unwrap();

    let diff = repo
        .database()
        .tree_diff_all(current.as_ref(), Some(&target))
        .unwrap();

    let mut index = repo.index_mut();
    index.load_for_update().unwrap();
    Migration::new(repo, &mut index, diff).apply_changes().unwrap();
    index.write_updates().unwrap();
    drop(index);

    repo.refs()
        .set_head(branch, format!("{}\n", target))
        .unwrap();
}

pub struct MergeOutcome {
    pub clean: bool,
    pub log: Vec<String>,
    pub commit: Option<ObjectId>,
}

/// Merge a branch into HEAD, committing when clean
pub fn merge_branch(repo: &Repository, branch: &str, seq: i64) -> MergeOutcome {
    let inputs = Inputs::new(repo, "HEAD".to_string(), branch.to_string()).unwrap();

    let mut index = repo.index_mut();
    index.load_for_update().unwrap();

    let mut resolve = Resolve::new(repo, &mut index, &inputs);
    resolve.execute().unwrap();
    let clean = !resolve.has_conflicts();
    let log = resolve.log_lines().to_vec();
    drop(resolve);

    index.write_updates().unwrap();
    drop(index);

    let commit = clean.then(|| {
        commit_index(
            repo,
            &format!("Merge branch '{}'", branch),
            vec![inputs.left_oid.clone(), inputs.right_oid.clone()],
            seq,
        )
    });

    MergeOutcome { clean, log, commit }
}

/// Deterministic pseudo-random bytes for large-blob tests
pub fn pseudo_random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        out.extend_from_slice(&state.to_le_bytes());
    }
    out.truncate(len);
    out
}

pub fn rel(path: &str) -> PathBuf {
    PathBuf::from(path)
}
