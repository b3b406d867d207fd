mod common;

use common::*;
use kit::artifacts::merge::inputs::Inputs;
use kit::artifacts::merge::pending_commit::PendingKind;
use pretty_assertions::assert_eq;
use std::path::Path;

#[test]
fn disjoint_edits_merge_cleanly() {
    let (_dir, repo) = init_repo();

    write_file(&repo, "left.txt", "left v1\n");
    write_file(&repo, "right.txt", "right v1\n");
    commit_all(&repo, "root", 0);

    create_branch(&repo, "topic");
    write_file(&repo, "left.txt", "left v2\n");
    commit_all(&repo, "edit left", 1);

    checkout(&repo, "topic");
    write_file(&repo, "right.txt", "right v2\n");
    commit_all(&repo, "edit right", 2);

    checkout(&repo, "main");
    let outcome = merge_branch(&repo, "topic", 3);

    assert!(outcome.clean);
    assert!(!repo.index().has_conflict());
    assert_eq!(read_file(&repo, "left.txt"), "left v2\n");
    assert_eq!(read_file(&repo, "right.txt"), "right v2\n");

    // The merge commit has both tips as parents
    let merge_oid = outcome.commit.unwrap();
    let merge = repo
        .database()
        .parse_object_as_commit(&merge_oid)
        .unwrap()
        .unwrap();
    assert_eq!(merge.parents().len(), 2);
}

#[test]
fn merging_an_ancestor_is_a_no_op() {
    let (_dir, repo) = init_repo();

    write_file(&repo, "f.txt", "1\n");
    let first = commit_all(&repo, "one", 0);
    create_branch(&repo, "old");

    write_file(&repo, "f.txt", "2\n");
    commit_all(&repo, "two", 1);

    let inputs = Inputs::new(&repo, "HEAD".to_string(), "old".to_string()).unwrap();
    assert!(inputs.already_merged());
    assert_eq!(inputs.base_oids, vec![first]);
}

#[test]
fn fast_forward_is_detected_when_head_is_the_base() {
    let (_dir, repo) = init_repo();

    write_file(&repo, "f.txt", "1\n");
    let first = commit_all(&repo, "one", 0);
    create_branch(&repo, "ahead");

    checkout(&repo, "ahead");
    write_file(&repo, "f.txt", "2\n");
    commit_all(&repo, "two", 1);

    checkout(&repo, "main");
    let inputs = Inputs::new(&repo, "HEAD".to_string(), "ahead".to_string()).unwrap();

    assert!(inputs.is_fast_forward());
    assert!(!inputs.already_merged());
    assert_eq!(inputs.base_oids, vec![first]);
}

#[test]
fn same_line_edits_conflict_with_markers_and_stages() {
    let (_dir, repo) = init_repo();

    write_file(&repo, "f.txt", "one\ntwo\nthree\n");
    commit_all(&repo, "root", 0);

    create_branch(&repo, "topic");
    write_file(&repo, "f.txt", "one\nmain change\nthree\n");
    commit_all(&repo, "main edit", 1);

    checkout(&repo, "topic");
    write_file(&repo, "f.txt", "one\ntopic change\nthree\n");
    commit_all(&repo, "topic edit", 2);

    checkout(&repo, "main");
    let outcome = merge_branch(&repo, "topic", 3);

    assert!(!outcome.clean);
    assert!(outcome.commit.is_none());
    assert!(
        outcome
            .log
            .iter()
            .any(|line| line.contains("CONFLICT (content)"))
    );

    // Stages 1/2/3 recorded for the conflicted path
    let index = repo.index();
    assert!(index.has_conflict());
    assert!(index.entry_for_path(Path::new("f.txt")).is_none());
    let [base, ours, theirs] = index.conflict_entries(Path::new("f.txt"));
    assert!(base.is_some());
    assert!(ours.is_some());
    assert!(theirs.is_some());
    drop(index);

    // Conflict markers interleave both sides in the workspace
    let merged = read_file(&repo, "f.txt");
    assert_eq!(
        merged,
        "one\n<<<<<<< HEAD\nmain change\n=======\ntopic change\n>>>>>>> topic\nthree\n"
    );
}

#[test]
fn modify_delete_conflicts_keep_the_modified_version() {
    let (_dir, repo) = init_repo();

    write_file(&repo, "f.txt", "original\n");
    write_file(&repo, "keep.txt", "keep\n");
    commit_all(&repo, "root", 0);

    create_branch(&repo, "topic");
    remove_file(&repo, "f.txt");
    commit_all(&repo, "delete f", 1);

    checkout(&repo, "topic");
    write_file(&repo, "f.txt", "modified\n");
    commit_all(&repo, "modify f", 2);

    checkout(&repo, "main");
    let outcome = merge_branch(&repo, "topic", 3);

    assert!(!outcome.clean);
    assert!(
        outcome
            .log
            .iter()
            .any(|line| line.contains("CONFLICT (modify/delete)"))
    );

    // The surviving modification is left in the tree
    assert_eq!(read_file(&repo, "f.txt"), "modified\n");

    let index = repo.index();
    let [base, ours, theirs] = index.conflict_entries(Path::new("f.txt"));
    assert!(base.is_some());
    assert!(ours.is_none());
    assert!(theirs.is_some());
}

#[test]
fn merge_result_equals_the_other_side_when_base_is_one_tip() {
    let (_dir, repo) = init_repo();

    write_file(&repo, "a.txt", "a\n");
    commit_all(&repo, "root", 0);

    create_branch(&repo, "topic");
    checkout(&repo, "topic");
    write_file(&repo, "a.txt", "a2\n");
    write_file(&repo, "b.txt", "b\n");
    let tip = commit_all(&repo, "advance", 1);

    checkout(&repo, "main");
    let outcome = merge_branch(&repo, "topic", 2);

    assert!(outcome.clean);
    let merge = repo
        .database()
        .parse_object_as_commit(&outcome.commit.unwrap())
        .unwrap()
        .unwrap();
    let tip_commit = repo.database().parse_object_as_commit(&tip).unwrap().unwrap();

    // base == left, so the merged tree must equal the right tree
    assert_eq!(merge.tree_oid(), tip_commit.tree_oid());
}

#[test]
fn pending_commit_state_survives_a_conflicted_merge() {
    let (_dir, repo) = init_repo();

    write_file(&repo, "f.txt", "one\n");
    commit_all(&repo, "root", 0);

    create_branch(&repo, "topic");
    write_file(&repo, "f.txt", "main\n");
    commit_all(&repo, "main edit", 1);

    checkout(&repo, "topic");
    write_file(&repo, "f.txt", "topic\n");
    let topic_tip = commit_all(&repo, "topic edit", 2);

    checkout(&repo, "main");
    let inputs = Inputs::new(&repo, "HEAD".to_string(), "topic".to_string()).unwrap();

    let pending = repo.pending_commit();
    pending
        .start(&inputs.right_oid, PendingKind::Merge, "Merge branch 'topic'\n")
        .unwrap();

    assert!(pending.in_progress());
    assert_eq!(pending.merge_oid(PendingKind::Merge).unwrap(), topic_tip);
    assert_eq!(
        pending.merge_message().unwrap(),
        "Merge branch 'topic'\n"
    );

    pending.clear(PendingKind::Merge).unwrap();
    assert!(!pending.in_progress());
}

#[test]
fn file_directory_collisions_demote_the_file() {
    let (_dir, repo) = init_repo();

    write_file(&repo, "base.txt", "base\n");
    commit_all(&repo, "root", 0);

    create_branch(&repo, "topic");
    write_file(&repo, "thing", "a plain file on main\n");
    commit_all(&repo, "file thing", 1);

    checkout(&repo, "topic");
    write_file(&repo, "thing/nested.txt", "a directory on topic\n");
    commit_all(&repo, "dir thing", 2);

    checkout(&repo, "main");
    let outcome = merge_branch(&repo, "topic", 3);

    assert!(!outcome.clean);
    // The colliding file is materialized under a side-suffixed name
    assert_eq!(read_file(&repo, "thing~HEAD"), "a plain file on main\n");
}
