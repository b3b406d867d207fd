mod common;

use common::*;
use kit::artifacts::log::rev_list::{RevList, RevListOptions};
use kit::artifacts::objects::object_id::ObjectId;
use pretty_assertions::assert_eq;

fn walk(repo: &kit::areas::repository::Repository, revs: &[&str]) -> Vec<ObjectId> {
    let revs: Vec<String> = revs.iter().map(|s| s.to_string()).collect();
    RevList::new(repo, &revs, RevListOptions::default())
        .unwrap()
        .map(|item| item.unwrap().0)
        .collect()
}

#[test]
fn linear_history_walks_newest_first() {
    let (_dir, repo) = init_repo();

    write_file(&repo, "f.txt", "1\n");
    let first = commit_all(&repo, "one", 0);
    write_file(&repo, "f.txt", "2\n");
    let second = commit_all(&repo, "two", 1);
    write_file(&repo, "f.txt", "3\n");
    let third = commit_all(&repo, "three", 2);

    assert_eq!(walk(&repo, &[]), vec![third, second, first]);
}

#[test]
fn timestamps_never_increase_along_the_walk() {
    let (_dir, repo) = init_repo();

    for i in 0..5 {
        write_file(&repo, "f.txt", format!("{}\n", i));
        commit_all(&repo, &format!("c{}", i), i);
    }

    let revs: Vec<String> = vec![];
    let commits: Vec<_> = RevList::new(&repo, &revs, RevListOptions::default())
        .unwrap()
        .map(|item| item.unwrap().1)
        .collect();

    for pair in commits.windows(2) {
        assert!(pair[0].timestamp() >= pair[1].timestamp());
    }
}

#[test]
fn range_excludes_the_lower_bound_and_its_ancestors() {
    let (_dir, repo) = init_repo();

    write_file(&repo, "f.txt", "1\n");
    commit_all(&repo, "one", 0);
    write_file(&repo, "f.txt", "2\n");
    let second = commit_all(&repo, "two", 1);
    create_branch(&repo, "mark");

    write_file(&repo, "f.txt", "3\n");
    let third = commit_all(&repo, "three", 2);
    write_file(&repo, "f.txt", "4\n");
    let fourth = commit_all(&repo, "four", 3);

    assert_eq!(walk(&repo, &["mark..HEAD"]), vec![fourth.clone(), third.clone()]);

    // ^rev spelling is equivalent
    assert_eq!(
        walk(&repo, &[&format!("^{}", second), "HEAD"]),
        vec![fourth, third]
    );
}

#[test]
fn exclusion_only_input_defaults_to_head() {
    let (_dir, repo) = init_repo();

    write_file(&repo, "f.txt", "1\n");
    commit_all(&repo, "one", 0);
    create_branch(&repo, "base");
    write_file(&repo, "f.txt", "2\n");
    let second = commit_all(&repo, "two", 1);

    assert_eq!(walk(&repo, &["^base"]), vec![second]);
}

#[test]
fn merge_commits_pull_in_both_parents() {
    let (_dir, repo) = init_repo();

    write_file(&repo, "base.txt", "base\n");
    let root = commit_all(&repo, "root", 0);

    create_branch(&repo, "topic");
    write_file(&repo, "main.txt", "main\n");
    let on_main = commit_all(&repo, "on main", 1);

    checkout(&repo, "topic");
    write_file(&repo, "topic.txt", "topic\n");
    let on_topic = commit_all(&repo, "on topic", 2);

    checkout(&repo, "main");
    let merge = merge_branch(&repo, "topic", 3);
    assert!(merge.clean);

    let walked = walk(&repo, &[]);
    assert_eq!(walked.len(), 4);
    assert_eq!(walked[0], merge.commit.unwrap());
    assert!(walked.contains(&on_main));
    assert!(walked.contains(&on_topic));
    assert_eq!(*walked.last().unwrap(), root);
}

#[test]
fn path_filter_keeps_only_commits_touching_the_path() {
    let (_dir, repo) = init_repo();

    write_file(&repo, "a.txt", "1\n");
    write_file(&repo, "b.txt", "1\n");
    let first = commit_all(&repo, "both", 0);

    write_file(&repo, "b.txt", "2\n");
    commit_all(&repo, "only b", 1);

    write_file(&repo, "a.txt", "2\n");
    let third = commit_all(&repo, "only a", 2);

    assert_eq!(walk(&repo, &["a.txt"]), vec![third, first]);
}

#[test]
fn filtered_walk_follows_the_treesame_parent() {
    let (_dir, repo) = init_repo();

    write_file(&repo, "watched.txt", "v1\n");
    let first = commit_all(&repo, "add watched", 0);

    create_branch(&repo, "side");
    checkout(&repo, "side");
    write_file(&repo, "noise.txt", "noise\n");
    commit_all(&repo, "noise only", 1);

    checkout(&repo, "main");
    write_file(&repo, "watched.txt", "v2\n");
    let change = commit_all(&repo, "change watched", 2);

    let merge = merge_branch(&repo, "side", 3);
    assert!(merge.clean);

    // The merge itself is TREESAME to its first parent for watched.txt
    assert_eq!(walk(&repo, &["watched.txt"]), vec![change, first]);
}

#[test]
fn no_walk_mode_yields_only_the_inputs() {
    let (_dir, repo) = init_repo();

    write_file(&repo, "f.txt", "1\n");
    commit_all(&repo, "one", 0);
    write_file(&repo, "f.txt", "2\n");
    let second = commit_all(&repo, "two", 1);

    let revs = vec![second.to_string()];
    let options = RevListOptions {
        walk: false,
        ..Default::default()
    };
    let walked: Vec<ObjectId> = RevList::new(&repo, &revs, options)
        .unwrap()
        .map(|item| item.unwrap().0)
        .collect();

    assert_eq!(walked, vec![second]);
}

#[test]
fn object_walk_covers_commits_trees_and_blobs() {
    let (_dir, repo) = init_repo();

    write_file(&repo, "dir/inner.txt", "inner\n");
    write_file(&repo, "top.txt", "top\n");
    let commit = commit_all(&repo, "one", 0);

    let options = RevListOptions {
        objects: true,
        ..Default::default()
    };
    let objects = RevList::new(&repo, &[], options)
        .unwrap()
        .all_objects()
        .unwrap();

    // 1 commit + root tree + dir tree + 2 blobs
    assert_eq!(objects.len(), 5);
    assert!(objects.iter().any(|(oid, _)| *oid == commit));
    assert!(
        objects
            .iter()
            .any(|(_, path)| path.as_deref() == Some(rel("dir/inner.txt").as_path()))
    );
}

#[test]
fn object_walk_skips_everything_reachable_from_exclusions() {
    let (_dir, repo) = init_repo();

    write_file(&repo, "old.txt", "old\n");
    let first = commit_all(&repo, "one", 0);
    create_branch(&repo, "have");

    write_file(&repo, "new.txt", "new\n");
    commit_all(&repo, "two", 1);

    let options = RevListOptions {
        objects: true,
        ..Default::default()
    };
    let revs = vec!["have..HEAD".to_string()];
    let objects = RevList::new(&repo, &revs, options)
        .unwrap()
        .all_objects()
        .unwrap();

    assert!(!objects.iter().any(|(oid, _)| *oid == first));
    assert!(
        !objects
            .iter()
            .any(|(_, path)| path.as_deref() == Some(rel("old.txt").as_path())),
        "blobs reachable from the exclusion must not be emitted"
    );
    assert!(
        objects
            .iter()
            .any(|(_, path)| path.as_deref() == Some(rel("new.txt").as_path()))
    );
}
