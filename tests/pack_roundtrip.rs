mod common;

use common::*;
use kit::areas::repository::Repository;
use kit::artifacts::log::rev_list::{RevList, RevListOptions};
use kit::artifacts::objects::object_id::ObjectId;
use kit::artifacts::pack::writer::Writer;
use pretty_assertions::assert_eq;
use std::path::PathBuf;

/// Pack every object reachable from HEAD
fn pack_repository(repo: &Repository, allow_ofs: bool) -> (Vec<u8>, Vec<ObjectId>) {
    let options = RevListOptions {
        objects: true,
        ..Default::default()
    };
    let candidates = RevList::new(repo, &[], options)
        .unwrap()
        .all_objects()
        .unwrap();
    let oids: Vec<ObjectId> = candidates.iter().map(|(oid, _)| oid.clone()).collect();

    let mut output = Vec::new();
    let mut writer = Writer::new(&mut output, repo.database(), allow_ofs);
    writer.write_objects(candidates).unwrap();

    (output, oids)
}

fn assert_all_present(repo: &Repository, oids: &[ObjectId]) {
    for oid in oids {
        assert!(repo.database().has(oid), "missing {}", oid);
        let raw = repo.database().load_raw(oid).unwrap();
        // Every stored OID hashes to itself
        let rehashed = kit::artifacts::objects::object::hash_raw(raw.object_type, &raw.data).unwrap();
        assert_eq!(&rehashed, oid);
    }
}

fn build_history(repo: &Repository) {
    write_file(repo, "src/main.txt", "fn main\n".repeat(40));
    write_file(repo, "README.md", "docs\n");
    commit_all(repo, "one", 0);

    write_file(repo, "src/main.txt", format!("{}\nplus a change\n", "fn main\n".repeat(40)));
    write_file(repo, "src/lib.txt", "library\n".repeat(30));
    commit_all(repo, "two", 1);

    write_file(repo, "README.md", "docs v2\n");
    commit_all(repo, "three", 2);
}

#[test]
fn small_packs_explode_into_loose_objects() {
    let (_dir, source) = init_repo();
    build_history(&source);

    let (pack, oids) = pack_repository(&source, true);

    let (_dir2, target) = init_repo();
    target.database().receive_pack(pack.as_slice(), None).unwrap();

    // Below the unpack limit everything lands loosely
    assert_all_present(&target, &oids);
    let pack_dir_entries = std::fs::read_dir(target.git_path().join("objects/pack"))
        .unwrap()
        .count();
    assert_eq!(pack_dir_entries, 0);
}

#[test]
fn large_packs_are_indexed_in_place() {
    let (_dir, source) = init_repo();
    build_history(&source);

    let (pack, oids) = pack_repository(&source, true);

    let (_dir2, target) = init_repo();
    // An unpack limit of zero forces the indexer path
    target
        .database()
        .receive_pack(pack.as_slice(), Some(0))
        .unwrap();

    let pack_dir: Vec<PathBuf> = std::fs::read_dir(target.git_path().join("objects/pack"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert!(pack_dir.iter().any(|p| p.extension().unwrap() == "pack"));
    assert!(pack_dir.iter().any(|p| p.extension().unwrap() == "idx"));

    // Objects are served through the pack backend
    assert_all_present(&target, &oids);

    // And prefix lookups consult the pack index
    let head = source.refs().read_head().unwrap().unwrap();
    let matches = target.database().prefix_match(&head.to_short_oid()).unwrap();
    assert_eq!(matches, vec![head]);
}

#[test]
fn ref_delta_packs_round_trip_too() {
    let (_dir, source) = init_repo();
    build_history(&source);

    let (pack, oids) = pack_repository(&source, false);

    let (_dir2, target) = init_repo();
    target
        .database()
        .receive_pack(pack.as_slice(), Some(0))
        .unwrap();

    assert_all_present(&target, &oids);
}

#[test]
fn similar_large_blobs_are_stored_as_deltas() {
    let (_dir, source) = init_repo();

    // A 2 MB blob and a variant differing in one byte
    let base = pseudo_random_bytes(2 * 1024 * 1024, 7);
    let mut variant = base.clone();
    variant[1_000_000] ^= 0x01;

    write_file(&source, "big.bin", &base);
    commit_all(&source, "one", 0);
    write_file(&source, "big.bin", &variant);
    commit_all(&source, "two", 1);

    let (pack, oids) = pack_repository(&source, true);

    // If the variant were stored whole the pack would exceed 4 MB of
    // payload; the delta keeps it near one compressed copy
    assert!(
        (pack.len() as u64) < 3 * 1024 * 1024,
        "pack is {} bytes, delta compression did not engage",
        pack.len()
    );

    let (_dir2, target) = init_repo();
    target.database().receive_pack(pack.as_slice(), None).unwrap();
    assert_all_present(&target, &oids);

    // Byte-exact reconstruction of both blobs
    let reconstructed: Vec<Vec<u8>> = oids
        .iter()
        .filter_map(|oid| {
            let raw = target.database().load_raw(oid).unwrap();
            (raw.size == base.len() as u64).then(|| raw.data.to_vec())
        })
        .collect();
    assert_eq!(reconstructed.len(), 2);
    assert!(reconstructed.contains(&base));
    assert!(reconstructed.contains(&variant));
}

#[test]
fn corrupted_pack_installs_nothing() {
    let (_dir, source) = init_repo();
    build_history(&source);

    let (mut pack, _) = pack_repository(&source, true);
    let len = pack.len();
    pack[len - 1] ^= 0xff;

    let (_dir2, target) = init_repo();
    let result = target.database().receive_pack(pack.as_slice(), Some(0));

    assert!(result.is_err());
    let leftovers = std::fs::read_dir(target.git_path().join("objects/pack"))
        .unwrap()
        .count();
    assert_eq!(leftovers, 0, "no .pack/.idx pair may be left behind");
}

#[test]
fn packed_and_loose_backends_agree_after_reload() {
    let (_dir, source) = init_repo();
    build_history(&source);
    let (pack, oids) = pack_repository(&source, true);

    let (_dir2, target) = init_repo();
    target
        .database()
        .receive_pack(pack.as_slice(), Some(0))
        .unwrap();

    // A fresh handle over the same directory sees the pack after its scan
    let reopened = Repository::new(target.path().to_path_buf()).unwrap();
    reopened.database().reload().unwrap();
    assert_all_present(&reopened, &oids);

    let (object_type, size) = reopened.database().load_info(&oids[0]).unwrap();
    assert_eq!(
        object_type,
        kit::artifacts::objects::object_type::ObjectType::Commit
    );
    assert!(size > 0);
}
