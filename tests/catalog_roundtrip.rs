//! Round-trip tests for the cat/dat codec against real files on disk.

use std::fs;

use x4forge::hash::{md5_hex, EMPTY_MD5_HEX};
use x4forge::{Catalog, CatalogWriter, Config, FileSystem};

#[test]
fn test_directory_tree_roundtrip() {
    let src = tempfile::tempdir().unwrap();
    let files: &[(&str, &[u8])] = &[
        ("libraries/jobs.xml", b"<jobs><job id=\"a\"/></jobs>"),
        ("libraries/wares.xml", b"<wares/>"),
        ("t/0001-l044.xml", b"<language/>"),
        ("assets/textures/noise.dds", &[0u8, 1, 2, 3, 255]),
        ("index/macros.xml", b"<index/>"),
    ];
    for (path, bytes) in files {
        let full = src.path().join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, bytes).unwrap();
    }

    let out = tempfile::tempdir().unwrap();
    let cat_path = out.path().join("01.cat");
    let mut writer = CatalogWriter::new(&cat_path);
    writer.add_dir(src.path()).unwrap();
    writer.write(false, false).unwrap();

    let catalog = Catalog::open(&cat_path).unwrap();
    let scanned = CatalogWriter::scan_dir(src.path()).unwrap();
    assert_eq!(catalog.entries().len(), scanned.len());

    for (entry, (path, bytes, mtime)) in catalog.entries().iter().zip(&scanned) {
        assert_eq!(&entry.path, path);
        assert_eq!(entry.length, bytes.len() as u64);
        assert_eq!(entry.timestamp, *mtime);
        assert_eq!(entry.md5_hex, md5_hex(bytes));
        assert_eq!(&catalog.read(path, false).unwrap().unwrap(), bytes);
    }
}

#[test]
fn test_rewrite_is_deterministic() {
    let src = tempfile::tempdir().unwrap();
    for name in ["libraries/b.xml", "libraries/a.xml", "md/setup.xml"] {
        let full = src.path().join(name);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, b"<x/>").unwrap();
    }

    let out = tempfile::tempdir().unwrap();
    let first_cat = out.path().join("first.cat");
    let second_cat = out.path().join("second.cat");
    for cat in [&first_cat, &second_cat] {
        let mut writer = CatalogWriter::new(cat);
        writer.add_dir(src.path()).unwrap();
        writer.write(false, false).unwrap();
    }

    let first = fs::read_to_string(&first_cat).unwrap();
    let second = fs::read_to_string(&second_cat).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        fs::read(out.path().join("first.dat")).unwrap(),
        fs::read(out.path().join("second.dat")).unwrap()
    );
}

#[test]
fn test_empty_hash_bug_through_the_vfs() {
    // A catalog records the empty-string digest for an entry that has
    // twelve real bytes. The read must succeed without error.
    let game = tempfile::tempdir().unwrap();
    let payload = b"twelve bytes";
    assert_eq!(payload.len(), 12);
    fs::write(
        game.path().join("01.cat"),
        format!("foo {} 1600000000 {EMPTY_MD5_HEX}\n", payload.len()),
    )
    .unwrap();
    fs::write(game.path().join("01.dat"), payload).unwrap();

    let mut fs_ = FileSystem::new(Config::new(game.path())).unwrap();
    assert_eq!(fs_.read("foo").unwrap(), payload);
}

#[test]
fn test_sig_pair_presence() {
    let out = tempfile::tempdir().unwrap();
    let cat_path = out.path().join("ext_01.cat");
    let mut writer = CatalogWriter::new(&cat_path);
    writer.add_file("libraries/jobs.xml", b"<diff/>".to_vec(), Some(5));
    writer.write(true, true).unwrap();

    assert!(cat_path.exists());
    assert!(out.path().join("ext_01.dat").exists());
    assert!(out.path().join("ext_01.cat.sig").exists());
    assert!(out.path().join("ext_01.dat.sig").exists());
}
