//! Output stage: loose and packed emission, manifest generation, run-log
//! cleanup and collision handling.

use std::fs;
use std::path::Path;

use x4forge::xml::Document;
use x4forge::{Catalog, CatalogWriter, Config, FileSystem, ForgeError, GameFile};

fn write_base_cat(game: &Path, entries: &[(&str, &str)]) {
    let mut writer = CatalogWriter::new(game.join("01.cat"));
    for (path, body) in entries {
        writer.add_file(path, body.as_bytes().to_vec(), Some(1_600_000_000));
    }
    writer.write(false, false).unwrap();
}

fn write_extension(game: &Path, folder: &str, files: &[(&str, &str)]) {
    let root = game.join("extensions").join(folder);
    fs::create_dir_all(&root).unwrap();
    fs::write(
        root.join("content.xml"),
        format!(r#"<content id="{folder}" name="{folder}" version="100"/>"#),
    )
    .unwrap();
    for (path, body) in files {
        let full = root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, body).unwrap();
    }
}

fn edit_quota(fs_: &mut FileSystem, value: &str) {
    let mut root = fs_.get_root("libraries/jobs.xml").unwrap();
    let job = root.find_all("//job[@id='a']").unwrap()[0];
    root.set_attr(job, "quota", value);
    fs_.update_root("libraries/jobs.xml", root).unwrap();
}

#[test]
fn test_loose_output_with_diff_and_manifest() {
    let game = tempfile::tempdir().unwrap();
    write_base_cat(
        game.path(),
        &[("libraries/jobs.xml", r#"<jobs><job id="a" quota="10"/></jobs>"#)],
    );
    write_extension(
        game.path(),
        "x",
        &[(
            "libraries/jobs.xml",
            r#"<diff><replace sel="//job[@id='a']/@quota">20</replace></diff>"#,
        )],
    );

    let config = Config::new(game.path()).with_extension_identity("my_mod", "My Mod", "100");
    let out_dir = config.output_folder();
    let mut fs_ = FileSystem::new(config).unwrap();
    edit_quota(&mut fs_, "42");
    fs_.write_files(false).unwrap();

    // The emitted file is a diff against the patched base (quota=20).
    let emitted = fs::read(out_dir.join("libraries/jobs.xml")).unwrap();
    let patch = Document::parse(&emitted).unwrap();
    assert_eq!(patch.tag(patch.root()), "diff");
    let ops = patch.children(patch.root());
    assert_eq!(ops.len(), 1);
    assert_eq!(patch.text(ops[0]), Some("42"));

    // content.xml declares the dependency on x, whose patch reached the
    // modified file.
    let manifest = fs::read(out_dir.join("content.xml")).unwrap();
    let manifest = Document::parse(&manifest).unwrap();
    assert_eq!(manifest.attr(manifest.root(), "id"), Some("my_mod"));
    let deps: Vec<&str> = manifest
        .children(manifest.root())
        .iter()
        .filter(|&&c| manifest.tag(c) == "dependency")
        .filter_map(|&c| manifest.attr(c, "id"))
        .collect();
    assert_eq!(deps, vec!["x"]);

    assert!(out_dir.join("forge_log.json").exists());
}

#[test]
fn test_rerun_cleans_previous_output() {
    let game = tempfile::tempdir().unwrap();
    write_base_cat(
        game.path(),
        &[("libraries/jobs.xml", r#"<jobs><job id="a" quota="10"/></jobs>"#)],
    );

    let config = Config::new(game.path()).with_extension_identity("my_mod", "My Mod", "100");
    let out_dir = config.output_folder();

    let mut fs_ = FileSystem::new(config.clone()).unwrap();
    edit_quota(&mut fs_, "11");
    fs_.write_files(false).unwrap();
    let first = fs::read(out_dir.join("libraries/jobs.xml")).unwrap();

    // A fresh engine run against the same output folder must replace the
    // previous artifacts without complaining about its own files.
    let mut fs_ = FileSystem::new(config).unwrap();
    edit_quota(&mut fs_, "12");
    fs_.write_files(false).unwrap();
    let second = fs::read(out_dir.join("libraries/jobs.xml")).unwrap();
    assert_ne!(first, second);
}

#[test]
fn test_foreign_file_at_output_path_is_a_collision() {
    let game = tempfile::tempdir().unwrap();
    write_base_cat(
        game.path(),
        &[("libraries/jobs.xml", r#"<jobs><job id="a" quota="10"/></jobs>"#)],
    );

    let config = Config::new(game.path()).with_extension_identity("my_mod", "My Mod", "100");
    let out_dir = config.output_folder();
    fs::create_dir_all(out_dir.join("libraries")).unwrap();
    fs::write(out_dir.join("libraries/jobs.xml"), b"<somebody elses file/>").unwrap();

    let mut fs_ = FileSystem::new(config).unwrap();
    edit_quota(&mut fs_, "11");
    assert!(matches!(
        fs_.write_files(false),
        Err(ForgeError::OutputPathCollision(_))
    ));
}

#[test]
fn test_packed_output_splits_ext_and_subst() {
    let game = tempfile::tempdir().unwrap();
    write_base_cat(
        game.path(),
        &[
            ("libraries/jobs.xml", r#"<jobs><job id="a" quota="10"/></jobs>"#),
            ("shadergl/shaders/common.v", "void main(){}"),
        ],
    );

    let config = Config::new(game.path())
        .with_extension_identity("my_mod", "My Mod", "100")
        .with_output_to_catalog(true)
        .with_generate_sigs(true);
    let out_dir = config.output_folder();
    let mut fs_ = FileSystem::new(config).unwrap();

    edit_quota(&mut fs_, "42");
    // Touch the shader so it ships too; shaders always pack as
    // substitutions.
    let shader = fs_.load_file("shadergl/shaders/common.v").unwrap();
    shader.modified = true;
    fs_.write_files(false).unwrap();

    let ext = Catalog::open(out_dir.join("ext_01.cat")).unwrap();
    assert!(ext.contains("libraries/jobs.xml"));
    assert!(ext.contains("libraries/jobs.xml.sig"));
    let diff_bytes = ext.read("libraries/jobs.xml", false).unwrap().unwrap();
    assert!(String::from_utf8(diff_bytes).unwrap().contains("<diff>"));

    let subst = Catalog::open(out_dir.join("subst_01.cat")).unwrap();
    assert!(subst.contains("shadergl/shaders/common.v"));

    // The manifest still lands loose.
    assert!(out_dir.join("content.xml").exists());
}

#[test]
fn test_existing_manifest_dependencies_are_merged() {
    let game = tempfile::tempdir().unwrap();
    write_base_cat(
        game.path(),
        &[("libraries/jobs.xml", r#"<jobs><job id="a" quota="10"/></jobs>"#)],
    );
    write_extension(
        game.path(),
        "x",
        &[(
            "libraries/jobs.xml",
            r#"<diff><replace sel="//job[@id='a']/@quota">20</replace></diff>"#,
        )],
    );

    let config = Config::new(game.path()).with_extension_identity("my_mod", "My Mod", "100");
    let out_dir = config.output_folder();
    fs::create_dir_all(&out_dir).unwrap();
    fs::write(
        out_dir.join("content.xml"),
        r#"<content id="my_mod" name="My Mod" version="099">
             <dependency id="hand_added" optional="true"/>
           </content>"#,
    )
    .unwrap();

    let mut fs_ = FileSystem::new(config).unwrap();
    edit_quota(&mut fs_, "42");
    fs_.write_files(false).unwrap();

    let manifest = fs::read(out_dir.join("content.xml")).unwrap();
    let manifest = Document::parse(&manifest).unwrap();
    let deps: Vec<&str> = manifest
        .children(manifest.root())
        .iter()
        .filter(|&&c| manifest.tag(c) == "dependency")
        .filter_map(|&c| manifest.attr(c, "id"))
        .collect();
    assert_eq!(deps, vec!["hand_added", "x"]);
}

#[test]
fn test_skip_content_suppresses_manifest() {
    let game = tempfile::tempdir().unwrap();
    write_base_cat(
        game.path(),
        &[("libraries/jobs.xml", r#"<jobs><job id="a" quota="10"/></jobs>"#)],
    );

    let config = Config::new(game.path()).with_extension_identity("my_mod", "My Mod", "100");
    let out_dir = config.output_folder();
    let mut fs_ = FileSystem::new(config).unwrap();
    edit_quota(&mut fs_, "42");
    fs_.write_files(true).unwrap();

    assert!(out_dir.join("libraries/jobs.xml").exists());
    assert!(!out_dir.join("content.xml").exists());
}

#[test]
fn test_generated_binary_file_ships_full() {
    let game = tempfile::tempdir().unwrap();
    write_base_cat(
        game.path(),
        &[("libraries/jobs.xml", r#"<jobs><job id="a" quota="10"/></jobs>"#)],
    );

    let config = Config::new(game.path()).with_extension_identity("my_mod", "My Mod", "100");
    let out_dir = config.output_folder();
    let mut fs_ = FileSystem::new(config).unwrap();
    fs_.add_file(GameFile::from_generated_bytes(
        "assets/textures/new.dds",
        vec![0xDD, 0x55],
    ));
    fs_.write_files(true).unwrap();

    assert_eq!(
        fs::read(out_dir.join("assets/textures/new.dds")).unwrap(),
        vec![0xDD, 0x55]
    );
}
