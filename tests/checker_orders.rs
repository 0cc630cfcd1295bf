//! Checker scenarios: surfacing patches that only work by load-order
//! accident.

use std::fs;
use std::path::Path;

use x4forge::{check_extension, CatalogWriter, Config};

fn write_base_cat(game: &Path, entries: &[(&str, &str)]) {
    let mut writer = CatalogWriter::new(game.join("01.cat"));
    for (path, body) in entries {
        writer.add_file(path, body.as_bytes().to_vec(), Some(1_600_000_000));
    }
    writer.write(false, false).unwrap();
}

fn write_extension(game: &Path, folder: &str, deps: &[&str], files: &[(&str, &str)]) {
    let root = game.join("extensions").join(folder);
    fs::create_dir_all(&root).unwrap();
    let mut manifest = format!(r#"<content id="{folder}" name="{folder}" version="100">"#);
    for dep in deps {
        manifest.push_str(&format!(r#"<dependency id="{dep}"/>"#));
    }
    manifest.push_str("</content>");
    fs::write(root.join("content.xml"), manifest).unwrap();
    for (path, body) in files {
        let full = root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, body).unwrap();
    }
}

/// Extension `a` patches a node that only exists because `b` inserts it,
/// but declares no dependency on `b`. Alphabetically `a` loads first and
/// its patch fails; scheduled late, it works.
#[test]
fn test_order_dependent_patch_is_reported() {
    let game = tempfile::tempdir().unwrap();
    write_base_cat(game.path(), &[("libraries/jobs.xml", "<jobs/>")]);
    write_extension(
        game.path(),
        "b",
        &[],
        &[(
            "libraries/jobs.xml",
            r#"<diff><add sel="/jobs"><job id="b_job" quota="1"/></add></diff>"#,
        )],
    );
    write_extension(
        game.path(),
        "a",
        &[],
        &[(
            "libraries/jobs.xml",
            r#"<diff><replace sel="//job[@id='b_job']/@quota">5</replace></diff>"#,
        )],
    );

    let config = Config::new(game.path());
    let report = check_extension(&config, "a", true).unwrap();
    assert!(!report.ok());

    let orders_with_failures: Vec<&str> = report
        .failures
        .iter()
        .map(|f| f.order.as_str())
        .collect();
    assert!(orders_with_failures.contains(&"alphabetical"));
    assert!(orders_with_failures.contains(&"early"));
    assert!(!orders_with_failures.contains(&"late"));

    let failure = report
        .failures
        .iter()
        .find(|f| f.order == "alphabetical")
        .unwrap();
    assert_eq!(failure.virtual_path, "libraries/jobs.xml");
    assert_eq!(failure.extension_id, "a");
    assert!(failure.sel.contains("b_job"));
    assert!(failure.message.contains("no xpath match"));
}

/// The same pair with the dependency declared is clean under every order:
/// the sort never schedules `a` before `b`.
#[test]
fn test_declared_dependency_passes_all_orders() {
    let game = tempfile::tempdir().unwrap();
    write_base_cat(game.path(), &[("libraries/jobs.xml", "<jobs/>")]);
    write_extension(
        game.path(),
        "b",
        &[],
        &[(
            "libraries/jobs.xml",
            r#"<diff><add sel="/jobs"><job id="b_job" quota="1"/></add></diff>"#,
        )],
    );
    write_extension(
        game.path(),
        "a",
        &["b"],
        &[(
            "libraries/jobs.xml",
            r#"<diff><replace sel="//job[@id='b_job']/@quota">5</replace></diff>"#,
        )],
    );

    let config = Config::new(game.path());
    let report = check_extension(&config, "a", true).unwrap();
    assert!(report.ok(), "failures: {:?}", report.failures);
}

#[test]
fn test_self_contained_extension_is_clean() {
    let game = tempfile::tempdir().unwrap();
    write_base_cat(
        game.path(),
        &[("libraries/jobs.xml", r#"<jobs><job id="a" quota="10"/></jobs>"#)],
    );
    write_extension(
        game.path(),
        "solo",
        &[],
        &[(
            "libraries/jobs.xml",
            r#"<diff><replace sel="//job[@id='a']/@quota">11</replace></diff>"#,
        )],
    );

    let config = Config::new(game.path());
    let report = check_extension(&config, "solo", true).unwrap();
    assert!(report.ok(), "failures: {:?}", report.failures);
}

#[test]
fn test_unknown_extension_errors() {
    let game = tempfile::tempdir().unwrap();
    write_base_cat(game.path(), &[("libraries/jobs.xml", "<jobs/>")]);
    let config = Config::new(game.path());
    assert!(check_extension(&config, "ghost", true).is_err());
}
