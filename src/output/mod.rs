//! Output stage: drains the modified-file set into a generated extension.
//!
//! Modified XML files sourced from the game are encoded as diff patches
//! against their patched base; everything else ships as full content.
//! Depending on configuration the set lands as loose files under the
//! output extension folder or packed into `ext_01.cat` (plus `subst_01.cat`
//! for replacement-style files). A regenerated `content.xml` declares a
//! dependency on every extension whose content reached a modified file.

pub mod run_log;

pub use run_log::RunLog;

use std::collections::BTreeSet;
use std::fs;

use chrono::Utc;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::catalog::CatalogWriter;
use crate::error::{ForgeError, Result};
use crate::vfs::{FileSystem, GameFile};
use crate::xml::Document;

/// Language ids the game ships localisation files for (the `t/` catalog
/// pages). The generated manifest carries one `<text>` description node
/// per id; only English (44) gets a description string.
const MANIFEST_LANGUAGE_IDS: &[&str] = &[
    "7", "33", "37", "39", "44", "49", "55", "81", "82", "86", "88",
];

/// Write every modified file out and regenerate `content.xml`.
///
/// `skip_content` suppresses manifest generation (used when the caller
/// maintains its own `content.xml`).
pub fn write_extension(fs_: &mut FileSystem, skip_content: bool) -> Result<()> {
    let out_dir = fs_.config().output_folder();
    let old_log = RunLog::load(&out_dir);
    old_log.cleanup(&out_dir);

    fs_.add_source_folder_copies()?;
    if !skip_content {
        let manifest = build_content_xml(fs_)?;
        fs_.add_file(manifest);
    }

    let maximal = fs_.config().make_maximal_diffs;
    let forced = fs_.config().forced_xpath_attributes.clone();
    let output_to_catalog = fs_.config().output_to_catalog;
    let generate_sigs = fs_.config().generate_sigs;

    // Diff synthesis is per-file independent; encode on the worker pool.
    let mut modified: Vec<&mut GameFile> = fs_
        .files_mut()
        .values_mut()
        .filter(|f| f.modified)
        .collect();
    let encoded: Vec<(String, Result<Vec<u8>>, bool, bool)> = modified
        .par_iter_mut()
        .map(|file| {
            (
                file.virtual_path().to_string(),
                file.output_bytes(maximal, &forced),
                file.needs_subst(),
                file.edit_in_place,
            )
        })
        .collect();

    let mut new_log = RunLog::default();
    let mut ext_writer = CatalogWriter::new(out_dir.join("ext_01.cat"));
    let mut subst_writer = CatalogWriter::new(out_dir.join("subst_01.cat"));

    for (virtual_path, bytes, needs_subst, edit_in_place) in encoded {
        let bytes = bytes?;

        // The manifest must stay loose for the game to see the extension
        // at all; everything else honours the packing switch.
        let pack = output_to_catalog && virtual_path != "content.xml";
        if pack {
            if needs_subst {
                subst_writer.add_file(&virtual_path, bytes, None);
            } else {
                ext_writer.add_file(&virtual_path, bytes, None);
            }
            continue;
        }

        let target = out_dir.join(&virtual_path);
        if target.exists() && !edit_in_place && !old_log.owns(&out_dir, &target) {
            return Err(ForgeError::OutputPathCollision(target));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, &bytes)?;
        if !edit_in_place {
            new_log.record(&out_dir, &target, Some(&virtual_path))?;
        }
        // Keep the log current in case a later write fails.
        new_log.store(&out_dir)?;
    }

    for writer in [&mut ext_writer, &mut subst_writer] {
        if writer.is_empty() {
            continue;
        }
        let cat_path = writer.cat_path().to_path_buf();
        if cat_path.exists() && !old_log.owns(&out_dir, &cat_path) {
            return Err(ForgeError::OutputPathCollision(cat_path));
        }
        fs::create_dir_all(&out_dir)?;
        writer.write(generate_sigs, false)?;
        let cat_path = writer.cat_path().to_path_buf();
        let dat_path = writer.dat_path().to_path_buf();
        new_log.record(&out_dir, &cat_path, None)?;
        new_log.record(&out_dir, &dat_path, None)?;
    }

    new_log.store(&out_dir)?;
    info!(
        out = %out_dir.display(),
        files = new_log.files().len(),
        "extension written"
    );
    Ok(())
}

/// Regenerate the output extension's `content.xml`.
///
/// Dependencies are the union of every modified file's originating
/// extensions and whatever a pre-existing manifest already declared.
fn build_content_xml(fs_: &FileSystem) -> Result<GameFile> {
    let config = fs_.config();
    let own_id = config.extension_id.replace(' ', "_").to_ascii_lowercase();
    let name = config.extension_name.clone();
    let version = config.extension_version.clone();
    let out_dir = config.output_folder();

    // Collect originating extensions across the modified set.
    let mut dependency_ids: BTreeSet<String> = BTreeSet::new();
    for file in fs_.loaded_files() {
        if !file.modified {
            continue;
        }
        for id in file.source_extension_ids() {
            if id != own_id {
                dependency_ids.insert(id);
            }
        }
    }

    // Merge with a manifest already on disk (hand-maintained entries,
    // dependencies from earlier runs).
    let existing_path = out_dir.join("content.xml");
    let edit_in_place = existing_path.exists();
    let mut existing_deps: Vec<(String, Option<String>, bool)> = Vec::new();
    if edit_in_place {
        match fs::read(&existing_path)
            .map_err(ForgeError::from)
            .and_then(|bytes| Document::parse_named(&bytes, "content.xml"))
        {
            Ok(doc) => {
                for child in doc.children(doc.root()) {
                    if doc.tag(*child) != "dependency" {
                        continue;
                    }
                    if let Some(id) = doc.attr(*child, "id") {
                        existing_deps.push((
                            id.to_ascii_lowercase(),
                            doc.attr(*child, "version").map(str::to_string),
                            doc.attr(*child, "optional") == Some("true"),
                        ));
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "existing content.xml unreadable, regenerating from scratch")
            }
        }
    }

    let mut doc = Document::new("content");
    let root = doc.root();
    doc.set_attr(root, "id", &own_id);
    doc.set_attr(root, "name", &name);
    doc.set_attr(root, "author", "x4forge");
    doc.set_attr(root, "version", &version);
    doc.set_attr(root, "date", &Utc::now().format("%Y-%m-%d").to_string());
    doc.set_attr(root, "save", "false");
    doc.set_attr(root, "sync", "false");
    doc.set_attr(root, "enabled", "true");

    for &lang in MANIFEST_LANGUAGE_IDS {
        let text = doc.create_element("text");
        doc.set_attr(text, "language", lang);
        doc.set_attr(
            text,
            "description",
            if lang == "44" { "Generated extension" } else { "" },
        );
        doc.append_child(root, text);
    }

    for (id, version, optional) in &existing_deps {
        dependency_ids.remove(id);
        let dep = doc.create_element("dependency");
        doc.set_attr(dep, "id", id);
        if let Some(version) = version {
            doc.set_attr(dep, "version", version);
        }
        if *optional {
            doc.set_attr(dep, "optional", "true");
        }
        doc.append_child(root, dep);
    }
    for id in &dependency_ids {
        let dep = doc.create_element("dependency");
        doc.set_attr(dep, "id", id);
        doc.append_child(root, dep);
    }

    let mut manifest = GameFile::from_generated_root("content.xml", doc);
    manifest.edit_in_place = edit_in_place;
    Ok(manifest)
}
