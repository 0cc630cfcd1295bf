//! Extension enumeration and deterministic load-order resolution.

use std::collections::{BTreeMap, HashMap};
use std::fs;

use tracing::{debug, warn};

use crate::config::Config;
use crate::error::Result;
use crate::extension::manifest::{parse_manifest, ExtensionInfo};
use crate::xml::Document;

/// Enablement overrides from the user's `config.xml`. The file only lists
/// extensions whose state differs from the manifest default.
fn user_overrides(config: &Config) -> HashMap<String, bool> {
    let mut overrides = HashMap::new();
    let Some(path) = config.user_config_path() else {
        return overrides;
    };
    let Ok(bytes) = fs::read(&path) else {
        return overrides;
    };
    let Ok(doc) = Document::parse_named(&bytes, &path.to_string_lossy()) else {
        warn!(path = %path.display(), "unreadable user config.xml, ignoring");
        return overrides;
    };
    for id in doc.descendants(doc.root()) {
        if doc.tag(id) != "extension" {
            continue;
        }
        if let Some(ext_id) = doc.attr(id, "id") {
            overrides.insert(
                ext_id.to_ascii_lowercase(),
                doc.attr(id, "enabled") == Some("true"),
            );
        }
    }
    overrides
}

/// Enumerate every extension under the configured roots.
///
/// Whitelist/blacklist filtering happens on folder names before anything
/// else; enablement combines the manifest default with the user override.
/// Manifests that fail to parse disable their extension with a warning.
/// The returned list includes disabled extensions (callers filter) and is
/// sorted by folder name.
pub fn discover(config: &Config) -> Result<Vec<ExtensionInfo>> {
    let mut found: BTreeMap<String, ExtensionInfo> = BTreeMap::new();
    if config.ignore_extensions {
        return Ok(Vec::new());
    }

    let overrides = user_overrides(config);
    let output_folder = config.output_folder();

    for base in config.extension_roots() {
        let extensions_dir = base.join("extensions");
        let Ok(read_dir) = fs::read_dir(&extensions_dir) else {
            continue;
        };
        for entry in read_dir.flatten() {
            let folder_path = entry.path();
            if !folder_path.is_dir() {
                continue;
            }
            let folder = entry.file_name().to_string_lossy().to_ascii_lowercase();

            if let Some(whitelist) = &config.extension_whitelist {
                if !whitelist.contains(&folder) {
                    continue;
                }
            }
            if config.extension_blacklist.contains(&folder) {
                debug!(folder = %folder, "extension blacklisted");
                continue;
            }

            let manifest_path = folder_path.join("content.xml");
            let Ok(bytes) = fs::read(&manifest_path) else {
                continue;
            };
            let mut info = match Document::parse_named(&bytes, &manifest_path.to_string_lossy()) {
                Ok(doc) => parse_manifest(&doc, &folder, folder_path.clone()),
                Err(e) => {
                    warn!(
                        path = %manifest_path.display(),
                        error = %e,
                        "manifest parse failed, treating extension as disabled"
                    );
                    let mut info =
                        parse_manifest(&Document::new("content"), &folder, folder_path.clone());
                    info.enabled = false;
                    info
                }
            };

            info.is_output = folder_path == output_folder;
            if info.is_output && config.ignore_output_extension {
                continue;
            }
            if let Some(&user_enabled) = overrides.get(&info.id) {
                info.enabled = user_enabled;
            }

            // The user tree shadows the game tree for same-named folders.
            found.insert(info.folder.clone(), info);
        }
    }

    Ok(found.into_values().collect())
}

/// Order enabled extensions so every dependency precedes its dependent.
///
/// Repeated minimum-selection: schedule the extension whose dependencies
/// (hard and soft) are all satisfied, relaxing to hard-only when nothing
/// qualifies, and breaking a hard cycle at the smallest folder name with a
/// warning. Ties break on `(priority, folder)`, so the result is stable
/// across runs and platforms. `priorities` defaults to 0 per extension;
/// the checker passes -1/+1 to push one extension early or late.
///
/// Extensions with a missing hard dependency are dropped with a warning.
pub fn resolve_load_order(
    extensions: Vec<ExtensionInfo>,
    priorities: &HashMap<String, i32>,
) -> Vec<ExtensionInfo> {
    let mut pending: BTreeMap<String, ExtensionInfo> = BTreeMap::new();
    for ext in extensions.into_iter().filter(|e| e.enabled) {
        pending.insert(ext.id.clone(), ext);
    }

    // Unsatisfied hard dependencies disable the dependent. Repeat until
    // stable, since dropping one extension can orphan another.
    loop {
        let missing: Vec<String> = pending
            .values()
            .filter(|ext| {
                ext.hard_dependency_ids()
                    .iter()
                    .any(|dep| !pending.contains_key(*dep))
            })
            .map(|ext| ext.id.clone())
            .collect();
        if missing.is_empty() {
            break;
        }
        for id in missing {
            warn!(
                extension = %id,
                "disabling extension with missing hard dependency"
            );
            pending.remove(&id);
        }
    }

    // Soft dependencies on absent extensions are pre-satisfied.
    let mut satisfied: Vec<String> = Vec::new();
    for ext in pending.values() {
        for dep in ext.soft_dependency_ids() {
            if !pending.contains_key(dep) && !satisfied.iter().any(|s| s == dep) {
                satisfied.push(dep.to_string());
            }
        }
    }

    let mut ordered: Vec<ExtensionInfo> = Vec::new();
    while !pending.is_empty() {
        let ready = |ext: &ExtensionInfo, hard_only: bool| -> bool {
            let deps: Vec<&str> = if hard_only {
                ext.hard_dependency_ids()
            } else {
                ext.dependency_ids()
            };
            deps.iter().all(|dep| satisfied.iter().any(|s| s == dep))
        };

        let mut candidates: Vec<&ExtensionInfo> =
            pending.values().filter(|e| ready(e, false)).collect();
        if candidates.is_empty() {
            // Soft edges form a cycle; they are ordering hints only.
            candidates = pending.values().filter(|e| ready(e, true)).collect();
        }
        if candidates.is_empty() {
            // A hard cycle. Break it at the smallest folder name.
            let ids: Vec<String> = pending.keys().cloned().collect();
            warn!(?ids, "dependency cycle between extensions, breaking by folder name");
            candidates = pending.values().collect();
        }

        let pick = candidates
            .into_iter()
            .min_by_key(|ext| {
                (
                    *priorities.get(&ext.id).unwrap_or(&0),
                    ext.folder.clone(),
                )
            })
            .expect("candidates is never empty here")
            .id
            .clone();

        let ext = pending.remove(&pick).expect("picked from pending");
        satisfied.push(ext.id.clone());
        ordered.push(ext);
    }

    debug!(
        order = ?ordered.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(),
        "resolved extension load order"
    );
    ordered
}
