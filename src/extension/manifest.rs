//! `content.xml` manifest parsing.
//!
//! The reader is deliberately lenient: third-party manifests are messy.
//! A missing `id` falls back to the folder name, `enabled` accepts both
//! `true` and `1`, and the display name may come from a `<text
//! language="44">` node instead of the root attribute.

use std::path::PathBuf;

use crate::xml::Document;

/// One `<dependency>` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Target extension id, lowercased.
    pub id: String,
    pub version: Option<String>,
    pub optional: bool,
}

/// Everything known about a discovered extension. Built once during
/// discovery and immutable afterwards.
#[derive(Debug, Clone)]
pub struct ExtensionInfo {
    /// Manifest id, lowercased; falls back to the folder name.
    pub id: String,
    /// On-disk folder name, lowercased. Load-order ties break on this.
    pub folder: String,
    /// Human-readable display name.
    pub name: String,
    /// Version string in the game's form (integer or dotted), verbatim.
    pub version: String,
    /// The manifest's `save` attribute: claims save-game compatibility.
    pub save_compatible: bool,
    /// Resolved enablement (manifest default plus user override).
    pub enabled: bool,
    pub dependencies: Vec<Dependency>,
    /// Extension root folder on disk.
    pub root: PathBuf,
    /// True when this is the tool's own output extension.
    pub is_output: bool,
}

impl ExtensionInfo {
    pub fn hard_dependency_ids(&self) -> Vec<&str> {
        self.dependencies
            .iter()
            .filter(|d| !d.optional)
            .map(|d| d.id.as_str())
            .collect()
    }

    pub fn soft_dependency_ids(&self) -> Vec<&str> {
        self.dependencies
            .iter()
            .filter(|d| d.optional)
            .map(|d| d.id.as_str())
            .collect()
    }

    pub fn dependency_ids(&self) -> Vec<&str> {
        self.dependencies
            .iter()
            .map(|d| d.id.as_str())
            .collect()
    }
}

fn parse_bool(value: Option<&str>, default: bool) -> bool {
    match value {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "true" | "1"),
        None => default,
    }
}

/// Build an [`ExtensionInfo`] from a parsed `content.xml`. `folder` is the
/// extension's directory name, `root` its path.
pub fn parse_manifest(doc: &Document, folder: &str, root: PathBuf) -> ExtensionInfo {
    let content = doc.root();
    let folder = folder.to_ascii_lowercase();

    let id = doc
        .attr(content, "id")
        .map(|s| s.to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| folder.clone());

    // The display name may sit on a language text node instead of the
    // root; English (44) wins when present.
    let name = doc
        .children(content)
        .iter()
        .find(|&&c| doc.tag(c) == "text" && doc.attr(c, "language") == Some("44"))
        .and_then(|&c| doc.attr(c, "name"))
        .or_else(|| doc.attr(content, "name"))
        .unwrap_or(&id)
        .to_string();

    let version = doc.attr(content, "version").unwrap_or("1").to_string();
    let save_compatible = parse_bool(doc.attr(content, "save"), false);
    let enabled = parse_bool(doc.attr(content, "enabled"), true);

    let dependencies = doc
        .children(content)
        .iter()
        .filter(|&&c| doc.tag(c) == "dependency")
        .filter_map(|&c| {
            let id = doc.attr(c, "id")?;
            Some(Dependency {
                id: id.to_ascii_lowercase(),
                version: doc.attr(c, "version").map(str::to_string),
                optional: parse_bool(doc.attr(c, "optional"), false),
            })
        })
        .collect();

    ExtensionInfo {
        id,
        folder,
        name,
        version,
        save_compatible,
        enabled,
        dependencies,
        root,
        is_output: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str, folder: &str) -> ExtensionInfo {
        let doc = Document::parse(text.as_bytes()).unwrap();
        parse_manifest(&doc, folder, PathBuf::from("/x"))
    }

    #[test]
    fn test_full_manifest() {
        let info = parse(
            r#"<content id="Mod_A" name="Mod A" version="312" save="true" enabled="true">
                 <dependency id="Mod_B" version="100"/>
                 <dependency id="Mod_C" optional="true"/>
               </content>"#,
            "mod_a_folder",
        );
        assert_eq!(info.id, "mod_a");
        assert_eq!(info.folder, "mod_a_folder");
        assert_eq!(info.name, "Mod A");
        assert_eq!(info.version, "312");
        assert!(info.save_compatible);
        assert!(info.enabled);
        assert_eq!(info.hard_dependency_ids(), vec!["mod_b"]);
        assert_eq!(info.soft_dependency_ids(), vec!["mod_c"]);
    }

    #[test]
    fn test_missing_id_falls_back_to_folder() {
        let info = parse(r#"<content name="Anon"/>"#, "Some_Folder");
        assert_eq!(info.id, "some_folder");
    }

    #[test]
    fn test_enabled_accepts_one() {
        let info = parse(r#"<content id="a" enabled="1"/>"#, "a");
        assert!(info.enabled);
        let info = parse(r#"<content id="a" enabled="false"/>"#, "a");
        assert!(!info.enabled);
        let info = parse(r#"<content id="a"/>"#, "a");
        assert!(info.enabled);
    }

    #[test]
    fn test_language_text_name_wins() {
        let info = parse(
            r#"<content id="a" name="fallback">
                 <text language="7" name="nyet"/>
                 <text language="44" name="English Name"/>
               </content>"#,
            "a",
        );
        assert_eq!(info.name, "English Name");
    }
}
