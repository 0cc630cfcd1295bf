//! Application of diff patch documents.
//!
//! The patch dialect is the add/remove/replace subset the game engine
//! understands. A patch document's root is `<diff>`; each child carries a
//! `sel` XPath. Attribute targets end in `/@name` (or use `type="@name"`
//! on `add`), text targets end in `/text()`, everything else addresses an
//! element. The game also accepts a legacy non-diff form whose root tag
//! matches the target's root; its children are appended.

use tracing::{debug, warn};

use crate::error::{ForgeError, Result};
use crate::xml::{Document, NodeId};

/// How to react when an operation fails.
///
/// Normal loads are [`Strict`](PatchMode::Strict): the first bad op aborts
/// with an error. The extension checker runs [`Soft`](PatchMode::Soft),
/// collecting every failure while still applying the ops that do work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchMode {
    Strict,
    Soft,
}

/// One failed operation: which op, its selector, and what went wrong.
#[derive(Debug, Clone)]
pub struct PatchOpError {
    pub op_index: usize,
    pub sel: String,
    pub message: String,
}

enum TargetKind {
    Node,
    Text,
    Attr(String),
}

/// Apply `patch` to `base` in place.
///
/// Returns the collected op failures (always empty in strict mode, which
/// errors out instead). `context` names the file/extension pair for
/// diagnostics.
pub fn apply_patch(
    base: &mut Document,
    patch: &Document,
    mode: PatchMode,
    context: &str,
) -> Result<Vec<PatchOpError>> {
    let mut errors: Vec<PatchOpError> = Vec::new();
    let mut fail = |op_index: usize, sel: &str, message: String| -> Result<()> {
        warn!(context, op_index, sel, %message, "patch op failed");
        match mode {
            PatchMode::Strict => Err(ForgeError::PatchApplyFailure {
                path: context.to_string(),
                op_index,
                sel: sel.to_string(),
                message,
            }),
            PatchMode::Soft => {
                errors.push(PatchOpError {
                    op_index,
                    sel: sel.to_string(),
                    message,
                });
                Ok(())
            }
        }
    };

    let patch_root = patch.root();
    if patch.tag(patch_root) != "diff" {
        // Legacy merge form: same root tag, children appended.
        if patch.tag(patch_root) != base.tag(base.root()) {
            fail(
                0,
                "",
                format!(
                    "root tags differ: {} vs {}",
                    base.tag(base.root()),
                    patch.tag(patch_root)
                ),
            )?;
            return Ok(errors);
        }
        for &child in patch.children(patch_root) {
            let copy = base.import(patch, child);
            let root = base.root();
            base.append_child(root, copy);
        }
        return Ok(errors);
    }

    for (op_index, &op) in patch.children(patch_root).iter().enumerate() {
        let op_tag = patch.tag(op).to_string();
        if !matches!(op_tag.as_str(), "add" | "remove" | "replace") {
            fail(op_index, "", format!("op type {op_tag} not recognized"))?;
            continue;
        }
        let Some(sel) = patch.attr(op, "sel").map(str::to_string) else {
            fail(op_index, "", "\"sel\" not found".to_string())?;
            continue;
        };

        // Classify the target and reduce the selector to pure node
        // selection.
        let mut xpath = sel.clone();
        let mut kind = TargetKind::Node;
        for suffix in ["/text()[1]", "/text()"] {
            if let Some(stripped) = xpath.strip_suffix(suffix) {
                kind = TargetKind::Text;
                xpath = stripped.to_string();
                break;
            }
        }
        match top_level_attr_split(&xpath) {
            Err(message) => {
                fail(op_index, &sel, message)?;
                continue;
            }
            Ok(Some((node_part, attr_name))) => {
                kind = TargetKind::Attr(attr_name);
                xpath = node_part;
            }
            Ok(None) => {}
        }
        if matches!(kind, TargetKind::Node) && op_tag == "add" {
            if let Some(type_attr) = patch.attr(op, "type") {
                kind = TargetKind::Attr(type_attr.trim_start_matches('@').to_string());
            }
        }

        // The engine silently drops namespaced attribute writes; mirror it.
        if let TargetKind::Attr(name) = &kind {
            if name.contains(':') {
                debug!(context, sel = %sel, "ignoring namespaced attribute op");
                continue;
            }
        }

        let matches = match base.find_all(&xpath) {
            Ok(matches) => matches,
            Err(e) => {
                fail(op_index, &sel, e.to_string())?;
                continue;
            }
        };
        if matches.is_empty() {
            fail(op_index, &sel, "no xpath match found".to_string())?;
            continue;
        }
        if matches.len() > 1 {
            fail(op_index, &sel, "multiple xpath matches found".to_string())?;
            continue;
        }
        let target = matches[0];

        if let Err(message) = apply_op(base, patch, op, &op_tag, target, &kind) {
            fail(op_index, &sel, message)?;
            continue;
        }
    }

    Ok(errors)
}

/// Split `path/@attr` into node path and attribute name, ignoring `/@`
/// sequences inside bracketed predicates (`[component/@ref='x']`).
/// Errors when more than one top-level `/@` is present.
fn top_level_attr_split(xpath: &str) -> std::result::Result<Option<(String, String)>, String> {
    let bytes = xpath.as_bytes();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut splits = Vec::new();
    for i in 0..bytes.len() {
        let c = bytes[i];
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                b'\'' | b'"' => quote = Some(c),
                b'[' => depth += 1,
                b']' => depth = depth.saturating_sub(1),
                b'/' if depth == 0 && bytes.get(i + 1) == Some(&b'@') => splits.push(i),
                _ => {}
            },
        }
    }
    match splits.len() {
        0 => Ok(None),
        1 => {
            let at = splits[0];
            Ok(Some((
                xpath[..at].to_string(),
                xpath[at + 2..].to_string(),
            )))
        }
        _ => Err("multiple \"/@\" in sel".to_string()),
    }
}

fn apply_op(
    base: &mut Document,
    patch: &Document,
    op: NodeId,
    op_tag: &str,
    target: NodeId,
    kind: &TargetKind,
) -> std::result::Result<(), String> {
    match kind {
        TargetKind::Text => match op_tag {
            "add" => Err("no handler for adding text".to_string()),
            "remove" => {
                base.set_text(target, None);
                Ok(())
            }
            "replace" => {
                base.set_text(target, patch.text(op).map(str::to_string));
                Ok(())
            }
            _ => unreachable!(),
        },
        TargetKind::Attr(name) => match op_tag {
            "add" | "replace" => {
                let Some(value) = patch.text(op) else {
                    return Err("empty text value".to_string());
                };
                base.set_attr(target, name, value);
                Ok(())
            }
            "remove" => {
                base.remove_attr(target, name);
                Ok(())
            }
            _ => unreachable!(),
        },
        TargetKind::Node => match op_tag {
            "add" => {
                let fragment: Vec<NodeId> = patch.children(op).to_vec();
                match patch.attr(op, "pos") {
                    None | Some("append") => {
                        for child in fragment {
                            let copy = base.import(patch, child);
                            base.append_child(target, copy);
                        }
                    }
                    Some("prepend") => {
                        for (i, child) in fragment.into_iter().enumerate() {
                            let copy = base.import(patch, child);
                            base.insert_child(target, i, copy);
                        }
                    }
                    Some("before") => {
                        let Some(parent) = base.parent(target) else {
                            return Err("cannot insert siblings at the root".to_string());
                        };
                        let position = base.position(target).unwrap_or(0);
                        for (i, child) in fragment.into_iter().enumerate() {
                            let copy = base.import(patch, child);
                            base.insert_child(parent, position + i, copy);
                        }
                    }
                    Some("after") => {
                        let Some(parent) = base.parent(target) else {
                            return Err("cannot insert siblings at the root".to_string());
                        };
                        let position = base.position(target).unwrap_or(0);
                        for (i, child) in fragment.into_iter().enumerate() {
                            let copy = base.import(patch, child);
                            base.insert_child(parent, position + 1 + i, copy);
                        }
                    }
                    Some(other) => return Err(format!("pos {other} not understood")),
                }
                Ok(())
            }
            "remove" => {
                if !base.remove_node(target) {
                    return Err("cannot remove the root element".to_string());
                }
                Ok(())
            }
            "replace" => {
                let fragment = patch.children(op);
                if fragment.len() != 1 {
                    return Err("0 or multiple children".to_string());
                }
                let copy = base.import(patch, fragment[0]);
                base.replace_node(target, copy);
                Ok(())
            }
            _ => unreachable!(),
        },
    }
}
