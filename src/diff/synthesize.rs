//! Synthesis of minimal diff patches from a base/modified tree pair.
//!
//! The approach leans on node identity: trees handed out by the VFS are
//! clones of the patched base, so their identity marks line up with the
//! snapshot they came from. Children are walked pairwise; a mismatch is
//! resolved by checking which side's node still exists in the other list
//! (insertion vs removal vs replacement). Foreign trees without shared
//! marks fall back to a stable key — tag plus identifying attributes — so
//! structurally corresponding nodes still pair up.
//!
//! Every emitted operation is applied to a working copy of the base
//! immediately, so XPaths generated for later operations select against the
//! already-patched document, the same way the game applies them. A final
//! verification pass applies the finished patch to a pristine base and
//! compares canonical bytes; on mismatch the synthesiser escalates to a
//! whole-root replacement.

use tracing::warn;

use crate::diff::apply::{apply_patch, PatchMode};
use crate::error::{ForgeError, Result};
use crate::xml::{Document, NodeId};

/// Attributes that identify an element among same-tag siblings. Partly
/// empirical; extend per-run through
/// [`DiffOptions::forced_attributes`].
pub const IDENTIFYING_ATTRIBUTES: [&str; 5] = ["id", "name", "macro", "ref", "sinfactor"];

/// Knobs for patch synthesis.
#[derive(Debug, Clone)]
pub struct DiffOptions {
    /// Emit a single whole-root `replace` instead of a minimal edit
    /// script. Debugging aid.
    pub maximal: bool,
    /// Apply the generated patch to a copy of the base and require the
    /// result to match the modified tree byte-for-byte.
    pub verify: bool,
    /// Extra identifying attributes for XPath generation. Entries may be
    /// nested (`component/@ref`).
    pub forced_attributes: Vec<String>,
}

impl Default for DiffOptions {
    fn default() -> Self {
        DiffOptions {
            maximal: false,
            verify: true,
            forced_attributes: Vec::new(),
        }
    }
}

/// Produce a `<diff>` document converting `base` into `modified`.
///
/// `label` names the file for diagnostics. Identical inputs produce a
/// patch with no operations.
pub fn make_patch(
    base: &Document,
    modified: &Document,
    opts: &DiffOptions,
    label: &str,
) -> Result<Document> {
    if opts.maximal || base.tag(base.root()) != modified.tag(modified.root()) {
        let patch = maximal_patch(base, modified);
        if opts.verify {
            verify_or_fail(base, modified, &patch, label)?;
        }
        return Ok(patch);
    }

    let mut session = Session {
        work: base.clone(),
        modified,
        patch: Document::new("diff"),
        idents: identifying_attributes(opts),
    };
    session.diff_nodes(session.work.root(), modified.root())?;
    let patch = session.patch;

    if opts.verify && !verifies(base, modified, &patch) {
        warn!(label, "generated patch failed verification, falling back to maximal diff");
        let patch = maximal_patch(base, modified);
        verify_or_fail(base, modified, &patch, label)?;
        return Ok(patch);
    }
    Ok(patch)
}

fn identifying_attributes(opts: &DiffOptions) -> Vec<String> {
    let mut idents: Vec<String> = IDENTIFYING_ATTRIBUTES
        .iter()
        .map(|s| s.to_string())
        .collect();
    for forced in &opts.forced_attributes {
        let forced = forced.trim();
        if !forced.is_empty() && !idents.iter().any(|i| i == forced) {
            idents.push(forced.to_string());
        }
    }
    idents
}

fn maximal_patch(base: &Document, modified: &Document) -> Document {
    let mut patch = Document::new("diff");
    let op = patch.create_element("replace");
    patch.set_attr(op, "sel", &format!("/{}", base.tag(base.root())));
    let fragment = patch.import(modified, modified.root());
    patch.append_child(op, fragment);
    let root = patch.root();
    patch.append_child(root, op);
    patch
}

fn verifies(base: &Document, modified: &Document, patch: &Document) -> bool {
    let mut check = base.clone();
    match apply_patch(&mut check, patch, PatchMode::Strict, "verify") {
        Ok(_) => check.to_bytes() == modified.to_bytes(),
        Err(_) => false,
    }
}

fn verify_or_fail(
    base: &Document,
    modified: &Document,
    patch: &Document,
    label: &str,
) -> Result<()> {
    if verifies(base, modified, patch) {
        Ok(())
    } else {
        Err(ForgeError::DiffSynthesisFailure(label.to_string()))
    }
}

struct Session<'a> {
    work: Document,
    modified: &'a Document,
    patch: Document,
    idents: Vec<String>,
}

impl Session<'_> {
    /// Inputs are assumed to correspond (same mark or same stable key);
    /// recursion only descends into corresponding pairs.
    fn diff_nodes(&mut self, wid: NodeId, mid: NodeId) -> Result<()> {
        // Attribute removals and changes.
        for (name, value) in self.work.attrs(wid).to_vec() {
            match self.modified.attr(mid, &name) {
                None => self.emit_attr(wid, "remove", &name, None)?,
                Some(new_value) if new_value != value => {
                    let new_value = new_value.to_string();
                    self.emit_attr(wid, "replace", &name, Some(&new_value))?;
                }
                Some(_) => {}
            }
        }
        // Attribute additions.
        for (name, value) in self.modified.attrs(mid).to_vec() {
            if self.work.attr(wid, &name).is_none() {
                self.emit_attr(wid, "add", &name, Some(&value))?;
            }
        }

        // Text changes.
        let work_text = self.work.text(wid).map(str::to_string);
        let mod_text = self.modified.text(mid).map(str::to_string);
        if work_text.is_some() && mod_text.is_none() {
            self.emit_text(wid, "remove", None)?;
        } else if work_text != mod_text {
            self.emit_text(wid, "replace", mod_text.as_deref())?;
        }

        // Child reconciliation. Each structural edit restarts the walk so
        // positions stay honest; once a pass is clean, recurse into the
        // corresponding pairs.
        loop {
            let work_kids = self.work.children(wid).to_vec();
            let mod_kids = self.modified.children(mid).to_vec();
            let mut pairs: Vec<(NodeId, NodeId)> = Vec::new();
            let mut changed = false;

            for i in 0..work_kids.len().max(mod_kids.len()) {
                match (work_kids.get(i).copied(), mod_kids.get(i).copied()) {
                    (None, Some(mc)) => {
                        self.emit_node_append(wid, mc)?;
                        changed = true;
                        break;
                    }
                    (Some(wc), None) => {
                        self.emit_node_remove(wc)?;
                        changed = true;
                        break;
                    }
                    (Some(wc), Some(mc)) => {
                        if self.same_node(wc, mc) {
                            pairs.push((wc, mc));
                            continue;
                        }
                        let mc_in_work = work_kids.iter().any(|&x| self.same_node(x, mc));
                        let wc_in_mod = mod_kids.iter().any(|&x| self.same_node(wc, x));
                        match (mc_in_work, wc_in_mod) {
                            (true, false) => self.emit_node_remove(wc)?,
                            (false, true) => self.emit_node_insert_before(wc, mc)?,
                            (false, false) => self.emit_node_replace(wc, mc)?,
                            // Reordered: there is no move op in the
                            // dialect, so drop the work-side node and let a
                            // later pass re-add it in place.
                            (true, true) => self.emit_node_remove(wc)?,
                        }
                        changed = true;
                        break;
                    }
                    (None, None) => unreachable!(),
                }
            }

            if changed {
                continue;
            }
            for (wc, mc) in pairs {
                self.diff_nodes(wc, mc)?;
            }
            return Ok(());
        }
    }

    fn same_node(&self, wid: NodeId, mid: NodeId) -> bool {
        if self.work.mark(wid) == self.modified.mark(mid) {
            return true;
        }
        if self.work.tag(wid) != self.modified.tag(mid) {
            return false;
        }
        // Stable key: every simple identifying attribute must agree
        // (absent on both counts as agreement).
        for ident in &self.idents {
            if ident.contains('/') {
                continue;
            }
            if self.work.attr(wid, ident) != self.modified.attr(mid, ident) {
                return false;
            }
        }
        true
    }

    fn new_op(&mut self, op: &str, sel: &str) -> NodeId {
        let node = self.patch.create_element(op);
        self.patch.set_attr(node, "sel", sel);
        let root = self.patch.root();
        self.patch.append_child(root, node);
        node
    }

    fn emit_attr(&mut self, wid: NodeId, op: &str, name: &str, value: Option<&str>) -> Result<()> {
        let xpath = self.xpath_for(wid);
        let op_node = match op {
            "add" => {
                let node = self.new_op("add", &xpath);
                self.patch.set_attr(node, "type", &format!("@{name}"));
                node
            }
            _ => self.new_op(op, &format!("{xpath}/@{name}")),
        };
        if let Some(value) = value {
            self.patch.set_text(op_node, Some(value.to_string()));
            self.work.set_attr(wid, name, value);
        } else {
            self.work.remove_attr(wid, name);
        }
        Ok(())
    }

    fn emit_text(&mut self, wid: NodeId, op: &str, value: Option<&str>) -> Result<()> {
        let xpath = self.xpath_for(wid);
        let op_node = self.new_op(op, &format!("{xpath}/text()[1]"));
        if let Some(value) = value {
            self.patch.set_text(op_node, Some(value.to_string()));
        }
        self.work.set_text(wid, value.map(str::to_string));
        Ok(())
    }

    fn emit_node_append(&mut self, parent: NodeId, mc: NodeId) -> Result<()> {
        let xpath = self.xpath_for(parent);
        let op_node = self.new_op("add", &xpath);
        let fragment = self.patch.import(self.modified, mc);
        self.patch.append_child(op_node, fragment);

        let copy = self.work.import(self.modified, mc);
        self.work.append_child(parent, copy);
        Ok(())
    }

    fn emit_node_insert_before(&mut self, wc: NodeId, mc: NodeId) -> Result<()> {
        let xpath = self.xpath_for(wc);
        let op_node = self.new_op("add", &xpath);
        self.patch.set_attr(op_node, "pos", "before");
        let fragment = self.patch.import(self.modified, mc);
        self.patch.append_child(op_node, fragment);

        let parent = self
            .work
            .parent(wc)
            .expect("insert target must be attached");
        let position = self.work.position(wc).unwrap_or(0);
        let copy = self.work.import(self.modified, mc);
        self.work.insert_child(parent, position, copy);
        Ok(())
    }

    fn emit_node_remove(&mut self, wc: NodeId) -> Result<()> {
        let xpath = self.xpath_for(wc);
        self.new_op("remove", &xpath);
        self.work.remove_node(wc);
        Ok(())
    }

    fn emit_node_replace(&mut self, wc: NodeId, mc: NodeId) -> Result<()> {
        let xpath = self.xpath_for(wc);
        let op_node = self.new_op("replace", &xpath);
        let fragment = self.patch.import(self.modified, mc);
        self.patch.append_child(op_node, fragment);

        let copy = self.work.import(self.modified, mc);
        self.work.replace_node(wc, copy);
        Ok(())
    }

    /// Shortest XPath that selects `id` uniquely in the work tree:
    /// per-level steps, attribute predicates before positional indexes.
    fn xpath_for(&self, id: NodeId) -> String {
        let Some(parent) = self.work.parent(id) else {
            return format!("/{}", self.work.tag(id));
        };
        let prefix = self.xpath_for(parent);
        format!("{prefix}/{}", self.step_for(id, parent))
    }

    fn step_for(&self, id: NodeId, parent: NodeId) -> String {
        let doc = &self.work;
        let tag = doc.tag(id);
        let same_tag: Vec<NodeId> = doc
            .children(parent)
            .iter()
            .copied()
            .filter(|&c| doc.tag(c) == tag)
            .collect();
        if same_tag.len() == 1 {
            return tag.to_string();
        }

        // Try attribute predicates, identifying attributes first.
        let mut predicates: Vec<(String, String)> = Vec::new();
        let mut candidates = same_tag.clone();
        let mut attr_order: Vec<String> = Vec::new();
        for ident in &self.idents {
            attr_order.push(ident.clone());
        }
        for (name, _) in doc.attrs(id) {
            if !attr_order.iter().any(|a| a == name) {
                attr_order.push(name.clone());
            }
        }

        for name in &attr_order {
            let Some(value) = self.lookup_attr(id, name) else {
                continue;
            };
            if quote_for(&value).is_none() {
                continue;
            }
            predicates.push((name.clone(), value.clone()));
            candidates.retain(|&c| self.lookup_attr(c, name).as_deref() == Some(value.as_str()));
            if candidates.len() == 1 {
                let mut step = tag.to_string();
                for (name, value) in &predicates {
                    let quote = quote_for(value).unwrap_or('\'');
                    step.push_str(&format!("[{}={quote}{value}{quote}]", pred_lhs(name)));
                }
                return step;
            }
        }

        // Attributes cannot disambiguate; fall back to a bare positional
        // index among same-tag siblings.
        let index = same_tag.iter().position(|&c| c == id).unwrap_or(0) + 1;
        format!("{tag}[{index}]")
    }

    /// Resolve a simple or nested (`child/@attr`) identifying attribute on
    /// a work-tree node.
    fn lookup_attr(&self, id: NodeId, name: &str) -> Option<String> {
        let doc = &self.work;
        match name.rsplit_once("/@") {
            None => doc.attr(id, name).map(str::to_string),
            Some((path, attr)) => {
                let mut holders = vec![id];
                for segment in path.split('/') {
                    let mut next = Vec::new();
                    for holder in holders {
                        for &child in doc.children(holder) {
                            if doc.tag(child) == segment {
                                next.push(child);
                            }
                        }
                    }
                    holders = next;
                }
                holders
                    .into_iter()
                    .find_map(|holder| doc.attr(holder, attr).map(str::to_string))
            }
        }
    }
}

fn pred_lhs(name: &str) -> String {
    match name.rsplit_once("/@") {
        None => format!("@{name}"),
        Some((path, attr)) => format!("{path}/@{attr}"),
    }
}

/// Pick a quote character a predicate value can be wrapped in; `None` when
/// the value mixes both quote kinds and cannot be expressed.
fn quote_for(value: &str) -> Option<char> {
    let has_single = value.contains('\'');
    let has_double = value.contains('"');
    match (has_single, has_double) {
        (false, _) => Some('\''),
        (true, false) => Some('"'),
        (true, true) => None,
    }
}
