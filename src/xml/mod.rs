//! Mutable XML document tree.
//!
//! The diff engine needs three things no off-the-shelf read-only DOM gives
//! us: in-place mutation, parent links without ownership cycles, and node
//! identity that survives cloning a tree, editing the clone, and handing it
//! back. Nodes therefore live in an arena `Vec` inside [`Document`], refer
//! to each other by [`NodeId`], and carry a session-unique `mark` assigned
//! from a process-wide counter. Cloning a `Document` clones the arena, so
//! marks (and `NodeId`s) are preserved; correlating a returned tree against
//! the snapshot it was cloned from is a mark comparison, not a structural
//! guess.
//!
//! Parsing and escaping go through `quick-xml`; serialisation is a small
//! canonical pretty-printer whose byte output doubles as the equality form
//! used by diff verification. Comments, processing instructions and
//! whitespace-only text are dropped at parse time; element text follows the
//! ElementTree model (one text slot per element).

pub mod xpath;

use std::sync::atomic::{AtomicU64, Ordering};

use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{ForgeError, Result};

static NEXT_MARK: AtomicU64 = AtomicU64::new(1);

fn next_mark() -> u64 {
    NEXT_MARK.fetch_add(1, Ordering::Relaxed)
}

/// Index of a node inside its owning [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

#[derive(Debug, Clone)]
struct NodeData {
    tag: String,
    attrs: Vec<(String, String)>,
    text: Option<String>,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
    mark: u64,
}

/// One XML document: an element arena plus the root id.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<NodeData>,
    root: NodeId,
}

impl Document {
    /// Create a document holding a single empty root element.
    pub fn new(root_tag: &str) -> Self {
        let root = NodeData {
            tag: root_tag.to_string(),
            attrs: Vec::new(),
            text: None,
            children: Vec::new(),
            parent: None,
            mark: next_mark(),
        };
        Document {
            nodes: vec![root],
            root: NodeId(0),
        }
    }

    /// Parse a document from raw bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        Self::parse_named(bytes, "<memory>")
    }

    /// Parse a document, attributing errors to `name`.
    pub fn parse_named(bytes: &[u8], name: &str) -> Result<Self> {
        let xml_err = |message: String| ForgeError::Xml {
            path: name.to_string(),
            message,
        };

        let mut reader = Reader::from_reader(bytes);
        let mut buf = Vec::new();

        let mut nodes: Vec<NodeData> = Vec::new();
        let mut stack: Vec<NodeId> = Vec::new();
        let mut root: Option<NodeId> = None;

        fn open_element(
            e: &quick_xml::events::BytesStart<'_>,
            nodes: &mut Vec<NodeData>,
            stack: &[NodeId],
            root: &mut Option<NodeId>,
        ) -> std::result::Result<NodeId, String> {
            let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
            let mut attrs = Vec::new();
            for attr in e.attributes() {
                let attr = attr.map_err(|e| e.to_string())?;
                let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                let value = attr.unescape_value().map_err(|e| e.to_string())?.into_owned();
                attrs.push((key, value));
            }

            let id = NodeId(nodes.len() as u32);
            nodes.push(NodeData {
                tag,
                attrs,
                text: None,
                children: Vec::new(),
                parent: stack.last().copied(),
                mark: next_mark(),
            });
            match stack.last() {
                Some(&parent) => nodes[parent.0 as usize].children.push(id),
                None => {
                    if root.is_some() {
                        return Err("multiple root elements".to_string());
                    }
                    *root = Some(id);
                }
            }
            Ok(id)
        }

        fn append_text(nodes: &mut [NodeData], stack: &[NodeId], text: &str) {
            if let Some(&current) = stack.last() {
                let slot = &mut nodes[current.0 as usize].text;
                match slot {
                    Some(existing) => existing.push_str(text),
                    None => *slot = Some(text.to_string()),
                }
            }
        }

        loop {
            let event = reader
                .read_event_into(&mut buf)
                .map_err(|e| xml_err(e.to_string()))?;
            match event {
                Event::Start(e) => {
                    let id = open_element(&e, &mut nodes, &stack, &mut root).map_err(xml_err)?;
                    stack.push(id);
                }
                Event::Empty(e) => {
                    open_element(&e, &mut nodes, &stack, &mut root).map_err(xml_err)?;
                }
                Event::End(_) => {
                    stack.pop();
                }
                Event::Text(t) => {
                    let text = t.unescape().map_err(|e| xml_err(e.to_string()))?;
                    let trimmed = text.trim();
                    if !trimmed.is_empty() {
                        append_text(&mut nodes, &stack, trimmed);
                    }
                }
                Event::CData(t) => {
                    let text = String::from_utf8_lossy(&t.into_inner()).into_owned();
                    append_text(&mut nodes, &stack, &text);
                }
                Event::Eof => break,
                // Comments, declarations, PIs and doctypes carry nothing the
                // patch dialect can address.
                _ => {}
            }
            buf.clear();
        }

        match root {
            Some(root) => Ok(Document { nodes, root }),
            None => Err(xml_err("no root element".to_string())),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    fn node(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.0 as usize]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut NodeData {
        &mut self.nodes[id.0 as usize]
    }

    pub fn tag(&self, id: NodeId) -> &str {
        &self.node(id).tag
    }

    /// Session-unique identity mark, preserved across `clone()`.
    pub fn mark(&self, id: NodeId) -> u64 {
        self.node(id).mark
    }

    pub fn attrs(&self, id: NodeId) -> &[(String, String)] {
        &self.node(id).attrs
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.node(id)
            .attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        let node = self.node_mut(id);
        match node.attrs.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value.to_string(),
            None => node.attrs.push((name.to_string(), value.to_string())),
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> bool {
        let node = self.node_mut(id);
        let before = node.attrs.len();
        node.attrs.retain(|(k, _)| k != name);
        node.attrs.len() != before
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        self.node(id).text.as_deref()
    }

    pub fn set_text(&mut self, id: NodeId, text: Option<String>) {
        self.node_mut(id).text = text;
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    /// Position of `id` among its parent's children, if attached.
    pub fn position(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.children(parent).iter().position(|&c| c == id)
    }

    /// Create a detached element with a fresh identity mark.
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(NodeData {
            tag: tag.to_string(),
            attrs: Vec::new(),
            text: None,
            children: Vec::new(),
            parent: None,
            mark: next_mark(),
        });
        id
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.node_mut(child).parent = Some(parent);
        self.node_mut(parent).children.push(child);
    }

    pub fn insert_child(&mut self, parent: NodeId, index: usize, child: NodeId) {
        self.node_mut(child).parent = Some(parent);
        let children = &mut self.node_mut(parent).children;
        let index = index.min(children.len());
        children.insert(index, child);
    }

    /// Detach a node from its parent. The root cannot be detached.
    pub fn remove_node(&mut self, id: NodeId) -> bool {
        let Some(parent) = self.parent(id) else {
            return false;
        };
        self.node_mut(parent).children.retain(|&c| c != id);
        self.node_mut(id).parent = None;
        true
    }

    /// Swap `old` for `new` in place, including the root slot.
    pub fn replace_node(&mut self, old: NodeId, new: NodeId) {
        match self.parent(old) {
            Some(parent) => {
                let position = self
                    .children(parent)
                    .iter()
                    .position(|&c| c == old)
                    .unwrap_or(0);
                self.node_mut(parent).children[position] = new;
                self.node_mut(new).parent = Some(parent);
                self.node_mut(old).parent = None;
            }
            None => {
                self.node_mut(new).parent = None;
                self.root = new;
            }
        }
    }

    /// Deep-copy a subtree from another document into this one, preserving
    /// identity marks. Returns the id of the detached copy.
    pub fn import(&mut self, other: &Document, other_id: NodeId) -> NodeId {
        let src = other.node(other_id);
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(NodeData {
            tag: src.tag.clone(),
            attrs: src.attrs.clone(),
            text: src.text.clone(),
            children: Vec::new(),
            parent: None,
            mark: src.mark,
        });
        for &child in other.children(other_id) {
            let copy = self.import(other, child);
            self.append_child(id, copy);
        }
        id
    }

    /// All element ids in the subtree under `id`, document order, `id` first.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            for &child in self.children(current).iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// Evaluate an XPath-subset expression against this document.
    pub fn find_all(&self, path: &str) -> Result<Vec<NodeId>> {
        xpath::evaluate(self, path)
    }

    /// Canonical serialised form: XML declaration plus two-space-indented
    /// pretty print. Byte equality of this output is the tree-equality
    /// definition used by diff verification.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
        self.write_node(self.root, 0, &mut out);
        out.into_bytes()
    }

    /// Pretty print a single subtree without the declaration.
    pub fn subtree_string(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_node(id, 0, &mut out);
        out
    }

    fn write_node(&self, id: NodeId, depth: usize, out: &mut String) {
        let node = self.node(id);
        for _ in 0..depth {
            out.push_str("  ");
        }
        out.push('<');
        out.push_str(&node.tag);
        for (key, value) in &node.attrs {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&escape(value.as_str()));
            out.push('"');
        }

        match (&node.text, node.children.is_empty()) {
            (None, true) => out.push_str("/>\n"),
            (Some(text), true) => {
                out.push('>');
                out.push_str(&escape(text.as_str()));
                out.push_str("</");
                out.push_str(&node.tag);
                out.push_str(">\n");
            }
            (text, false) => {
                out.push_str(">\n");
                if let Some(text) = text {
                    for _ in 0..=depth {
                        out.push_str("  ");
                    }
                    out.push_str(&escape(text.as_str()));
                    out.push('\n');
                }
                for &child in &node.children {
                    self.write_node(child, depth + 1, out);
                }
                for _ in 0..depth {
                    out.push_str("  ");
                }
                out.push_str("</");
                out.push_str(&node.tag);
                out.push_str(">\n");
            }
        }
    }
}

/// Cheap peek at the root tag of an XML byte stream, without building a
/// tree. Returns `None` when the bytes do not scan as XML.
pub fn root_tag_of(bytes: &[u8]) -> Option<String> {
    let mut reader = Reader::from_reader(bytes);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                return Some(String::from_utf8_lossy(e.name().as_ref()).into_owned());
            }
            Ok(Event::Eof) | Err(_) => return None,
            Ok(_) => {}
        }
        buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_print_roundtrip() {
        let doc = Document::parse(b"<jobs><job id=\"a\" quota=\"10\"/></jobs>").unwrap();
        let root = doc.root();
        assert_eq!(doc.tag(root), "jobs");
        assert_eq!(doc.children(root).len(), 1);
        let job = doc.children(root)[0];
        assert_eq!(doc.attr(job, "id"), Some("a"));
        assert_eq!(doc.attr(job, "quota"), Some("10"));

        let printed = String::from_utf8(doc.to_bytes()).unwrap();
        let reparsed = Document::parse(printed.as_bytes()).unwrap();
        assert_eq!(reparsed.to_bytes(), doc.to_bytes());
    }

    #[test]
    fn test_text_and_escaping() {
        let doc = Document::parse(b"<t><entry>a &lt; b</entry></t>").unwrap();
        let entry = doc.children(doc.root())[0];
        assert_eq!(doc.text(entry), Some("a < b"));
        let printed = String::from_utf8(doc.to_bytes()).unwrap();
        assert!(printed.contains("a &lt; b"));
    }

    #[test]
    fn test_whitespace_and_comments_dropped() {
        let doc = Document::parse(b"<r>\n  <!-- note -->\n  <a/>\n</r>").unwrap();
        assert_eq!(doc.children(doc.root()).len(), 1);
        assert_eq!(doc.text(doc.root()), None);
    }

    #[test]
    fn test_clone_preserves_marks() {
        let doc = Document::parse(b"<r><a/><b/></r>").unwrap();
        let clone = doc.clone();
        for (&a, &b) in doc
            .children(doc.root())
            .iter()
            .zip(clone.children(clone.root()))
        {
            assert_eq!(doc.mark(a), clone.mark(b));
        }
    }

    #[test]
    fn test_import_preserves_marks() {
        let src = Document::parse(b"<r><a id=\"1\"><c/></a></r>").unwrap();
        let a = src.children(src.root())[0];
        let mut dst = Document::new("diff");
        let copy = dst.import(&src, a);
        assert_eq!(dst.mark(copy), src.mark(a));
        assert_eq!(dst.children(copy).len(), 1);
        assert_eq!(dst.attr(copy, "id"), Some("1"));
    }

    #[test]
    fn test_mutation() {
        let mut doc = Document::parse(b"<r><a/></r>").unwrap();
        let a = doc.children(doc.root())[0];
        doc.set_attr(a, "v", "1");
        assert_eq!(doc.attr(a, "v"), Some("1"));
        doc.set_attr(a, "v", "2");
        assert_eq!(doc.attr(a, "v"), Some("2"));
        assert!(doc.remove_attr(a, "v"));
        assert!(!doc.remove_attr(a, "v"));

        let b = doc.create_element("b");
        doc.insert_child(doc.root(), 0, b);
        assert_eq!(doc.tag(doc.children(doc.root())[0]), "b");
        assert!(doc.remove_node(a));
        assert_eq!(doc.children(doc.root()).len(), 1);
    }

    #[test]
    fn test_replace_root() {
        let mut doc = Document::parse(b"<old/>").unwrap();
        let new_root = doc.create_element("new");
        let old = doc.root();
        doc.replace_node(old, new_root);
        assert_eq!(doc.tag(doc.root()), "new");
    }

    #[test]
    fn test_root_tag_peek() {
        assert_eq!(
            root_tag_of(b"<?xml version=\"1.0\"?>\n<diff><add/></diff>"),
            Some("diff".to_string())
        );
        assert_eq!(root_tag_of(b"not xml at all"), None);
    }

    #[test]
    fn test_empty_input_is_an_error() {
        assert!(Document::parse(b"").is_err());
    }
}
