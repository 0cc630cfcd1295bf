//! XPath 1.0 subset used by the game's diff dialect.
//!
//! Supported: absolute (`/a/b`) and descendant (`//a`) location paths,
//! name and `*` node tests, positional predicates (`[2]`), attribute
//! presence (`[@id]`), attribute equality (`[@id='x']`), and nested
//! child-attribute equality (`[component/@ref='x']`). Paths are evaluated
//! against a virtual node *above* the document root, the way the game
//! engine does it, so `/jobs` selects a root element tagged `jobs` and the
//! root itself is addressable (and replaceable).

use super::{Document, NodeId};
use crate::error::{ForgeError, Result};

#[derive(Debug, Clone, PartialEq)]
enum Test {
    Name(String),
    Any,
}

#[derive(Debug, Clone, PartialEq)]
enum Pred {
    Index(usize),
    HasAttr(String),
    AttrEq {
        /// Child element steps leading to the attribute holder; empty for
        /// an attribute of the candidate itself.
        path: Vec<String>,
        name: String,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    descendant: bool,
    test: Test,
    preds: Vec<Pred>,
}

fn parse_error(expr: &str, message: impl Into<String>) -> ForgeError {
    ForgeError::Xml {
        path: expr.to_string(),
        message: message.into(),
    }
}

/// Split a location path into raw step strings, honouring quotes inside
/// predicates so `[@name='a/b']` stays one step.
fn split_steps(expr: &str) -> Result<Vec<(bool, String)>> {
    let mut rest = expr.trim();
    if let Some(stripped) = rest.strip_prefix("./") {
        rest = stripped;
    }

    let mut steps = Vec::new();
    let mut descendant = false;
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = rest.chars().peekable();
    let mut leading = true;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            current.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                current.push(c);
            }
            '/' => {
                if leading || !current.is_empty() {
                    if !current.is_empty() {
                        steps.push((descendant, std::mem::take(&mut current)));
                    }
                    descendant = false;
                }
                if chars.peek() == Some(&'/') {
                    chars.next();
                    descendant = true;
                }
            }
            other => current.push(other),
        }
        leading = false;
    }
    if quote.is_some() {
        return Err(parse_error(expr, "unterminated string literal"));
    }
    if !current.is_empty() {
        steps.push((descendant, current));
    }
    Ok(steps)
}

fn parse_predicate(expr: &str, raw: &str) -> Result<Pred> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(parse_error(expr, "empty predicate"));
    }
    if raw.chars().all(|c| c.is_ascii_digit()) {
        let index: usize = raw
            .parse()
            .map_err(|_| parse_error(expr, "bad positional index"))?;
        if index == 0 {
            return Err(parse_error(expr, "positional indexes are 1-based"));
        }
        return Ok(Pred::Index(index));
    }

    // Attribute tests: `@name`, `@name='v'`, `child/sub/@name='v'`.
    let (lhs, value) = match raw.find('=') {
        Some(eq) => {
            let value = raw[eq + 1..].trim();
            let unquoted = value
                .strip_prefix('\'')
                .and_then(|v| v.strip_suffix('\''))
                .or_else(|| value.strip_prefix('"').and_then(|v| v.strip_suffix('"')))
                .ok_or_else(|| parse_error(expr, "predicate value must be quoted"))?;
            (raw[..eq].trim(), Some(unquoted.to_string()))
        }
        None => (raw, None),
    };

    let (path_part, attr_name) = match lhs.rfind('@') {
        Some(at) => {
            let path_part = lhs[..at].trim_end_matches('/');
            (path_part, lhs[at + 1..].trim())
        }
        None => return Err(parse_error(expr, format!("unsupported predicate [{raw}]"))),
    };
    if attr_name.is_empty() {
        return Err(parse_error(expr, "missing attribute name in predicate"));
    }
    let path: Vec<String> = if path_part.is_empty() {
        Vec::new()
    } else {
        path_part.split('/').map(|s| s.trim().to_string()).collect()
    };

    match value {
        Some(value) => Ok(Pred::AttrEq {
            path,
            name: attr_name.to_string(),
            value,
        }),
        None => {
            if path.is_empty() {
                Ok(Pred::HasAttr(attr_name.to_string()))
            } else {
                Err(parse_error(expr, "nested attribute tests need a value"))
            }
        }
    }
}

fn parse_step(expr: &str, descendant: bool, raw: &str) -> Result<Step> {
    let bracket = raw.find('[').unwrap_or(raw.len());
    let name = raw[..bracket].trim();
    if name.is_empty() {
        return Err(parse_error(expr, "empty step name"));
    }
    let test = if name == "*" {
        Test::Any
    } else {
        Test::Name(name.to_string())
    };

    let mut preds = Vec::new();
    let mut rest = &raw[bracket..];
    while let Some(stripped) = rest.strip_prefix('[') {
        // Find the matching close bracket, skipping quoted stretches.
        let mut quote: Option<char> = None;
        let mut close = None;
        for (i, c) in stripped.char_indices() {
            match quote {
                Some(q) if c == q => quote = None,
                Some(_) => {}
                None => match c {
                    '\'' | '"' => quote = Some(c),
                    ']' => {
                        close = Some(i);
                        break;
                    }
                    _ => {}
                },
            }
        }
        let close = close.ok_or_else(|| parse_error(expr, "unterminated predicate"))?;
        preds.push(parse_predicate(expr, &stripped[..close])?);
        rest = &stripped[close + 1..];
    }
    if !rest.is_empty() {
        return Err(parse_error(expr, format!("trailing junk after step: {rest}")));
    }
    Ok(Step {
        descendant,
        test,
        preds,
    })
}

fn test_matches(doc: &Document, id: NodeId, test: &Test) -> bool {
    match test {
        Test::Any => true,
        Test::Name(name) => doc.tag(id) == name,
    }
}

fn pred_matches(doc: &Document, id: NodeId, pred: &Pred) -> bool {
    match pred {
        Pred::Index(_) => true, // handled list-wise
        Pred::HasAttr(name) => doc.attr(id, name).is_some(),
        Pred::AttrEq { path, name, value } => {
            let mut holders = vec![id];
            for segment in path {
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
                .iter()
                .any(|&holder| doc.attr(holder, name) == Some(value.as_str()))
        }
    }
}

/// Evaluate `expr` against `doc`, returning matches in document order.
pub fn evaluate(doc: &Document, expr: &str) -> Result<Vec<NodeId>> {
    let steps = split_steps(expr)?
        .into_iter()
        .map(|(descendant, raw)| parse_step(expr, descendant, &raw))
        .collect::<Result<Vec<_>>>()?;
    if steps.is_empty() {
        return Err(parse_error(expr, "empty location path"));
    }

    // `None` stands for the virtual super-root above the document root.
    let mut contexts: Vec<Option<NodeId>> = vec![None];
    for step in &steps {
        let mut next: Vec<Option<NodeId>> = Vec::new();
        for &ctx in &contexts {
            let mut candidates: Vec<NodeId> = if step.descendant {
                match ctx {
                    None => doc.descendants(doc.root()),
                    Some(node) => {
                        let mut all = doc.descendants(node);
                        all.remove(0);
                        all
                    }
                }
            } else {
                match ctx {
                    None => vec![doc.root()],
                    Some(node) => doc.children(node).to_vec(),
                }
            };

            candidates.retain(|&id| test_matches(doc, id, &step.test));
            for pred in &step.preds {
                match pred {
                    Pred::Index(index) => {
                        candidates = if *index <= candidates.len() {
                            vec![candidates[index - 1]]
                        } else {
                            Vec::new()
                        };
                    }
                    other => candidates.retain(|&id| pred_matches(doc, id, other)),
                }
            }
            next.extend(candidates.into_iter().map(Some));
        }
        // Descendant steps can reach the same node through nested contexts.
        let mut seen = std::collections::HashSet::new();
        next.retain(|ctx| seen.insert(*ctx));
        contexts = next;
    }

    Ok(contexts.into_iter().flatten().collect())
}
