//! Brace placeholder templates.
//!
//! - `{name}` / `{client.name}` substitutes a value, missing values render empty
//! - `{#items}...{/items}` loops over arrays; objects and truthy scalars render once
//! - `{^items}...{/items}` renders only when the value is falsy or an empty array
//! - `{.}` is the current loop element
//!
//! Lookups search the innermost loop scope first, then the enclosing ones.
//! Braces that do not form a valid tag are literal text.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("section '{0}' is never closed")]
    Unclosed(String),

    #[error("closing tag '{{/{0}}}' has no matching opening tag")]
    UnexpectedClose(String),

    #[error("expected '{{/{expected}}}' but found '{{/{found}}}'")]
    Mismatched { expected: String, found: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Var(String),
    Section { name: String, inverted: bool, children: Vec<Node> },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum TagKind {
    Var,
    Open,
    Inverted,
    Close,
}

/// A tag found in the source: byte range and parsed parts
#[derive(Debug, Clone, PartialEq)]
pub struct Tag<'a> {
    pub start: usize,
    pub end: usize,
    pub name: &'a str,
    kind: TagKind,
}

impl Tag<'_> {
    pub fn is_open(&self) -> bool {
        matches!(self.kind, TagKind::Open | TagKind::Inverted)
    }

    pub fn is_close(&self) -> bool {
        self.kind == TagKind::Close
    }
}

fn is_name(name: &str) -> bool {
    name == "." || (!name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.'))
}

/// Finds the next well-formed tag at or after `from`
pub fn next_tag(src: &str, from: usize) -> Option<Tag<'_>> {
    let mut offset = from;
    while let Some(rel) = src[offset..].find('{') {
        let start = offset + rel;
        let Some(len) = src[start + 1..].find(|c| c == '}' || c == '{') else {
            return None;
        };
        let inner_end = start + 1 + len;
        if src[inner_end..].starts_with('{') {
            offset = inner_end;
            continue;
        }
        let inner = src[start + 1..inner_end].trim();
        let (kind, name) = match inner.chars().next() {
            Some('#') => (TagKind::Open, inner[1..].trim()),
            Some('^') => (TagKind::Inverted, inner[1..].trim()),
            Some('/') => (TagKind::Close, inner[1..].trim()),
            _ => (TagKind::Var, inner),
        };
        if is_name(name) {
            return Some(Tag { start, end: inner_end + 1, name, kind });
        }
        offset = start + 1;
    }
    None
}

pub fn parse(src: &str) -> Result<Vec<Node>, TemplateError> {
    let mut root: Vec<Node> = Vec::new();
    // open sections: (name, inverted, children collected so far)
    let mut stack: Vec<(String, bool, Vec<Node>)> = Vec::new();
    let mut pos = 0;

    while let Some(tag) = next_tag(src, pos) {
        let current = match stack.last_mut() {
            Some(frame) => &mut frame.2,
            None => &mut root,
        };
        if tag.start > pos {
            current.push(Node::Text(src[pos..tag.start].to_string()));
        }
        match tag.kind {
            TagKind::Var => current.push(Node::Var(tag.name.to_string())),
            TagKind::Open | TagKind::Inverted => {
                stack.push((tag.name.to_string(), tag.kind == TagKind::Inverted, Vec::new()));
            }
            TagKind::Close => {
                let Some((name, inverted, children)) = stack.pop() else {
                    return Err(TemplateError::UnexpectedClose(tag.name.to_string()));
                };
                if name != tag.name {
                    return Err(TemplateError::Mismatched { expected: name, found: tag.name.to_string() });
                }
                let section = Node::Section { name, inverted, children };
                match stack.last_mut() {
                    Some(frame) => frame.2.push(section),
                    None => root.push(section),
                }
            }
        }
        pos = tag.end;
    }

    if let Some((name, _, _)) = stack.pop() {
        return Err(TemplateError::Unclosed(name));
    }
    if pos < src.len() {
        root.push(Node::Text(src[pos..].to_string()));
    }
    Ok(root)
}

fn lookup<'v>(scopes: &[&'v Value], name: &str) -> Option<&'v Value> {
    if name == "." {
        return scopes.last().copied();
    }
    let mut parts = name.split('.');
    let first = parts.next()?;
    let mut value = scopes.iter().rev().find_map(|scope| scope.get(first))?;
    for part in parts {
        value = value.get(part)?;
    }
    Some(value)
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(_) => true,
    }
}

pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items.iter().map(value_to_text).filter(|s| !s.is_empty()).collect::<Vec<_>>().join(", "),
        Value::Object(_) => String::new(),
    }
}

fn render_nodes<'v>(nodes: &[Node], scopes: &mut Vec<&'v Value>, escape: &dyn Fn(&str) -> String, out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Var(name) => {
                if let Some(value) = lookup(scopes, name) {
                    out.push_str(&escape(&value_to_text(value)));
                }
            }
            Node::Section { name, inverted: true, children } => {
                if !is_truthy(lookup(scopes, name)) {
                    render_nodes(children, scopes, escape, out);
                }
            }
            Node::Section { name, inverted: false, children } => match lookup(scopes, name) {
                Some(Value::Array(items)) => {
                    for item in items {
                        scopes.push(item);
                        render_nodes(children, scopes, escape, out);
                        scopes.pop();
                    }
                }
                Some(value) if value.is_object() => {
                    scopes.push(value);
                    render_nodes(children, scopes, escape, out);
                    scopes.pop();
                }
                value if is_truthy(value) => render_nodes(children, scopes, escape, out),
                _ => {}
            },
        }
    }
}

pub fn render(nodes: &[Node], data: &Value, escape: &dyn Fn(&str) -> String) -> String {
    let mut out = String::new();
    let mut scopes = vec![data];
    render_nodes(nodes, &mut scopes, escape, &mut out);
    out
}

/// Parses and renders in one step
pub fn render_str(src: &str, data: &Value, escape: &dyn Fn(&str) -> String) -> Result<String, TemplateError> {
    Ok(render(&parse(src)?, data, escape))
}

pub fn no_escape(text: &str) -> String {
    text.to_string()
}

pub fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render_plain(src: &str, data: Value) -> String {
        render_str(src, &data, &no_escape).unwrap()
    }

    #[test]
    fn substitutes_and_blanks_missing_values() {
        assert_eq!(render_plain("Nr {number} dla {client.name}{missing}.", json!({ "number": "P/1", "client": { "name": "Jan" } })), "Nr P/1 dla Jan.");
        assert_eq!(render_plain("{qty}x {ok}", json!({ "qty": 2.5, "ok": true })), "2.5x true");
    }

    #[test]
    fn loops_prefer_inner_scope_then_outer() {
        let data = json!({
            "unit": "outer",
            "number": "P/7",
            "items": [
                { "description": "A", "unit": "m" },
                { "description": "B" }
            ]
        });
        assert_eq!(render_plain("{#items}{description}:{unit}:{number};{/items}", data), "A:m:P/7;B:outer:P/7;");
    }

    #[test]
    fn sections_and_inverted_sections() {
        let data = json!({ "notes": "", "items": [], "signed": true, "client": { "name": "Jan" } });
        assert_eq!(render_plain("{#notes}N{/notes}{^notes}no notes{/notes}", data.clone()), "no notes");
        assert_eq!(render_plain("{^items}empty{/items}{#signed}signed{/signed}", data.clone()), "emptysigned");
        assert_eq!(render_plain("{#client}{name}{/client}", data), "Jan");
        assert_eq!(render_plain("{#tags}[{.}]{/tags}", json!({ "tags": ["a", "b"] })), "[a][b]");
    }

    #[test]
    fn unbalanced_tags_are_errors() {
        assert_eq!(parse("{#items}x"), Err(TemplateError::Unclosed("items".into())));
        assert_eq!(parse("x{/items}"), Err(TemplateError::UnexpectedClose("items".into())));
        assert_eq!(
            parse("{#a}{/b}"),
            Err(TemplateError::Mismatched { expected: "a".into(), found: "b".into() })
        );
    }

    #[test]
    fn non_tag_braces_are_literal() {
        assert_eq!(render_plain("{ not a tag } {{x}} {8A5C-11}", json!({ "x": 1 })), "{ not a tag } {1} {8A5C-11}");
    }

    #[test]
    fn values_are_escaped() {
        let out = render_str("<w:t>{name}</w:t>", &json!({ "name": "A & B <Co>" }), &xml_escape).unwrap();
        assert_eq!(out, "<w:t>A &amp; B &lt;Co&gt;</w:t>");
    }
}
