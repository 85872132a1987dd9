//! Serializers for the rewritten document.
//!
//! The XML writer is deliberately dumb: elements and attributes are written in
//! tree order with no per-element knowledge.

use anyhow::{Context, Result};
use wxsforge_contracts::{WIX_NAMESPACE, WXSFORGE_DOCUMENT_SCHEMA_VERSION};

use crate::doc::{Document, DocumentFile, NodeId, NodeKind};

const INDENT: &str = "  ";

/// WiX source text. A `Product` or `Module` root is wrapped in a `Wix` element.
pub fn emit_wxs(doc: &Document) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    let root = doc.root();
    if doc.is(root, &NodeKind::Wix) {
        write_element(doc, root, 0, true, &mut out);
    } else {
        out.push_str(&format!("<Wix xmlns=\"{WIX_NAMESPACE}\">\n"));
        write_element(doc, root, 1, false, &mut out);
        out.push_str("</Wix>\n");
    }
    out
}

fn write_element(doc: &Document, id: NodeId, depth: usize, wix_root: bool, out: &mut String) {
    let node = doc.node(id);
    let pad = INDENT.repeat(depth);
    let name = node.kind.as_str();

    out.push_str(&pad);
    out.push('<');
    out.push_str(name);
    if wix_root && !node.attributes.contains_key("xmlns") {
        out.push_str(&format!(" xmlns=\"{WIX_NAMESPACE}\""));
    }
    // `Id` leads; the rest keep insertion order.
    let id = node.attributes.get_key_value("Id");
    let rest = node.attributes.iter().filter(|(key, _)| key.as_str() != "Id");
    for (key, value) in id.into_iter().chain(rest) {
        out.push(' ');
        out.push_str(&attribute_name(key));
        out.push_str("=\"");
        out.push_str(&escape_attr(value));
        out.push('"');
    }

    let children = node.children();
    match (&node.text, children.is_empty()) {
        (None, true) => out.push_str(" />\n"),
        (Some(text), true) => {
            out.push('>');
            out.push_str(&escape_text(text));
            out.push_str(&format!("</{name}>\n"));
        }
        (text, false) => {
            out.push_str(">\n");
            if let Some(text) = text {
                out.push_str(&pad);
                out.push_str(INDENT);
                out.push_str(&escape_text(text));
                out.push('\n');
            }
            for child in children {
                write_element(doc, *child, depth + 1, false, out);
            }
            out.push_str(&format!("{pad}</{name}>\n"));
        }
    }
}

/// `{dep}ProviderKey` is written as `dep:ProviderKey`.
fn attribute_name(key: &str) -> String {
    match key.strip_prefix('{').and_then(|rest| rest.split_once('}')) {
        Some((alias, local)) => format!("{alias}:{local}"),
        None => key.to_string(),
    }
}

fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

fn escape_attr(s: &str) -> String {
    escape_text(s).replace('"', "&quot;")
}

pub fn emit_document_json(doc: &Document) -> Result<String> {
    let file = DocumentFile {
        schema_version: WXSFORGE_DOCUMENT_SCHEMA_VERSION.to_string(),
        root: doc.to_spec(),
    };
    let mut out = serde_json::to_string_pretty(&file).context("serialize document JSON")?;
    out.push('\n');
    Ok(out)
}
