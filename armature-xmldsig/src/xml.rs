//! Small helpers over `roxmltree` shared by canonicalization, verification
//! and signing.
//!
//! `roxmltree` resolves names to namespace URIs but does not keep element
//! prefixes, so prefixes are recovered from the source text. Every node these
//! helpers see therefore has to come from a document parsed out of a string.

use crate::algorithm::XML_NS;
use crate::error::Result;
use roxmltree::{Document, Node, NodeId, NodeType};
use std::collections::BTreeMap;

/// Parses `xml`. DTDs are rejected.
pub fn parse(xml: &str) -> Result<Document<'_>> {
    Ok(Document::parse(xml)?)
}

/// Prefix of an element's qualified name as written in the source.
pub fn element_prefix<'input>(node: Node<'_, 'input>) -> Option<&'input str> {
    let text = node.document().input_text();
    let tag = text.get(node.range().start + 1..)?;
    let end = tag.find(|c: char| c.is_whitespace() || c == '/' || c == '>')?;
    tag[..end].split_once(':').map(|(prefix, _)| prefix)
}

/// Qualified name (`prefix:local` or `local`) of an element.
pub fn qualified_name(node: Node<'_, '_>) -> String {
    let local = node.tag_name().name();
    match element_prefix(node) {
        Some(prefix) => format!("{prefix}:{local}"),
        None => local.to_owned(),
    }
}

/// Prefix bound to `ns_uri` on `node`, for namespaced attributes.
pub fn attribute_prefix(node: Node<'_, '_>, ns_uri: &str) -> Option<String> {
    if ns_uri == XML_NS {
        return Some("xml".to_owned());
    }
    node.namespaces()
        .filter(|ns| ns.uri() == ns_uri)
        .find_map(|ns| ns.name())
        .map(str::to_owned)
}

/// Namespaces in scope at `node`, keyed by prefix (`""` for the default).
pub fn in_scope_namespaces(node: Node<'_, '_>) -> BTreeMap<String, String> {
    node.namespaces()
        .filter(|ns| ns.name() != Some("xml"))
        .filter(|ns| ns.name().is_some() || !ns.uri().is_empty())
        .map(|ns| (ns.name().unwrap_or("").to_owned(), ns.uri().to_owned()))
        .collect()
}

/// First child element with the given namespace and local name.
pub fn child_element<'a, 'input>(
    node: Node<'a, 'input>,
    ns: &str,
    local: &str,
) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|c| c.is_element() && c.tag_name().namespace() == Some(ns) && c.tag_name().name() == local)
}

/// Child elements with the given namespace and local name.
pub fn child_elements<'a, 'input>(
    node: Node<'a, 'input>,
    ns: &'a str,
    local: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.children()
        .filter(move |c| c.is_element() && c.tag_name().namespace() == Some(ns) && c.tag_name().name() == local)
}

/// All text below `node` in document order, across comments and processing
/// instructions. `Node::text` stops at the first of them.
pub fn text_content(node: Node<'_, '_>) -> String {
    node.descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect()
}

/// Serializes `node` as a standalone document.
///
/// Every namespace in scope at `node` is declared on the output root, so the
/// result parses to the same names without the surrounding document. The
/// subtree rooted at `skip`, if any, is left out.
pub fn outer_xml(node: Node<'_, '_>, skip: Option<NodeId>) -> String {
    outer_xml_filtered(node, &|n: Node<'_, '_>| Some(n.id()) != skip)
}

/// Like [`outer_xml`], leaving out every element for which `keep` is false.
pub fn outer_xml_filtered(node: Node<'_, '_>, keep: &dyn Fn(Node<'_, '_>) -> bool) -> String {
    let mut out = String::new();
    write_node(node, &BTreeMap::new(), keep, &mut out);
    out
}

fn write_node(
    node: Node<'_, '_>,
    declared: &BTreeMap<String, String>,
    keep: &dyn Fn(Node<'_, '_>) -> bool,
    out: &mut String,
) {
    match node.node_type() {
        NodeType::Element => {
            if !keep(node) {
                return;
            }
            let name = qualified_name(node);
            out.push('<');
            out.push_str(&name);

            let scope = in_scope_namespaces(node);
            for (prefix, uri) in &scope {
                if declared.get(prefix) == Some(uri) {
                    continue;
                }
                if prefix.is_empty() {
                    out.push_str(&format!(" xmlns=\"{}\"", escape_attr(uri)));
                } else {
                    out.push_str(&format!(" xmlns:{prefix}=\"{}\"", escape_attr(uri)));
                }
            }
            if declared.get("").is_some_and(|uri| !uri.is_empty()) && !scope.contains_key("") {
                out.push_str(" xmlns=\"\"");
            }

            for attr in node.attributes() {
                out.push(' ');
                if let Some(ns) = attr.namespace()
                    && let Some(prefix) = attribute_prefix(node, ns)
                {
                    out.push_str(&prefix);
                    out.push(':');
                }
                out.push_str(attr.name());
                out.push_str("=\"");
                out.push_str(&escape_attr(attr.value()));
                out.push('"');
            }

            if node.has_children() {
                out.push('>');
                for child in node.children() {
                    write_node(child, &scope, keep, out);
                }
                out.push_str("</");
                out.push_str(&name);
                out.push('>');
            } else {
                out.push_str("/>");
            }
        }
        NodeType::Text => out.push_str(&escape_text(node.text().unwrap_or(""))),
        NodeType::Comment => {
            out.push_str("<!--");
            out.push_str(node.text().unwrap_or(""));
            out.push_str("-->");
        }
        NodeType::PI => {
            if let Some(pi) = node.pi() {
                out.push_str("<?");
                out.push_str(pi.target);
                if let Some(value) = pi.value {
                    out.push(' ');
                    out.push_str(value);
                }
                out.push_str("?>");
            }
        }
        NodeType::Root => {
            for child in node.children() {
                write_node(child, declared, keep, out);
            }
        }
    }
}

/// Escapes character data the way canonical XML writes it.
pub fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Escapes an attribute value the way canonical XML writes it.
pub fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<p:Outer xmlns:p="urn:p" xmlns:q="urn:q"><q:Inner q:flag="1">a &amp; b</q:Inner><Plain/></p:Outer>"#;

    #[test]
    fn test_element_prefix() {
        let doc = parse(DOC).unwrap();
        let root = doc.root_element();
        assert_eq!(element_prefix(root), Some("p"));
        let inner = root.first_element_child().unwrap();
        assert_eq!(qualified_name(inner), "q:Inner");
        let plain = inner.next_sibling_element().unwrap();
        assert_eq!(element_prefix(plain), None);
    }

    #[test]
    fn test_text_content_spans_comments() {
        let doc = parse("<a>admin@example.com<!---->.evil<b>.com</b><?pi x?></a>").unwrap();
        let root = doc.root_element();
        assert_eq!(root.text(), Some("admin@example.com"));
        assert_eq!(text_content(root), "admin@example.com.evil.com");
        assert_eq!(text_content(parse("<a/>").unwrap().root_element()), "");
    }

    #[test]
    fn test_outer_xml_declares_inherited_namespaces() {
        let doc = parse(DOC).unwrap();
        let inner = doc.root_element().first_element_child().unwrap();
        let xml = outer_xml(inner, None);
        assert_eq!(
            xml,
            r#"<q:Inner xmlns:p="urn:p" xmlns:q="urn:q" q:flag="1">a &amp; b</q:Inner>"#
        );
        let reparsed = parse(&xml).unwrap();
        assert_eq!(reparsed.root_element().tag_name().namespace(), Some("urn:q"));
    }

    #[test]
    fn test_outer_xml_skips_subtree() {
        let doc = parse(DOC).unwrap();
        let root = doc.root_element();
        let inner = root.first_element_child().unwrap();
        let xml = outer_xml(root, Some(inner.id()));
        assert_eq!(xml, r#"<p:Outer xmlns:p="urn:p" xmlns:q="urn:q"><Plain/></p:Outer>"#);
    }

    #[test]
    fn test_outer_xml_undeclares_default_namespace() {
        let doc = parse(r#"<a xmlns="urn:a"><b xmlns=""/></a>"#).unwrap();
        let xml = outer_xml(doc.root_element(), None);
        assert_eq!(xml, r#"<a xmlns="urn:a"><b xmlns=""/></a>"#);
    }

    #[test]
    fn test_escapes() {
        assert_eq!(escape_text("a&b<c>d\r"), "a&amp;b&lt;c&gt;d&#xD;");
        assert_eq!(escape_attr("a\"b\tc\n"), "a&quot;b&#x9;c&#xA;");
    }

    #[test]
    fn test_parse_rejects_dtd() {
        let xml = r#"<!DOCTYPE a [<!ENTITY x "y">]><a>&x;</a>"#;
        assert!(parse(xml).is_err());
    }
}
