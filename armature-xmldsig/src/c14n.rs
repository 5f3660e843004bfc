//! Exclusive XML Canonicalization 1.0 over `roxmltree` subtrees.
//!
//! Only "visibly utilized" namespace declarations are written: the prefix of
//! the element itself, the prefixes of its attributes, and any prefix named
//! in an `InclusiveNamespaces` prefix list. A declaration is written once, on
//! the outermost output element that needs it.

use crate::algorithm::CanonicalizationMethod;
use crate::xml::{attribute_prefix, element_prefix, escape_attr, escape_text, in_scope_namespaces, qualified_name};
use roxmltree::{Node, NodeId, NodeType};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// Canonicalizes the subtree rooted at `apex`.
///
/// `exclude` removes one descendant subtree from the output, which is how the
/// enveloped-signature transform is applied.
pub fn canonicalize(
    apex: Node<'_, '_>,
    method: CanonicalizationMethod,
    exclude: Option<NodeId>,
    inclusive_prefixes: &[String],
) -> String {
    let ctx = Context {
        with_comments: method.with_comments(),
        exclude,
        inclusive_prefixes: inclusive_prefixes
            .iter()
            .map(|p| if p == "#default" { String::new() } else { p.clone() })
            .collect(),
    };
    let mut out = String::new();
    ctx.node(apex, &BTreeMap::new(), &mut out);
    out
}

struct Context {
    with_comments: bool,
    exclude: Option<NodeId>,
    inclusive_prefixes: BTreeSet<String>,
}

struct Attr {
    ns_uri: String,
    local_name: String,
    qualified_name: String,
    value: String,
}

impl Attr {
    fn order(&self, other: &Self) -> Ordering {
        match (self.ns_uri.is_empty(), other.ns_uri.is_empty()) {
            (true, true) => self.local_name.cmp(&other.local_name),
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self
                .ns_uri
                .cmp(&other.ns_uri)
                .then_with(|| self.local_name.cmp(&other.local_name)),
        }
    }
}

impl Context {
    fn node(&self, node: Node<'_, '_>, rendered: &BTreeMap<String, String>, out: &mut String) {
        match node.node_type() {
            NodeType::Element => self.element(node, rendered, out),
            NodeType::Text => out.push_str(&escape_text(node.text().unwrap_or(""))),
            NodeType::Comment if self.with_comments => {
                out.push_str("<!--");
                out.push_str(node.text().unwrap_or(""));
                out.push_str("-->");
            }
            NodeType::PI => {
                if let Some(pi) = node.pi() {
                    out.push_str("<?");
                    out.push_str(pi.target);
                    if let Some(value) = pi.value.filter(|v| !v.is_empty()) {
                        out.push(' ');
                        out.push_str(&value.replace('\r', "&#xD;"));
                    }
                    out.push_str("?>");
                }
            }
            _ => {}
        }
    }

    fn element(&self, node: Node<'_, '_>, rendered: &BTreeMap<String, String>, out: &mut String) {
        if self.exclude == Some(node.id()) {
            return;
        }

        let mut utilized: BTreeSet<String> = self.inclusive_prefixes.clone();
        utilized.insert(element_prefix(node).unwrap_or("").to_owned());

        let mut attrs = Vec::new();
        for attr in node.attributes() {
            let ns_uri = attr.namespace().unwrap_or("");
            let prefix = if ns_uri.is_empty() {
                None
            } else {
                attribute_prefix(node, ns_uri)
            };
            if let Some(prefix) = &prefix
                && prefix != "xml"
            {
                utilized.insert(prefix.clone());
            }
            attrs.push(Attr {
                ns_uri: ns_uri.to_owned(),
                local_name: attr.name().to_owned(),
                qualified_name: match prefix {
                    Some(prefix) => format!("{prefix}:{}", attr.name()),
                    None => attr.name().to_owned(),
                },
                value: attr.value().to_owned(),
            });
        }
        attrs.sort_by(|a, b| a.order(b));

        // BTreeSet iteration puts the default namespace ("") first.
        let scope = in_scope_namespaces(node);
        let mut child_rendered = rendered.clone();
        let mut decls = String::new();
        for prefix in &utilized {
            match scope.get(prefix) {
                Some(uri) if rendered.get(prefix) != Some(uri) => {
                    if prefix.is_empty() {
                        decls.push_str(&format!(" xmlns=\"{}\"", escape_attr(uri)));
                    } else {
                        decls.push_str(&format!(" xmlns:{prefix}=\"{}\"", escape_attr(uri)));
                    }
                    child_rendered.insert(prefix.clone(), uri.clone());
                }
                None if prefix.is_empty()
                    && rendered.get("").is_some_and(|uri| !uri.is_empty()) =>
                {
                    decls.push_str(" xmlns=\"\"");
                    child_rendered.insert(String::new(), String::new());
                }
                _ => {}
            }
        }

        let name = qualified_name(node);
        out.push('<');
        out.push_str(&name);
        out.push_str(&decls);
        for attr in &attrs {
            out.push(' ');
            out.push_str(&attr.qualified_name);
            out.push_str("=\"");
            out.push_str(&escape_attr(&attr.value));
            out.push('"');
        }
        out.push('>');

        for child in node.children() {
            self.node(child, &child_rendered, out);
        }

        out.push_str("</");
        out.push_str(&name);
        out.push('>');
    }
}
