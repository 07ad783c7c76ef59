//! Prefix/URI bindings for compiling expectation expressions.
//!
//! Built by walking from an expression's originating element up through its
//! ancestors. A declaration on a closer element shadows the same prefix on
//! an outer one; declaring one prefix twice at the same scope is a fixture
//! authoring bug and fails fast.

use std::collections::HashMap;

use crate::dom::{Document, NodeId, XML_NS_URI, XMLNS_ATTRIBUTE_NS_URI};
use crate::error::SpecError;

#[derive(Debug, Clone)]
pub struct Namespaces {
    uri_by_prefix: HashMap<String, String>,
    prefixes_by_uri: HashMap<String, Vec<String>>,
}

impl Namespaces {
    pub fn new() -> Self {
        let mut ns = Self {
            uri_by_prefix: HashMap::new(),
            prefixes_by_uri: HashMap::new(),
        };
        ns.bind("xml", XML_NS_URI);
        ns.bind("xmlns", XMLNS_ATTRIBUTE_NS_URI);
        ns
    }

    /// Collect the bindings in scope at `start`, walking towards the root.
    pub fn from_element(doc: &Document, start: NodeId) -> Result<Self, SpecError> {
        let mut ns = Self::new();
        let mut current = Some(start);
        while let Some(node) = current {
            ns.collect_decls(doc, node)?;
            current = doc.parent(node);
        }
        Ok(ns)
    }

    fn collect_decls(&mut self, doc: &Document, node: NodeId) -> Result<(), SpecError> {
        let mut seen_here: Vec<&str> = Vec::new();
        for attr in doc.attributes(node) {
            let prefix = if attr.prefix.as_deref() == Some("xmlns") {
                attr.local.as_str()
            } else if attr.prefix.is_none() && attr.local == "xmlns" {
                // Default namespace declaration, kept under the empty prefix.
                ""
            } else {
                continue;
            };

            if seen_here.contains(&prefix) {
                return Err(SpecError::DuplicatePrefix {
                    prefix: prefix.to_string(),
                });
            }
            seen_here.push(prefix);

            // First seen wins: a closer element already bound this prefix.
            if !self.is_declared_prefix(prefix) {
                self.bind(prefix, &attr.value);
            }
        }
        Ok(())
    }

    fn bind(&mut self, prefix: &str, uri: &str) {
        self.uri_by_prefix
            .insert(prefix.to_string(), uri.to_string());
        self.prefixes_by_uri
            .entry(uri.to_string())
            .or_default()
            .push(prefix.to_string());
    }

    pub fn is_declared_prefix(&self, prefix: &str) -> bool {
        self.uri_by_prefix.contains_key(prefix)
    }

    /// Explicitly add a binding; redeclaring a prefix fails fast.
    pub fn declare(&mut self, prefix: &str, uri: &str) -> Result<(), SpecError> {
        if self.is_declared_prefix(prefix) {
            return Err(SpecError::DuplicatePrefix {
                prefix: prefix.to_string(),
            });
        }
        self.bind(prefix, uri);
        Ok(())
    }

    /// URI bound to `prefix`, or the empty string (the null namespace).
    pub fn resolve_uri(&self, prefix: &str) -> &str {
        self.uri_by_prefix.get(prefix).map(String::as_str).unwrap_or("")
    }

    /// First prefix bound to `uri`, if any.
    pub fn resolve_prefix(&self, uri: &str) -> Option<&str> {
        self.prefixes_by_uri
            .get(uri)
            .and_then(|prefixes| prefixes.first())
            .map(String::as_str)
    }

    /// All prefixes bound to `uri`, in binding order.
    pub fn resolve_all_prefixes(&self, uri: &str) -> Vec<&str> {
        self.prefixes_by_uri
            .get(uri)
            .map(|prefixes| prefixes.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

impl Default for Namespaces {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_bindings() {
        let ns = Namespaces::new();
        assert_eq!(ns.resolve_uri("xml"), XML_NS_URI);
        assert_eq!(ns.resolve_uri("xmlns"), XMLNS_ATTRIBUTE_NS_URI);
        assert_eq!(ns.resolve_uri("unbound"), "");
    }

    #[test]
    fn test_ancestor_walk_collects_decls() {
        let doc = Document::parse(
            r#"<root xmlns:a="urn:outer" xmlns:b="urn:b"><mid xmlns:c="urn:c"><leaf/></mid></root>"#,
        )
        .unwrap();
        let root = doc.root_element().unwrap();
        let mid = doc.child_elements(root).next().unwrap();
        let leaf = doc.child_elements(mid).next().unwrap();

        let ns = Namespaces::from_element(&doc, leaf).unwrap();
        assert_eq!(ns.resolve_uri("a"), "urn:outer");
        assert_eq!(ns.resolve_uri("b"), "urn:b");
        assert_eq!(ns.resolve_uri("c"), "urn:c");
    }

    #[test]
    fn test_first_seen_wins_over_outer_decl() {
        let doc = Document::parse(
            r#"<root xmlns:p="urn:outer"><inner xmlns:p="urn:inner"><leaf/></inner></root>"#,
        )
        .unwrap();
        let root = doc.root_element().unwrap();
        let inner = doc.child_elements(root).next().unwrap();
        let leaf = doc.child_elements(inner).next().unwrap();

        let ns = Namespaces::from_element(&doc, leaf).unwrap();
        assert_eq!(ns.resolve_uri("p"), "urn:inner");
    }

    #[test]
    fn test_default_namespace_bound_under_empty_prefix() {
        let doc = Document::parse(r#"<root xmlns="urn:default"><leaf/></root>"#).unwrap();
        let root = doc.root_element().unwrap();
        let leaf = doc.child_elements(root).next().unwrap();

        let ns = Namespaces::from_element(&doc, leaf).unwrap();
        assert_eq!(ns.resolve_uri(""), "urn:default");
    }

    #[test]
    fn test_redeclare_fails_fast() {
        let mut ns = Namespaces::new();
        ns.declare("svrl", "http://purl.oclc.org/dsdl/svrl").unwrap();
        let err = ns.declare("svrl", "urn:other").unwrap_err();
        assert!(matches!(err, SpecError::DuplicatePrefix { .. }));
    }

    #[test]
    fn test_reverse_lookup() {
        let mut ns = Namespaces::new();
        ns.declare("a", "urn:shared").unwrap();
        ns.declare("b", "urn:shared").unwrap();
        assert_eq!(ns.resolve_prefix("urn:shared"), Some("a"));
        assert_eq!(ns.resolve_all_prefixes("urn:shared"), vec!["a", "b"]);
        assert_eq!(ns.resolve_prefix("urn:absent"), None);
    }
}
