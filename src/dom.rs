//! Arena XML document used as the harness data-interchange primitive.
//!
//! Parsed once with quick-xml events into an index-based tree. Namespaces
//! are resolved at parse time so consumers can match on expanded names
//! without re-walking declaration scopes.

use std::collections::HashMap;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::SpecError;

/// Namespace of `xml:*` attributes, bound implicitly on every document.
pub const XML_NS_URI: &str = "http://www.w3.org/XML/1998/namespace";
/// Namespace of `xmlns`/`xmlns:*` declaration attributes.
pub const XMLNS_ATTRIBUTE_NS_URI: &str = "http://www.w3.org/2000/xmlns/";

pub type NodeId = usize;

/// Expanded element name: lexical prefix plus resolved namespace URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedName {
    pub prefix: Option<String>,
    pub local: String,
    /// Resolved namespace URI; empty string is the null namespace.
    pub namespace: String,
}

impl QualifiedName {
    pub fn lexical(&self) -> String {
        match &self.prefix {
            Some(p) => format!("{}:{}", p, self.local),
            None => self.local.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub prefix: Option<String>,
    pub local: String,
    /// Resolved namespace URI; unprefixed attributes are in no namespace.
    pub namespace: String,
    pub value: String,
}

impl Attribute {
    pub fn lexical(&self) -> String {
        match &self.prefix {
            Some(p) => format!("{}:{}", p, self.local),
            None => self.local.clone(),
        }
    }

    /// True for `xmlns` and `xmlns:*` declaration attributes.
    pub fn is_namespace_decl(&self) -> bool {
        self.prefix.as_deref() == Some("xmlns")
            || (self.prefix.is_none() && self.local == "xmlns")
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Document,
    Element {
        name: QualifiedName,
        attributes: Vec<Attribute>,
    },
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Read-mostly XML tree. Node 0 is always the document node.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<NodeData>,
}

impl Document {
    fn empty() -> Self {
        Self {
            nodes: vec![NodeData {
                kind: NodeKind::Document,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    pub fn parse(input: &str) -> Result<Self, SpecError> {
        let xml_err = |e: &dyn std::fmt::Display| SpecError::Xml {
            details: e.to_string(),
        };

        let mut reader = Reader::from_str(input);
        let mut doc = Self::empty();
        let mut open: Vec<NodeId> = vec![0];
        // One prefix->uri frame per open element; None key slot is the
        // default namespace, kept under the reserved empty prefix.
        let mut scopes: Vec<HashMap<String, String>> = vec![HashMap::new()];

        loop {
            match reader.read_event().map_err(|e| xml_err(&e))? {
                Event::Start(start) => {
                    let id = doc.push_element(&start, &mut scopes, *open.last().unwrap())?;
                    open.push(id);
                }
                Event::Empty(start) => {
                    doc.push_element(&start, &mut scopes, *open.last().unwrap())?;
                    scopes.pop();
                }
                Event::End(_) => {
                    if open.len() > 1 {
                        open.pop();
                        scopes.pop();
                    }
                }
                Event::Text(text) => {
                    let value = text.unescape().map_err(|e| xml_err(&e))?.into_owned();
                    doc.append(*open.last().unwrap(), NodeKind::Text(value));
                }
                Event::CData(cdata) => {
                    let value = String::from_utf8_lossy(cdata.as_ref()).into_owned();
                    doc.append(*open.last().unwrap(), NodeKind::Text(value));
                }
                Event::Comment(text) => {
                    let value = text.unescape().map_err(|e| xml_err(&e))?.into_owned();
                    doc.append(*open.last().unwrap(), NodeKind::Comment(value));
                }
                Event::Eof => break,
                // Declarations, PIs and doctypes carry no information the
                // harness consumes.
                _ => {}
            }
        }

        if doc.root_element().is_none() {
            return Err(SpecError::Xml {
                details: "document has no root element".to_string(),
            });
        }
        Ok(doc)
    }

    fn push_element(
        &mut self,
        start: &BytesStart<'_>,
        scopes: &mut Vec<HashMap<String, String>>,
        parent: NodeId,
    ) -> Result<NodeId, SpecError> {
        let xml_err = |e: &dyn std::fmt::Display| SpecError::Xml {
            details: e.to_string(),
        };

        let mut frame: HashMap<String, String> = HashMap::new();
        let mut raw_attrs: Vec<(Option<String>, String, String)> = Vec::new();

        for attr in start.attributes() {
            let attr = attr.map_err(|e| xml_err(&e))?;
            let key = attr.key;
            let local = String::from_utf8_lossy(key.local_name().as_ref()).into_owned();
            let prefix = key
                .prefix()
                .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned());
            let value = attr.unescape_value().map_err(|e| xml_err(&e))?.into_owned();

            if prefix.as_deref() == Some("xmlns") {
                frame.insert(local.clone(), value.clone());
            } else if prefix.is_none() && local == "xmlns" {
                frame.insert(String::new(), value.clone());
            }
            raw_attrs.push((prefix, local, value));
        }
        scopes.push(frame);

        let resolve = |prefix: Option<&str>| -> Option<String> {
            let key = prefix.unwrap_or("");
            match key {
                "xml" => return Some(XML_NS_URI.to_string()),
                "xmlns" => return Some(XMLNS_ATTRIBUTE_NS_URI.to_string()),
                _ => {}
            }
            for frame in scopes.iter().rev() {
                if let Some(uri) = frame.get(key) {
                    return Some(uri.clone());
                }
            }
            None
        };

        let name = start.name();
        let local = String::from_utf8_lossy(name.local_name().as_ref()).into_owned();
        let prefix = name
            .prefix()
            .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned());
        let namespace = match resolve(prefix.as_deref()) {
            Some(uri) => uri,
            None if prefix.is_some() => {
                return Err(SpecError::Xml {
                    details: format!("unbound namespace prefix: {}", prefix.unwrap()),
                });
            }
            None => String::new(),
        };

        let attributes = raw_attrs
            .into_iter()
            .map(|(prefix, local, value)| {
                let namespace = match prefix.as_deref() {
                    // Unprefixed attributes are in no namespace, except the
                    // xmlns declaration itself.
                    None if local == "xmlns" => XMLNS_ATTRIBUTE_NS_URI.to_string(),
                    None => String::new(),
                    Some(p) => resolve(Some(p)).unwrap_or_default(),
                };
                Attribute {
                    prefix,
                    local,
                    namespace,
                    value,
                }
            })
            .collect();

        let kind = NodeKind::Element {
            name: QualifiedName {
                prefix,
                local,
                namespace,
            },
            attributes,
        };
        Ok(self.append(parent, kind))
    }

    fn append(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(NodeData {
            kind,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent].children.push(id);
        id
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id].kind
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    pub fn root_element(&self) -> Option<NodeId> {
        self.nodes[0]
            .children
            .iter()
            .copied()
            .find(|&c| matches!(self.nodes[c].kind, NodeKind::Element { .. }))
    }

    pub fn element_name(&self, id: NodeId) -> Option<&QualifiedName> {
        match &self.nodes[id].kind {
            NodeKind::Element { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn attributes(&self, id: NodeId) -> &[Attribute] {
        match &self.nodes[id].kind {
            NodeKind::Element { attributes, .. } => attributes,
            _ => &[],
        }
    }

    /// Attribute lookup by unqualified name, DOM `getAttribute` style.
    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.attributes(id)
            .iter()
            .find(|a| a.prefix.is_none() && a.local == name)
            .map(|a| a.value.as_str())
    }

    pub fn child_elements(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(id)
            .iter()
            .copied()
            .filter(|&c| matches!(self.nodes[c].kind, NodeKind::Element { .. }))
            .collect::<Vec<_>>()
            .into_iter()
    }

    /// All descendant nodes of `id` in document order, excluding `id`.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            for &child in self.children(node).iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// Descendant-or-self elements matching an expanded name, document order.
    pub fn elements_by_ns(&self, origin: NodeId, namespace: &str, local: &str) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut candidates = vec![origin];
        candidates.extend(self.descendants(origin));
        for node in candidates {
            if let Some(name) = self.element_name(node) {
                if name.namespace == namespace && name.local == local {
                    out.push(node);
                }
            }
        }
        out
    }

    /// Concatenated text of all descendant text nodes.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        if let NodeKind::Text(t) = &self.nodes[id].kind {
            out.push_str(t);
        }
        for node in self.descendants(id) {
            if let NodeKind::Text(t) = &self.nodes[node].kind {
                out.push_str(t);
            }
        }
        out
    }

    /// Namespace declarations in scope at `id`, closest declaration wins.
    /// The empty-string key is the default namespace.
    pub fn in_scope_namespaces(&self, id: NodeId) -> HashMap<String, String> {
        let mut decls = HashMap::new();
        let mut current = Some(id);
        while let Some(node) = current {
            for attr in self.attributes(node) {
                if attr.prefix.as_deref() == Some("xmlns") {
                    decls.entry(attr.local.clone()).or_insert_with(|| attr.value.clone());
                } else if attr.prefix.is_none() && attr.local == "xmlns" {
                    decls.entry(String::new()).or_insert_with(|| attr.value.clone());
                }
            }
            current = self.parent(node);
        }
        decls
    }

    /// Deep-copy the subtree rooted at `id` into a standalone document.
    ///
    /// Namespace declarations that were in scope on ancestors are re-declared
    /// on the new root so the extracted fragment stays well-formed.
    pub fn extract_subtree(&self, id: NodeId) -> Document {
        let mut doc = Self::empty();
        let new_root = self.copy_into(id, &mut doc, 0);

        let in_scope = self.in_scope_namespaces(id);
        if let NodeKind::Element { attributes, .. } = &mut doc.nodes[new_root].kind {
            for (prefix, uri) in in_scope {
                let already = attributes.iter().any(|a| {
                    if prefix.is_empty() {
                        a.prefix.is_none() && a.local == "xmlns"
                    } else {
                        a.prefix.as_deref() == Some("xmlns") && a.local == prefix
                    }
                });
                if !already {
                    attributes.push(if prefix.is_empty() {
                        Attribute {
                            prefix: None,
                            local: "xmlns".to_string(),
                            namespace: XMLNS_ATTRIBUTE_NS_URI.to_string(),
                            value: uri,
                        }
                    } else {
                        Attribute {
                            prefix: Some("xmlns".to_string()),
                            local: prefix,
                            namespace: XMLNS_ATTRIBUTE_NS_URI.to_string(),
                            value: uri,
                        }
                    });
                }
            }
        }
        doc
    }

    fn copy_into(&self, id: NodeId, target: &mut Document, parent: NodeId) -> NodeId {
        let new_id = target.append(parent, self.nodes[id].kind.clone());
        for &child in self.children(id) {
            self.copy_into(child, target, new_id);
        }
        new_id
    }

    /// Set or replace an unqualified attribute on an element node.
    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) {
        if let NodeKind::Element { attributes, .. } = &mut self.nodes[id].kind {
            if let Some(attr) = attributes
                .iter_mut()
                .find(|a| a.prefix.is_none() && a.local == name)
            {
                attr.value = value.to_string();
            } else {
                attributes.push(Attribute {
                    prefix: None,
                    local: name.to_string(),
                    namespace: String::new(),
                    value: value.to_string(),
                });
            }
        }
    }

    /// Serialize the subtree rooted at `id` (an element) to an XML string.
    pub fn serialize_node(&self, id: NodeId) -> Result<String, SpecError> {
        let mut writer = Writer::new(Vec::new());
        self.write_node(id, &mut writer)?;
        String::from_utf8(writer.into_inner()).map_err(|e| SpecError::Xml {
            details: e.to_string(),
        })
    }

    /// Serialize the whole document with an XML declaration.
    pub fn serialize(&self) -> Result<String, SpecError> {
        let root = self.root_element().ok_or_else(|| SpecError::Xml {
            details: "document has no root element".to_string(),
        })?;
        let body = self.serialize_node(root)?;
        Ok(format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}\n", body))
    }

    fn write_node(&self, id: NodeId, writer: &mut Writer<Vec<u8>>) -> Result<(), SpecError> {
        let xml_err = |e: &dyn std::fmt::Display| SpecError::Xml {
            details: e.to_string(),
        };
        match &self.nodes[id].kind {
            NodeKind::Element { name, attributes } => {
                let tag = name.lexical();
                let mut start = BytesStart::new(tag.as_str());
                for attr in attributes {
                    start.push_attribute((attr.lexical().as_str(), attr.value.as_str()));
                }
                if self.children(id).is_empty() {
                    writer
                        .write_event(Event::Empty(start))
                        .map_err(|e| xml_err(&e))?;
                } else {
                    writer
                        .write_event(Event::Start(start))
                        .map_err(|e| xml_err(&e))?;
                    for &child in self.children(id) {
                        self.write_node(child, writer)?;
                    }
                    writer
                        .write_event(Event::End(BytesEnd::new(tag.as_str())))
                        .map_err(|e| xml_err(&e))?;
                }
            }
            NodeKind::Text(text) => {
                writer
                    .write_event(Event::Text(BytesText::new(text)))
                    .map_err(|e| xml_err(&e))?;
            }
            NodeKind::Comment(text) => {
                writer
                    .write_event(Event::Comment(BytesText::new(text)))
                    .map_err(|e| xml_err(&e))?;
            }
            NodeKind::Document => {
                for &child in self.children(id) {
                    self.write_node(child, writer)?;
                }
            }
        }
        Ok(())
    }
}
