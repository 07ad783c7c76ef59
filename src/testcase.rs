//! In-memory representation of one parsed testcase specification.
//!
//! A [`TestcaseSpec`] is parsed once from its fixture document and read-only
//! thereafter. Schema variants are immutable values; specializing the
//! default variant for a query binding returns a new value and never touches
//! the stored one.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dom::{Document, NodeId};
use crate::error::{PopulateError, SpecError};

/// Namespace of the testsuite fixture vocabulary.
pub const TESTSUITE_NS: &str = "tag:dmaus@dmaus.name,2019:Schematron:Testsuite";
/// Namespace of Schematron schema elements.
pub const SCHEMATRON_NS: &str = "http://purl.oclc.org/dsdl/schematron";

const QUERYBINDING_NAME: &str = "queryBinding";

/// Validation outcome a testcase declares for its primary document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpectedOutcome {
    Valid,
    Invalid,
    Error,
}

impl ExpectedOutcome {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "valid" => Some(Self::Valid),
            "invalid" => Some(Self::Invalid),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Error => "error",
        }
    }
}

/// One schema rendition, keyed by the query binding it is written against.
///
/// The variant owns a standalone document whose root is the schema element;
/// `with_query_binding` is copy-on-specialize.
#[derive(Debug, Clone)]
pub struct SchemaVariant {
    query_binding: Option<String>,
    document: Document,
}

impl SchemaVariant {
    pub fn query_binding(&self) -> Option<&str> {
        self.query_binding.as_deref()
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Return a copy of this variant stamped with an explicit query binding.
    pub fn with_query_binding(&self, binding: &str) -> SchemaVariant {
        let mut document = self.document.clone();
        if let Some(root) = document.root_element() {
            document.set_attribute(root, QUERYBINDING_NAME, binding);
        }
        SchemaVariant {
            query_binding: Some(binding.to_string()),
            document,
        }
    }

    pub fn serialize(&self) -> Result<String, SpecError> {
        self.document.serialize()
    }
}

/// A primary or secondary instance document: declared relative filename plus
/// the wrapper element holding the content.
#[derive(Debug, Clone)]
pub struct DocumentFragment {
    filename: String,
    wrapper: NodeId,
}

impl DocumentFragment {
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn wrapper(&self) -> NodeId {
        self.wrapper
    }
}

/// An expectation to check against the validation report: the XPath source
/// and the element it originated from (for namespace capture).
#[derive(Debug, Clone)]
pub struct ExpectationExpr {
    source: String,
    element: NodeId,
}

impl ExpectationExpr {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn element(&self) -> NodeId {
        self.element
    }
}

/// Immutable testcase specification, parsed once.
#[derive(Debug, Clone)]
pub struct TestcaseSpec {
    path: PathBuf,
    document: Document,
    id: String,
    label: String,
    reference: Option<String>,
    expected: ExpectedOutcome,
    optional: bool,
    features: BTreeSet<String>,
    phase: Option<String>,
    schemas: Vec<SchemaVariant>,
    primary: DocumentFragment,
    secondary: Vec<DocumentFragment>,
    expectations: Vec<ExpectationExpr>,
}

impl TestcaseSpec {
    /// Parse and structurally validate a testcase fixture document.
    pub fn from_document(document: Document, path: &Path) -> Result<Self, SpecError> {
        let malformed = |details: String| SpecError::MalformedTestcase {
            path: path.to_path_buf(),
            details,
        };

        let root = document
            .root_element()
            .ok_or_else(|| malformed("no root element".to_string()))?;
        let root_name = document.element_name(root).unwrap();
        if root_name.namespace != TESTSUITE_NS || root_name.local != "testcase" {
            return Err(malformed(format!(
                "root element must be testcase in {}, found {}",
                TESTSUITE_NS,
                root_name.lexical()
            )));
        }

        let id = document.attribute(root, "id").unwrap_or_default().to_string();

        let expected = match document.attribute(root, "expect") {
            Some(value) => ExpectedOutcome::parse(value)
                .ok_or_else(|| malformed(format!("invalid expect attribute '{}'", value)))?,
            None => return Err(malformed("missing expect attribute".to_string())),
        };

        let optional = document
            .attribute(root, "optional")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));

        let features = document
            .attribute(root, "features")
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect::<BTreeSet<_>>();

        let label = document
            .elements_by_ns(root, TESTSUITE_NS, "label")
            .first()
            .map(|&node| document.text_content(node).trim().to_string())
            .unwrap_or_default();

        let reference = document
            .elements_by_ns(root, TESTSUITE_NS, "reference")
            .first()
            .map(|&node| document.text_content(node).trim().to_string());

        let phase = document
            .elements_by_ns(root, TESTSUITE_NS, "schemas")
            .first()
            .and_then(|&node| document.attribute(node, "phase"))
            .map(str::to_string);

        let mut schemas = Vec::new();
        for node in document.elements_by_ns(root, SCHEMATRON_NS, "schema") {
            let query_binding = document
                .attribute(node, QUERYBINDING_NAME)
                .filter(|v| !v.is_empty())
                .map(str::to_string);
            schemas.push(SchemaVariant {
                query_binding,
                document: document.extract_subtree(node),
            });
        }
        if schemas.is_empty() {
            return Err(malformed("no schema element".to_string()));
        }
        let defaults = schemas
            .iter()
            .filter(|v| v.query_binding.is_none())
            .count();
        if defaults > 1 {
            return Err(malformed(format!(
                "{} schema variants without a query binding, at most one allowed",
                defaults
            )));
        }

        let mut primaries = Vec::new();
        for node in document.elements_by_ns(root, TESTSUITE_NS, "primary") {
            primaries.push(Self::fragment(&document, node, path)?);
        }
        let primary = match primaries.len() {
            1 => primaries.pop().unwrap(),
            n => return Err(malformed(format!("expected exactly one primary document, found {}", n))),
        };

        let mut secondary = Vec::new();
        for node in document.elements_by_ns(root, TESTSUITE_NS, "secondary") {
            secondary.push(Self::fragment(&document, node, path)?);
        }

        let mut expectations = Vec::new();
        for node in document.elements_by_ns(root, TESTSUITE_NS, "expectation") {
            let source = document
                .attribute(node, "test")
                .or_else(|| document.attribute(node, "assert"))
                .ok_or_else(|| malformed("expectation without test attribute".to_string()))?;
            expectations.push(ExpectationExpr {
                source: source.to_string(),
                element: node,
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            document,
            id,
            label,
            reference,
            expected,
            optional,
            features,
            phase,
            schemas,
            primary,
            secondary,
            expectations,
        })
    }

    fn fragment(
        document: &Document,
        wrapper: NodeId,
        path: &Path,
    ) -> Result<DocumentFragment, SpecError> {
        let malformed = |details: String| SpecError::MalformedTestcase {
            path: path.to_path_buf(),
            details,
        };
        let filename = document
            .attribute(wrapper, "filename")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| malformed("document wrapper without filename attribute".to_string()))?;
        if document.child_elements(wrapper).next().is_none() {
            return Err(malformed(format!(
                "document wrapper '{}' has no element content",
                filename
            )));
        }
        Ok(DocumentFragment {
            filename: filename.to_string(),
            wrapper,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The parsed fixture document the fragments and expectations index into.
    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    pub fn expected(&self) -> ExpectedOutcome {
        self.expected
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn features(&self) -> &BTreeSet<String> {
        &self.features
    }

    pub fn phase(&self) -> Option<&str> {
        self.phase.as_deref()
    }

    pub fn schemas(&self) -> &[SchemaVariant] {
        &self.schemas
    }

    pub fn primary(&self) -> &DocumentFragment {
        &self.primary
    }

    pub fn secondary(&self) -> &[DocumentFragment] {
        &self.secondary
    }

    pub fn expectations(&self) -> &[ExpectationExpr] {
        &self.expectations
    }

    /// Select the schema variant for a query binding.
    ///
    /// An exact match is returned verbatim; otherwise the default variant is
    /// cloned and stamped with the requested binding. The stored default is
    /// never mutated, so repeated selection is idempotent.
    pub fn schema_for(&self, query_binding: &str) -> Result<SchemaVariant, PopulateError> {
        for variant in &self.schemas {
            if variant.query_binding.as_deref().unwrap_or("") == query_binding {
                return Ok(variant.clone());
            }
        }
        let default = self
            .schemas
            .iter()
            .find(|v| v.query_binding.is_none())
            .ok_or_else(|| PopulateError::NoSchemaVariant {
                query_binding: query_binding.to_string(),
            })?;
        Ok(default.with_query_binding(query_binding))
    }
}
