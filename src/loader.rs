//! Loading of testcase and testsuite fixture documents.
//!
//! Loaders are explicitly constructed values with no process-wide parser
//! state, so parallel runs never contend. Malformed fixtures are
//! specification errors and abort the run.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use tracing::debug;

use crate::dom::Document;
use crate::error::{HarnessError, SpecError};
use crate::testcase::{TestcaseSpec, TESTSUITE_NS};

/// A parsed testsuite manifest: a titled, ordered collection of testcases.
#[derive(Debug)]
pub struct Testsuite {
    title: String,
    query_binding: Option<String>,
    testcases: Vec<TestcaseSpec>,
}

impl Testsuite {
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn query_binding(&self) -> Option<&str> {
        self.query_binding.as_deref()
    }

    pub fn testcases(&self) -> &[TestcaseSpec] {
        &self.testcases
    }
}

/// Parses fixture documents into specs.
#[derive(Debug, Clone, Default)]
pub struct TestcaseLoader;

impl TestcaseLoader {
    pub fn new() -> Self {
        Self
    }

    pub async fn load_testcase(&self, path: &Path) -> Result<TestcaseSpec, HarnessError> {
        debug!(path = %path.display(), "loading testcase");
        let text = tokio::fs::read_to_string(path).await?;
        let document = Document::parse(&text).map_err(|e| SpecError::MalformedTestcase {
            path: path.to_path_buf(),
            details: e.to_string(),
        })?;
        Ok(TestcaseSpec::from_document(document, path)?)
    }

    /// Load every testcase file under `dir`, in deterministic order.
    pub async fn load_directory(&self, dir: &Path) -> Result<Vec<TestcaseSpec>, HarnessError> {
        let mut testcases = Vec::new();
        for path in discover_testcases(dir) {
            testcases.push(self.load_testcase(&path).await?);
        }
        Ok(testcases)
    }

    /// Load a testsuite manifest; testcase references resolve relative to
    /// the manifest's own location.
    pub async fn load_testsuite(&self, path: &Path) -> Result<Testsuite, HarnessError> {
        debug!(path = %path.display(), "loading testsuite");
        let malformed = |details: String| SpecError::MalformedTestsuite {
            path: path.to_path_buf(),
            details,
        };

        let text = tokio::fs::read_to_string(path).await?;
        let document = Document::parse(&text).map_err(|e| malformed(e.to_string()))?;

        let root = document
            .root_element()
            .ok_or_else(|| malformed("no root element".to_string()))?;
        let root_name = document.element_name(root).unwrap();
        if root_name.namespace != TESTSUITE_NS || root_name.local != "testsuite" {
            return Err(malformed(format!(
                "root element must be testsuite in {}, found {}",
                TESTSUITE_NS,
                root_name.lexical()
            ))
            .into());
        }

        let title = document
            .elements_by_ns(root, TESTSUITE_NS, "title")
            .first()
            .map(|&node| document.text_content(node).trim().to_string())
            .unwrap_or_default();
        let query_binding = document
            .attribute(root, "queryBinding")
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let mut testcases = Vec::new();
        for node in document.elements_by_ns(root, TESTSUITE_NS, "testcase") {
            let href = document
                .attribute(node, "href")
                .filter(|v| !v.is_empty())
                .ok_or_else(|| malformed("testcase reference without href".to_string()))?;
            testcases.push(self.load_testcase(&base.join(href)).await?);
        }

        Ok(Testsuite {
            title,
            query_binding,
            testcases,
        })
    }
}

/// Lazy, restartable walk over `dir` yielding testcase files (`*.xml`) in
/// deterministic order.
pub fn discover_testcases(dir: &Path) -> impl Iterator<Item = PathBuf> {
    WalkBuilder::new(dir)
        .standard_filters(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("xml"))
        })
}
