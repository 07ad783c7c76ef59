//! Materializes a testcase into an isolated filesystem sandbox.
//!
//! Every `populate` call creates a fresh temporary directory with a random
//! unique name, so concurrent calls never collide. The sandbox is reclaimed
//! when the [`PopulatedTestcase`] is dropped unless it was retained for
//! debugging.

use std::path::{Component, Path, PathBuf};

use tempfile::TempDir;
use tokio::fs;

use crate::error::PopulateError;
use crate::namespaces::Namespaces;
use crate::testcase::{DocumentFragment, TestcaseSpec};
use crate::xpath::XPath;

const SCHEMA_FILENAME: &str = "schema.sch";
const REPORT_FILENAME: &str = "report.xml";

/// A testcase materialized to disk, bound to one sandbox directory.
#[derive(Debug)]
pub struct PopulatedTestcase {
    dir: Option<TempDir>,
    path: PathBuf,
    schema: PathBuf,
    document: PathBuf,
    report: PathBuf,
    assertions: Vec<XPath>,
}

impl PopulatedTestcase {
    pub fn sandbox_path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> &Path {
        &self.schema
    }

    pub fn document(&self) -> &Path {
        &self.document
    }

    /// Target path the validation report is serialized to.
    pub fn report(&self) -> &Path {
        &self.report
    }

    pub fn assertions(&self) -> &[XPath] {
        &self.assertions
    }

    /// Keep the sandbox on disk past this value's lifetime and return its
    /// location, so failed testcases can be inspected.
    pub fn retain(&mut self) -> PathBuf {
        if let Some(dir) = self.dir.take() {
            dir.keep()
        } else {
            self.path.clone()
        }
    }
}

/// Creates sandbox directories and writes testcase files into them.
#[derive(Debug, Clone, Default)]
pub struct Populator {
    base_dir: Option<PathBuf>,
}

impl Populator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create sandboxes under `dir` instead of the system temp directory.
    pub fn with_base_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(dir.into()),
        }
    }

    /// Materialize `spec` for `query_binding`: select and write the schema,
    /// write the primary and all secondary documents, compile assertions.
    pub async fn populate(
        &self,
        spec: &TestcaseSpec,
        query_binding: &str,
    ) -> Result<PopulatedTestcase, PopulateError> {
        let dir = self.create_sandbox()?;
        let sandbox = dir.path().to_path_buf();

        let variant = spec.schema_for(query_binding)?;
        let schema = sandbox.join(SCHEMA_FILENAME);
        fs::write(&schema, variant.serialize().map_err(PopulateError::Spec)?).await?;

        let document = self.write_fragment(spec, spec.primary(), &sandbox).await?;
        for fragment in spec.secondary() {
            self.write_fragment(spec, fragment, &sandbox).await?;
        }

        let mut assertions = Vec::with_capacity(spec.expectations().len());
        for expectation in spec.expectations() {
            let namespaces = Namespaces::from_element(spec.document(), expectation.element())?;
            assertions.push(XPath::compile(expectation.source(), &namespaces)?);
        }

        Ok(PopulatedTestcase {
            path: sandbox.clone(),
            dir: Some(dir),
            schema,
            document,
            report: sandbox.join(REPORT_FILENAME),
            assertions,
        })
    }

    fn create_sandbox(&self) -> Result<TempDir, PopulateError> {
        let builder_result = match &self.base_dir {
            Some(base) => {
                std::fs::create_dir_all(base)?;
                tempfile::Builder::new().prefix("testsuite-").tempdir_in(base)
            }
            None => tempfile::Builder::new().prefix("testsuite-").tempdir(),
        };
        Ok(builder_result?)
    }

    /// Write one document wrapper to its declared relative path. Text nodes
    /// of the wrapper are incidental whitespace; the first element child is
    /// the file content.
    async fn write_fragment(
        &self,
        spec: &TestcaseSpec,
        fragment: &DocumentFragment,
        sandbox: &Path,
    ) -> Result<PathBuf, PopulateError> {
        let target = resolve_inside(sandbox, fragment.filename())?;

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = spec
            .document()
            .child_elements(fragment.wrapper())
            .next()
            .ok_or_else(|| {
                PopulateError::Spec(crate::error::SpecError::MalformedTestcase {
                    path: spec.path().to_path_buf(),
                    details: format!(
                        "document wrapper '{}' has no element content",
                        fragment.filename()
                    ),
                })
            })?;
        let standalone = spec.document().extract_subtree(content);
        fs::write(&target, standalone.serialize().map_err(PopulateError::Spec)?).await?;
        Ok(target)
    }
}

/// Resolve `filename` against `sandbox`, rejecting absolute paths and any
/// traversal that would land outside the sandbox. Purely lexical, so the
/// check happens before anything is written.
fn resolve_inside(sandbox: &Path, filename: &str) -> Result<PathBuf, PopulateError> {
    let escape = || PopulateError::PathEscape {
        filename: filename.to_string(),
    };

    let relative = Path::new(filename);
    if relative.is_absolute() {
        return Err(escape());
    }

    let mut stack: Vec<&std::ffi::OsStr> = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => stack.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if stack.pop().is_none() {
                    return Err(escape());
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(escape()),
        }
    }
    if stack.is_empty() {
        return Err(escape());
    }

    let mut target = sandbox.to_path_buf();
    for part in stack {
        target.push(part);
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Document;
    use crate::testcase::{SCHEMATRON_NS, TESTSUITE_NS};

    fn spec(body: &str) -> TestcaseSpec {
        let xml = format!(
            r#"<testcase xmlns="{ts}" xmlns:sch="{sch}" id="t-001" expect="valid">
  <label>populate test</label>
  <schemas>
    <sch:schema><sch:pattern/></sch:schema>
  </schemas>
  {body}
</testcase>"#,
            ts = TESTSUITE_NS,
            sch = SCHEMATRON_NS,
            body = body,
        );
        let doc = Document::parse(&xml).unwrap();
        TestcaseSpec::from_document(doc, Path::new("populate-test.xml")).unwrap()
    }

    fn primary_only() -> TestcaseSpec {
        spec(r#"<primary filename="document.xml"><doc><value>1</value></doc></primary>"#)
    }

    #[tokio::test]
    async fn test_populate_writes_schema_and_document() {
        let populator = Populator::new();
        let populated = populator.populate(&primary_only(), "xslt2").await.unwrap();

        let schema = std::fs::read_to_string(populated.schema()).unwrap();
        assert!(schema.contains("queryBinding=\"xslt2\""));
        assert!(schema.contains("pattern"));

        let document = std::fs::read_to_string(populated.document()).unwrap();
        assert!(document.contains("<value>1</value>"));

        assert!(populated.report().starts_with(populated.sandbox_path()));
        assert!(populated.document().starts_with(populated.sandbox_path()));
    }

    #[tokio::test]
    async fn test_sandboxes_do_not_collide() {
        let populator = Populator::new();
        let spec = primary_only();
        let a = populator.populate(&spec, "xslt2").await.unwrap();
        let b = populator.populate(&spec, "xslt2").await.unwrap();
        assert_ne!(a.sandbox_path(), b.sandbox_path());
    }

    #[tokio::test]
    async fn test_sandbox_reclaimed_on_drop() {
        let populator = Populator::new();
        let populated = populator.populate(&primary_only(), "xslt2").await.unwrap();
        let path = populated.sandbox_path().to_path_buf();
        assert!(path.exists());
        drop(populated);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_retain_keeps_sandbox() {
        let populator = Populator::new();
        let mut populated = populator.populate(&primary_only(), "xslt2").await.unwrap();
        let retained = populated.retain();
        drop(populated);
        assert!(retained.exists());
        std::fs::remove_dir_all(retained).unwrap();
    }

    #[tokio::test]
    async fn test_secondary_documents_with_subdirectories() {
        let testcase = spec(
            r#"<primary filename="document.xml"><doc/></primary>
<secondary filename="data/extra.xml">
  <extra>content</extra>
</secondary>"#,
        );
        let populator = Populator::new();
        let populated = populator.populate(&testcase, "xslt2").await.unwrap();

        let extra = populated.sandbox_path().join("data/extra.xml");
        let content = std::fs::read_to_string(extra).unwrap();
        // Wrapper whitespace is stripped; only the element child lands.
        assert!(content.contains("<extra>content</extra>"));
    }

    #[tokio::test]
    async fn test_path_escape_rejected() {
        let testcase = spec(
            r#"<primary filename="document.xml"><doc/></primary>
<secondary filename="../../etc/passes"><x/></secondary>"#,
        );
        let populator = Populator::new();
        let err = populator.populate(&testcase, "xslt2").await.unwrap_err();
        assert!(matches!(err, PopulateError::PathEscape { .. }));
    }

    #[tokio::test]
    async fn test_absolute_path_rejected() {
        let testcase = spec(
            r#"<primary filename="/etc/passes"><doc/></primary>"#,
        );
        let populator = Populator::new();
        let err = populator.populate(&testcase, "xslt2").await.unwrap_err();
        assert!(matches!(err, PopulateError::PathEscape { .. }));
    }

    #[tokio::test]
    async fn test_assertions_compiled_with_local_namespaces() {
        let testcase = spec(
            r#"<primary filename="document.xml"><doc/></primary>
<expectation xmlns:svrl="http://purl.oclc.org/dsdl/svrl" test="count(//svrl:failed-assert) = 0"/>"#,
        );
        let populator = Populator::new();
        let populated = populator.populate(&testcase, "xslt2").await.unwrap();
        assert_eq!(populated.assertions().len(), 1);

        let report = Document::parse(
            r#"<out xmlns:svrl="http://purl.oclc.org/dsdl/svrl"><svrl:fired-rule/></out>"#,
        )
        .unwrap();
        assert!(populated.assertions()[0].test(&report).unwrap());
    }

    #[tokio::test]
    async fn test_malformed_assertion_is_population_error() {
        let testcase = spec(
            r#"<primary filename="document.xml"><doc/></primary>
<expectation test="count(//undeclared:x) = 0"/>"#,
        );
        let populator = Populator::new();
        let err = populator.populate(&testcase, "xslt2").await.unwrap_err();
        assert!(matches!(err, PopulateError::Spec(_)));
    }

    #[test]
    fn test_resolve_inside_variants() {
        let sandbox = Path::new("/sandbox");
        assert!(resolve_inside(sandbox, "a.xml").is_ok());
        assert!(resolve_inside(sandbox, "sub/dir/a.xml").is_ok());
        assert!(resolve_inside(sandbox, "sub/../a.xml").is_ok());
        assert!(resolve_inside(sandbox, "./a.xml").is_ok());
        assert!(resolve_inside(sandbox, "..").is_err());
        assert!(resolve_inside(sandbox, "sub/../../a.xml").is_err());
        assert!(resolve_inside(sandbox, "/abs.xml").is_err());
        assert!(resolve_inside(sandbox, "").is_err());
    }
}
