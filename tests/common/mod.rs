//! Shared test doubles and fixture builders.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use schematron_testsuite::dom::Document;
use schematron_testsuite::error::PipelineError;
use schematron_testsuite::pipeline::{CompiledSchema, Validator};
use schematron_testsuite::testcase::{TESTSUITE_NS, SCHEMATRON_NS};

pub const SVRL_NS: &str = "http://purl.oclc.org/dsdl/svrl";

pub fn valid_report() -> String {
    format!(
        r#"<svrl:schematron-output xmlns:svrl="{}"><svrl:fired-rule context="/"/></svrl:schematron-output>"#,
        SVRL_NS
    )
}

pub fn invalid_report() -> String {
    format!(
        r#"<svrl:schematron-output xmlns:svrl="{}"><svrl:failed-assert test="false()" location="/doc"><svrl:text>boom</svrl:text></svrl:failed-assert></svrl:schematron-output>"#,
        SVRL_NS
    )
}

/// Scripted behavior for the stub backend.
#[derive(Debug, Clone)]
pub enum StubBehavior {
    /// Execution succeeds and yields this report document.
    Report(String),
    /// Execution succeeds without producing a report.
    NoReport,
    /// Schema compilation fails.
    CompileError(String),
    /// Execution fails.
    ExecuteError(String),
}

/// Hand-written validator double with scripted behavior and a call log.
pub struct StubValidator {
    features: BTreeSet<String>,
    query_binding: String,
    behavior: StubBehavior,
    pub compiled_schemas: Mutex<Vec<PathBuf>>,
}

impl StubValidator {
    pub fn new(behavior: StubBehavior) -> Self {
        Self {
            features: BTreeSet::new(),
            query_binding: "xslt2".to_string(),
            behavior,
            compiled_schemas: Mutex::new(Vec::new()),
        }
    }

    pub fn with_features(mut self, features: &[&str]) -> Self {
        self.features = features.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_query_binding(mut self, query_binding: &str) -> Self {
        self.query_binding = query_binding.to_string();
        self
    }
}

#[async_trait]
impl Validator for StubValidator {
    fn label(&self) -> &str {
        "stub validator 1.0"
    }

    fn query_binding(&self) -> &str {
        &self.query_binding
    }

    fn supported_features(&self) -> &BTreeSet<String> {
        &self.features
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn compile(
        &self,
        schema: &Path,
        _phase: Option<&str>,
    ) -> Result<Box<dyn CompiledSchema>, PipelineError> {
        self.compiled_schemas
            .lock()
            .unwrap()
            .push(schema.to_path_buf());
        match &self.behavior {
            StubBehavior::CompileError(details) => Err(PipelineError::StageCompile {
                stage: 0,
                details: details.clone(),
            }),
            behavior => Ok(Box::new(StubCompiled {
                behavior: behavior.clone(),
            })),
        }
    }
}

struct StubCompiled {
    behavior: StubBehavior,
}

#[async_trait]
impl CompiledSchema for StubCompiled {
    async fn apply(&self, _document: &Path) -> Result<Option<Document>, PipelineError> {
        match &self.behavior {
            StubBehavior::Report(xml) => Ok(Some(Document::parse(xml).unwrap())),
            StubBehavior::NoReport => Ok(None),
            StubBehavior::ExecuteError(details) => Err(PipelineError::Execution {
                details: details.clone(),
            }),
            StubBehavior::CompileError(_) => unreachable!(),
        }
    }
}

/// Build a testcase fixture document.
pub struct TestcaseBuilder {
    id: String,
    expect: String,
    optional: bool,
    features: Option<String>,
    schemas: String,
    body: String,
}

impl TestcaseBuilder {
    pub fn new(id: &str, expect: &str) -> Self {
        Self {
            id: id.to_string(),
            expect: expect.to_string(),
            optional: false,
            features: None,
            schemas: r#"<sch:schema><sch:pattern/></sch:schema>"#.to_string(),
            body: r#"<primary filename="document.xml"><doc/></primary>"#.to_string(),
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn features(mut self, features: &str) -> Self {
        self.features = Some(features.to_string());
        self
    }

    pub fn schemas(mut self, schemas: &str) -> Self {
        self.schemas = schemas.to_string();
        self
    }

    pub fn body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self
    }

    pub fn build(&self) -> String {
        let mut attrs = format!(r#"id="{}" expect="{}""#, self.id, self.expect);
        if self.optional {
            attrs.push_str(r#" optional="true""#);
        }
        if let Some(features) = &self.features {
            attrs.push_str(&format!(r#" features="{}""#, features));
        }
        format!(
            r#"<testcase xmlns="{ts}" xmlns:sch="{sch}" {attrs}>
  <label>testcase {id}</label>
  <schemas>{schemas}</schemas>
  {body}
</testcase>"#,
            ts = TESTSUITE_NS,
            sch = SCHEMATRON_NS,
            attrs = attrs,
            id = self.id,
            schemas = self.schemas,
            body = self.body,
        )
    }
}

/// Parse a fixture string into a spec.
pub fn spec_from(xml: &str) -> schematron_testsuite::TestcaseSpec {
    let doc = Document::parse(xml).expect("fixture parses");
    schematron_testsuite::TestcaseSpec::from_document(doc, Path::new("fixture.xml"))
        .expect("fixture is structurally valid")
}
