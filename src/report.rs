//! Run-level report: per-testcase results plus incrementally maintained
//! status counters.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::Serialize;
use uuid::Uuid;

use crate::dom::Document;
use crate::error::SpecError;
use crate::testcase::{ExpectedOutcome, TestcaseSpec, TESTSUITE_NS};

/// Terminal status of one testcase execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Success,
    Failure,
    Skipped,
    Error,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Skipped => "skipped",
            Self::Error => "error",
        }
    }
}

/// Outcome of one testcase, immutable after creation.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub id: String,
    pub label: String,
    pub reference: Option<String>,
    pub expected: ExpectedOutcome,
    pub optional: bool,
    pub phase: Option<String>,
    pub status: ValidationStatus,
    pub error_message: Option<String>,
    /// Sandbox file references, present when the testcase was populated and
    /// its sandbox retained.
    pub document: Option<PathBuf>,
    pub schema: Option<PathBuf>,
    pub report_file: Option<PathBuf>,
    /// In-memory validation report, when the pipeline produced one.
    #[serde(skip)]
    pub report: Option<Document>,
}

impl ValidationResult {
    pub fn new(spec: &TestcaseSpec, status: ValidationStatus) -> Self {
        Self {
            id: spec.id().to_string(),
            label: spec.label().to_string(),
            reference: spec.reference().map(str::to_string),
            expected: spec.expected(),
            optional: spec.is_optional(),
            phase: spec.phase().map(str::to_string),
            status,
            error_message: None,
            document: None,
            schema: None,
            report_file: None,
            report: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_report(mut self, report: Document) -> Self {
        self.report = Some(report);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ValidationStatus::Success
    }
}

/// Mutable accumulator over one run. Counters are maintained incrementally;
/// they are never recomputed from the results list.
#[derive(Debug, Serialize)]
pub struct Report {
    run_id: Uuid,
    timestamp: DateTime<Utc>,
    label: Option<String>,
    product: Option<String>,
    query_binding: Option<String>,
    results: Vec<ValidationResult>,
    count_success: usize,
    count_failure: usize,
    count_skipped: usize,
    count_error: usize,
}

impl Report {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            label: None,
            product: None,
            query_binding: None,
            results: Vec::new(),
            count_success: 0,
            count_failure: 0,
            count_skipped: 0,
            count_error: 0,
        }
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = Some(label.into());
    }

    pub fn set_product(&mut self, product: impl Into<String>) {
        self.product = Some(product.into());
    }

    pub fn set_query_binding(&mut self, query_binding: impl Into<String>) {
        self.query_binding = Some(query_binding.into());
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Record one result: increments exactly one counter and appends in
    /// execution order.
    pub fn add_result(&mut self, result: ValidationResult) {
        match result.status {
            ValidationStatus::Success => self.count_success += 1,
            ValidationStatus::Failure => self.count_failure += 1,
            ValidationStatus::Skipped => self.count_skipped += 1,
            ValidationStatus::Error => self.count_error += 1,
        }
        self.results.push(result);
    }

    pub fn results(&self) -> &[ValidationResult] {
        &self.results
    }

    pub fn count_success(&self) -> usize {
        self.count_success
    }

    pub fn count_failure(&self) -> usize {
        self.count_failure
    }

    pub fn count_skipped(&self) -> usize {
        self.count_skipped
    }

    pub fn count_error(&self) -> usize {
        self.count_error
    }

    pub fn count_total(&self) -> usize {
        self.results.len()
    }

    /// True when nothing mandatory failed: failures and errors on testcases
    /// marked optional do not fail the run.
    pub fn is_success(&self) -> bool {
        self.results.iter().all(|result| {
            matches!(
                result.status,
                ValidationStatus::Success | ValidationStatus::Skipped
            ) || result.optional
        })
    }

    /// XML rendition of the run record.
    pub fn to_xml(&self) -> Result<String, SpecError> {
        let xml_err = |e: &dyn std::fmt::Display| SpecError::Xml {
            details: e.to_string(),
        };

        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

        let mut root = BytesStart::new("report");
        root.push_attribute(("xmlns", TESTSUITE_NS));
        root.push_attribute(("id", self.run_id.to_string().as_str()));
        root.push_attribute(("timestamp", self.timestamp.to_rfc3339().as_str()));
        if let Some(query_binding) = &self.query_binding {
            root.push_attribute(("queryBinding", query_binding.as_str()));
        }
        writer.write_event(Event::Start(root)).map_err(|e| xml_err(&e))?;

        let text_element = |writer: &mut Writer<Vec<u8>>,
                            name: &str,
                            content: &str|
         -> Result<(), SpecError> {
            writer
                .write_event(Event::Start(BytesStart::new(name)))
                .map_err(|e| xml_err(&e))?;
            writer
                .write_event(Event::Text(BytesText::new(content)))
                .map_err(|e| xml_err(&e))?;
            writer
                .write_event(Event::End(BytesEnd::new(name)))
                .map_err(|e| xml_err(&e))?;
            Ok(())
        };

        if let Some(label) = &self.label {
            text_element(&mut writer, "label", label)?;
        }
        if let Some(product) = &self.product {
            text_element(&mut writer, "product", product)?;
        }

        for result in &self.results {
            let mut testcase = BytesStart::new("testcase");
            testcase.push_attribute(("id", result.id.as_str()));
            testcase.push_attribute(("expect", result.expected.as_str()));
            testcase.push_attribute(("optional", if result.optional { "true" } else { "false" }));
            testcase.push_attribute(("status", result.status.as_str()));
            if let Some(phase) = &result.phase {
                testcase.push_attribute(("phase", phase.as_str()));
            }
            writer
                .write_event(Event::Start(testcase))
                .map_err(|e| xml_err(&e))?;

            text_element(&mut writer, "label", &result.label)?;
            if let Some(reference) = &result.reference {
                text_element(&mut writer, "reference", reference)?;
            }
            if let Some(message) = &result.error_message {
                text_element(&mut writer, "message", message)?;
            }

            let href_element = |writer: &mut Writer<Vec<u8>>,
                                name: &str,
                                href: &Option<PathBuf>|
             -> Result<(), SpecError> {
                if let Some(path) = href {
                    let mut element = BytesStart::new(name);
                    element.push_attribute(("href", path.to_string_lossy().as_ref()));
                    writer
                        .write_event(Event::Empty(element))
                        .map_err(|e| xml_err(&e))?;
                }
                Ok(())
            };
            href_element(&mut writer, "document", &result.document)?;
            href_element(&mut writer, "schema", &result.schema)?;
            href_element(&mut writer, "report", &result.report_file)?;

            writer
                .write_event(Event::End(BytesEnd::new("testcase")))
                .map_err(|e| xml_err(&e))?;
        }

        writer
            .write_event(Event::End(BytesEnd::new("report")))
            .map_err(|e| xml_err(&e))?;

        let body = String::from_utf8(writer.into_inner()).map_err(|e| xml_err(&e))?;
        Ok(format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}\n", body))
    }
}

impl Default for Report {
    fn default() -> Self {
        Self::new()
    }
}
