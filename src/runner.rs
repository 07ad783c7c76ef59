//! Drives testcases end to end and aggregates the run report.
//!
//! The [`Driver`] runs one testcase through feature gating, population,
//! pipeline execution and the status decision procedure. The
//! [`TestsuiteRunner`] iterates a suite, applies the skip list, downgrades
//! anything unexpected that escapes execution to an error result, and owns
//! the run [`Report`]. Execution is strictly sequential by default; bounded
//! worker concurrency is opt-in.

use std::sync::Arc;

use futures::future::try_join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::dom::Document;
use crate::error::{HarnessError, PipelineError, PopulateError};
use crate::pipeline::Validator;
use crate::populate::{PopulatedTestcase, Populator};
use crate::report::{Report, ValidationResult, ValidationStatus};
use crate::testcase::{ExpectedOutcome, TestcaseSpec};

/// Runs one testcase against one validator backend.
pub struct Driver {
    validator: Arc<dyn Validator>,
    populator: Populator,
}

impl Driver {
    pub fn new(validator: Arc<dyn Validator>, populator: Populator) -> Self {
        Self {
            validator,
            populator,
        }
    }

    pub fn validator(&self) -> &Arc<dyn Validator> {
        &self.validator
    }

    /// Execute one testcase to a terminal status.
    ///
    /// Specification errors (a malformed assertion expression) propagate as
    /// errors and abort the run; everything else ends in a result.
    pub async fn execute(&self, spec: &TestcaseSpec) -> Result<ValidationResult, HarnessError> {
        let missing: Vec<&str> = spec
            .features()
            .iter()
            .filter(|f| !self.validator.supported_features().contains(*f))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Ok(ValidationResult::new(spec, ValidationStatus::Skipped)
                .with_message(format!(
                    "Required features not supported: {}",
                    missing.join(", ")
                )));
        }

        let mut populated = match self
            .populator
            .populate(spec, self.validator.query_binding())
            .await
        {
            Ok(populated) => populated,
            // Assertion compilation failures are authoring bugs; abort.
            Err(PopulateError::Spec(e)) => return Err(e.into()),
            // Sandbox failures are fatal for this testcase only.
            Err(e) => {
                return Ok(ValidationResult::new(spec, ValidationStatus::Error)
                    .with_message(e.to_string()));
            }
        };

        let outcome = self.compile_and_execute(spec, &populated).await;
        let mut result = self.decide(spec, &populated, outcome).await;

        match result.status {
            ValidationStatus::Success | ValidationStatus::Skipped => {
                // Sandbox reclaimed when `populated` drops.
            }
            ValidationStatus::Failure | ValidationStatus::Error => {
                let location = populated.retain();
                result.document = Some(populated.document().to_path_buf());
                result.schema = Some(populated.schema().to_path_buf());
                if populated.report().exists() {
                    result.report_file = Some(populated.report().to_path_buf());
                }
                info!(
                    testcase = spec.id(),
                    sandbox = %location.display(),
                    "sandbox retained for inspection"
                );
            }
        }
        Ok(result)
    }

    async fn compile_and_execute(
        &self,
        spec: &TestcaseSpec,
        populated: &PopulatedTestcase,
    ) -> Result<Option<Document>, PipelineError> {
        let compiled = self
            .validator
            .compile(populated.schema(), spec.phase())
            .await?;
        self.validator
            .execute(compiled.as_ref(), populated.document())
            .await
    }

    async fn decide(
        &self,
        spec: &TestcaseSpec,
        populated: &PopulatedTestcase,
        outcome: Result<Option<Document>, PipelineError>,
    ) -> ValidationResult {
        let report = match outcome {
            Err(e) => {
                let status = if spec.expected() == ExpectedOutcome::Error {
                    ValidationStatus::Success
                } else {
                    ValidationStatus::Failure
                };
                return ValidationResult::new(spec, status).with_message(e.to_string());
            }
            Ok(report) => report,
        };

        let Some(report) = report else {
            if spec.expectations().is_empty() {
                return ValidationResult::new(spec, ValidationStatus::Error)
                    .with_message("Validator did not produce a report");
            }
            return ValidationResult::new(spec, ValidationStatus::Failure)
                .with_message("Cannot check expectations because there is no report");
        };

        if let Err(e) = tokio::fs::write(
            populated.report(),
            report.serialize().map(String::into_bytes).unwrap_or_default(),
        )
        .await
        {
            warn!(testcase = spec.id(), error = %e, "unable to write report file");
        }

        let actual_valid = self.validator.is_valid(&report);
        let outcome_matches = actual_valid == (spec.expected() == ExpectedOutcome::Valid);

        // Assertions are only meaningful once the base validity judgment is
        // correct, so an outcome mismatch wins the error message.
        if !outcome_matches {
            return ValidationResult::new(spec, ValidationStatus::Failure)
                .with_message(format!(
                    "Expected {} but the validation result was {}",
                    spec.expected().as_str(),
                    if actual_valid { "valid" } else { "invalid" }
                ))
                .with_report(report);
        }

        for assertion in populated.assertions() {
            match assertion.test(&report) {
                Ok(true) => {}
                Ok(false) => {
                    return ValidationResult::new(spec, ValidationStatus::Failure)
                        .with_message(format!(
                            "Expectation not satisfied: {}",
                            assertion.source()
                        ))
                        .with_report(report);
                }
                Err(e) => {
                    return ValidationResult::new(spec, ValidationStatus::Failure)
                        .with_message(e.to_string())
                        .with_report(report);
                }
            }
        }

        ValidationResult::new(spec, ValidationStatus::Success).with_report(report)
    }
}

/// Orchestrates a whole suite run.
pub struct TestsuiteRunner {
    driver: Arc<Driver>,
    skip_ids: Vec<String>,
    concurrency: usize,
}

impl TestsuiteRunner {
    pub fn new(driver: Driver) -> Self {
        Self {
            driver: Arc::new(driver),
            skip_ids: Vec::new(),
            concurrency: 1,
        }
    }

    /// Testcase ids excluded from execution.
    pub fn with_skip_ids(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.skip_ids = ids.into_iter().collect();
        self
    }

    /// Number of worker tasks. One (the default) is strictly sequential.
    pub fn with_concurrency(mut self, workers: usize) -> Self {
        self.concurrency = workers.max(1);
        self
    }

    pub async fn run(
        &self,
        label: &str,
        testcases: &[TestcaseSpec],
    ) -> Result<Report, HarnessError> {
        info!(suite = label, testcases = testcases.len(), "starting run");

        let mut report = Report::new();
        report.set_label(label);
        report.set_product(self.driver.validator().label());
        report.set_query_binding(self.driver.validator().query_binding());

        if self.concurrency <= 1 {
            for spec in testcases {
                let result = self.execute_one(spec).await?;
                report.add_result(result);
            }
        } else {
            // Workers run in parallel; aggregation happens after the join,
            // in input order, so the report stays deterministic.
            let semaphore = Arc::new(Semaphore::new(self.concurrency));
            let tasks: Vec<_> = testcases
                .iter()
                .map(|spec| {
                    let runner_driver = Arc::clone(&self.driver);
                    let semaphore = Arc::clone(&semaphore);
                    let skip = self.skip_ids.contains(&spec.id().to_string());
                    let spec = spec.clone();
                    tokio::spawn(async move {
                        let _permit =
                            semaphore.acquire().await.map_err(|e| HarnessError::Concurrency {
                                details: e.to_string(),
                            })?;
                        execute_one_inner(&runner_driver, &spec, skip).await
                    })
                })
                .collect();

            let joined = try_join_all(tasks)
                .await
                .map_err(|e| HarnessError::Concurrency {
                    details: format!("task join error: {}", e),
                })?;
            for result in joined {
                report.add_result(result?);
            }
        }

        info!(
            suite = label,
            total = report.count_total(),
            success = report.count_success(),
            failure = report.count_failure(),
            skipped = report.count_skipped(),
            error = report.count_error(),
            "run finished"
        );
        Ok(report)
    }

    async fn execute_one(&self, spec: &TestcaseSpec) -> Result<ValidationResult, HarnessError> {
        let skip = self.skip_ids.contains(&spec.id().to_string());
        execute_one_inner(&self.driver, spec, skip).await
    }
}

async fn execute_one_inner(
    driver: &Driver,
    spec: &TestcaseSpec,
    skip: bool,
) -> Result<ValidationResult, HarnessError> {
    info!(testcase = spec.id(), "running testcase");
    if skip {
        let result = ValidationResult::new(spec, ValidationStatus::Skipped);
        info!(testcase = spec.id(), status = result.status.as_str(), "finished");
        return Ok(result);
    }

    let result = match driver.execute(spec).await {
        Ok(result) => result,
        // Specification errors abort the whole run.
        Err(e @ HarnessError::Spec(_)) => return Err(e),
        // Anything else escaping execution is downgraded so one broken
        // testcase never aborts the run.
        Err(e) => {
            debug!(testcase = spec.id(), error = %e, "downgrading escaped error");
            ValidationResult::new(spec, ValidationStatus::Error).with_message(e.to_string())
        }
    };
    info!(testcase = spec.id(), status = result.status.as_str(), "finished");
    Ok(result)
}
