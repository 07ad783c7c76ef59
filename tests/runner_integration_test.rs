//! End-to-end decision-procedure tests with a scripted validator backend.

mod common;

use std::sync::Arc;

use tempfile::TempDir;

use common::{
    invalid_report, spec_from, valid_report, StubBehavior, StubValidator, TestcaseBuilder,
};
use schematron_testsuite::pipeline::Validator;
use schematron_testsuite::populate::Populator;
use schematron_testsuite::report::ValidationStatus;
use schematron_testsuite::runner::{Driver, TestsuiteRunner};
use schematron_testsuite::{HarnessError, TestcaseSpec};

fn driver_with(stub: StubValidator, sandbox_base: &TempDir) -> (Arc<StubValidator>, Driver) {
    let stub = Arc::new(stub);
    let validator: Arc<dyn Validator> = stub.clone();
    let driver = Driver::new(
        validator,
        Populator::with_base_dir(sandbox_base.path().join("sandboxes")),
    );
    (stub, driver)
}

fn sandbox_count(base: &TempDir) -> usize {
    let dir = base.path().join("sandboxes");
    if !dir.exists() {
        return 0;
    }
    std::fs::read_dir(dir).unwrap().count()
}

async fn run_single(spec: &TestcaseSpec, behavior: StubBehavior) -> ValidationStatus {
    let base = TempDir::new().unwrap();
    let (_, driver) = driver_with(StubValidator::new(behavior), &base);
    driver.execute(spec).await.unwrap().status
}

#[tokio::test]
async fn test_valid_outcome_and_no_assertions_is_success() {
    let spec = spec_from(&TestcaseBuilder::new("e2e-01", "valid").build());
    let status = run_single(&spec, StubBehavior::Report(valid_report())).await;
    assert_eq!(status, ValidationStatus::Success);
}

#[tokio::test]
async fn test_failed_assert_node_is_failure() {
    let spec = spec_from(&TestcaseBuilder::new("e2e-02", "valid").build());
    let base = TempDir::new().unwrap();
    let (_, driver) = driver_with(
        StubValidator::new(StubBehavior::Report(invalid_report())),
        &base,
    );
    let result = driver.execute(&spec).await.unwrap();
    assert_eq!(result.status, ValidationStatus::Failure);
    assert!(result
        .error_message
        .as_deref()
        .unwrap()
        .contains("Expected valid"));
}

#[tokio::test]
async fn test_expected_invalid_with_failed_assert_is_success() {
    let spec = spec_from(&TestcaseBuilder::new("e2e-03", "invalid").build());
    let status = run_single(&spec, StubBehavior::Report(invalid_report())).await;
    assert_eq!(status, ValidationStatus::Success);
}

#[tokio::test]
async fn test_pipeline_error_with_expected_error_is_success() {
    let spec = spec_from(&TestcaseBuilder::new("e2e-04", "error").build());
    let status = run_single(
        &spec,
        StubBehavior::CompileError("stage 1 exploded".to_string()),
    )
    .await;
    assert_eq!(status, ValidationStatus::Success);
}

#[tokio::test]
async fn test_pipeline_error_with_expected_valid_is_failure() {
    let spec = spec_from(&TestcaseBuilder::new("e2e-05", "valid").build());
    let base = TempDir::new().unwrap();
    let (_, driver) = driver_with(
        StubValidator::new(StubBehavior::ExecuteError("engine crashed".to_string())),
        &base,
    );
    let result = driver.execute(&spec).await.unwrap();
    assert_eq!(result.status, ValidationStatus::Failure);
    assert!(result.error_message.as_deref().unwrap().contains("engine crashed"));
}

#[tokio::test]
async fn test_unmet_features_skip_without_population() {
    let spec = spec_from(
        &TestcaseBuilder::new("e2e-06", "valid")
            .features("svrl")
            .build(),
    );
    let base = TempDir::new().unwrap();
    let (stub, driver) = driver_with(StubValidator::new(StubBehavior::Report(valid_report())), &base);

    let result = driver.execute(&spec).await.unwrap();
    assert_eq!(result.status, ValidationStatus::Skipped);
    assert!(result.error_message.as_deref().unwrap().contains("svrl"));

    // The populator never ran and the pipeline was never invoked.
    assert_eq!(sandbox_count(&base), 0);
    assert!(stub.compiled_schemas.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_met_features_run() {
    let spec = spec_from(
        &TestcaseBuilder::new("e2e-07", "valid")
            .features("svrl xslt2")
            .build(),
    );
    let base = TempDir::new().unwrap();
    let (_, driver) = driver_with(
        StubValidator::new(StubBehavior::Report(valid_report())).with_features(&["svrl", "xslt2"]),
        &base,
    );
    let result = driver.execute(&spec).await.unwrap();
    assert_eq!(result.status, ValidationStatus::Success);
}

#[tokio::test]
async fn test_true_assertion_passes() {
    let spec = spec_from(
        &TestcaseBuilder::new("e2e-08", "valid")
            .body(
                r#"<primary filename="document.xml"><doc/></primary>
<expectation xmlns:svrl="http://purl.oclc.org/dsdl/svrl" test="count(//svrl:fired-rule) = 1"/>"#,
            )
            .build(),
    );
    let status = run_single(&spec, StubBehavior::Report(valid_report())).await;
    assert_eq!(status, ValidationStatus::Success);
}

#[tokio::test]
async fn test_false_assertion_with_matching_outcome_is_failure() {
    let spec = spec_from(
        &TestcaseBuilder::new("e2e-09", "valid")
            .body(
                r#"<primary filename="document.xml"><doc/></primary>
<expectation xmlns:svrl="http://purl.oclc.org/dsdl/svrl" test="count(//svrl:fired-rule) = 2"/>"#,
            )
            .build(),
    );
    let base = TempDir::new().unwrap();
    let (_, driver) = driver_with(
        StubValidator::new(StubBehavior::Report(valid_report())),
        &base,
    );
    let result = driver.execute(&spec).await.unwrap();
    assert_eq!(result.status, ValidationStatus::Failure);
    // Outcome matched, so the message names the failing expectation.
    assert!(result
        .error_message
        .as_deref()
        .unwrap()
        .contains("count(//svrl:fired-rule) = 2"));
}

#[tokio::test]
async fn test_outcome_mismatch_wins_over_assertion_text() {
    let spec = spec_from(
        &TestcaseBuilder::new("e2e-10", "invalid")
            .body(
                r#"<primary filename="document.xml"><doc/></primary>
<expectation xmlns:svrl="http://purl.oclc.org/dsdl/svrl" test="count(//svrl:failed-assert) = 1"/>"#,
            )
            .build(),
    );
    let base = TempDir::new().unwrap();
    let (_, driver) = driver_with(
        StubValidator::new(StubBehavior::Report(valid_report())),
        &base,
    );
    let result = driver.execute(&spec).await.unwrap();
    assert_eq!(result.status, ValidationStatus::Failure);
    let message = result.error_message.as_deref().unwrap();
    assert!(message.contains("Expected invalid"));
    assert!(!message.contains("count(//svrl:failed-assert)"));
}

#[tokio::test]
async fn test_assertions_without_report_is_failure() {
    let spec = spec_from(
        &TestcaseBuilder::new("e2e-11", "valid")
            .body(
                r#"<primary filename="document.xml"><doc/></primary>
<expectation xmlns:svrl="http://purl.oclc.org/dsdl/svrl" test="//svrl:fired-rule"/>"#,
            )
            .build(),
    );
    let base = TempDir::new().unwrap();
    let (_, driver) = driver_with(StubValidator::new(StubBehavior::NoReport), &base);
    let result = driver.execute(&spec).await.unwrap();
    assert_eq!(result.status, ValidationStatus::Failure);
    assert!(result
        .error_message
        .as_deref()
        .unwrap()
        .contains("Cannot check expectations"));
}

#[tokio::test]
async fn test_sandbox_retained_on_failure_reclaimed_on_success() {
    let base = TempDir::new().unwrap();
    let (_, driver) = driver_with(
        StubValidator::new(StubBehavior::Report(invalid_report())),
        &base,
    );

    let failing = spec_from(&TestcaseBuilder::new("e2e-12", "valid").build());
    let result = driver.execute(&failing).await.unwrap();
    assert_eq!(result.status, ValidationStatus::Failure);
    assert_eq!(sandbox_count(&base), 1);
    assert!(result.document.as_deref().unwrap().exists());
    assert!(result.schema.as_deref().unwrap().exists());

    let passing = spec_from(&TestcaseBuilder::new("e2e-13", "invalid").build());
    let result = driver.execute(&passing).await.unwrap();
    assert_eq!(result.status, ValidationStatus::Success);
    // Only the failed sandbox remains.
    assert_eq!(sandbox_count(&base), 1);
}

#[tokio::test]
async fn test_sandbox_error_is_error_result_and_run_continues() {
    let escape = spec_from(
        &TestcaseBuilder::new("e2e-14", "valid")
            .body(
                r#"<primary filename="document.xml"><doc/></primary>
<secondary filename="../../etc/passes"><x/></secondary>"#,
            )
            .build(),
    );
    let fine = spec_from(&TestcaseBuilder::new("e2e-15", "valid").build());

    let base = TempDir::new().unwrap();
    let (_, driver) = driver_with(
        StubValidator::new(StubBehavior::Report(valid_report())),
        &base,
    );
    let runner = TestsuiteRunner::new(driver);
    let report = runner.run("escape run", &[escape, fine]).await.unwrap();

    assert_eq!(report.count_error(), 1);
    assert_eq!(report.count_success(), 1);
    assert_eq!(report.results()[0].status, ValidationStatus::Error);
    assert_eq!(report.results()[1].status, ValidationStatus::Success);
}

#[tokio::test]
async fn test_skip_list_short_circuits() {
    let spec = spec_from(&TestcaseBuilder::new("skip-me", "valid").build());
    let base = TempDir::new().unwrap();
    let (stub, driver) = driver_with(
        StubValidator::new(StubBehavior::Report(valid_report())),
        &base,
    );
    let runner = TestsuiteRunner::new(driver).with_skip_ids(["skip-me".to_string()]);
    let report = runner.run("skip run", &[spec]).await.unwrap();

    assert_eq!(report.count_skipped(), 1);
    assert_eq!(sandbox_count(&base), 0);
    assert!(stub.compiled_schemas.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_assertion_aborts_run() {
    let broken = spec_from(
        &TestcaseBuilder::new("e2e-16", "valid")
            .body(
                r#"<primary filename="document.xml"><doc/></primary>
<expectation test="//undeclared:x"/>"#,
            )
            .build(),
    );
    let base = TempDir::new().unwrap();
    let (_, driver) = driver_with(
        StubValidator::new(StubBehavior::Report(valid_report())),
        &base,
    );
    let runner = TestsuiteRunner::new(driver);
    let err = runner.run("fatal run", &[broken]).await.unwrap_err();
    assert!(matches!(err, HarnessError::Spec(_)));
}

#[tokio::test]
async fn test_optional_failure_keeps_run_green() {
    let optional = spec_from(
        &TestcaseBuilder::new("e2e-17", "valid")
            .optional()
            .build(),
    );
    let base = TempDir::new().unwrap();
    let (_, driver) = driver_with(
        StubValidator::new(StubBehavior::Report(invalid_report())),
        &base,
    );
    let runner = TestsuiteRunner::new(driver);
    let report = runner.run("optional run", &[optional]).await.unwrap();

    assert_eq!(report.count_failure(), 1);
    assert!(report.is_success());
}

#[tokio::test]
async fn test_concurrent_run_preserves_input_order() {
    let specs: Vec<TestcaseSpec> = (0..6)
        .map(|i| spec_from(&TestcaseBuilder::new(&format!("c-{:02}", i), "valid").build()))
        .collect();

    let base = TempDir::new().unwrap();
    let (_, driver) = driver_with(
        StubValidator::new(StubBehavior::Report(valid_report())),
        &base,
    );
    let runner = TestsuiteRunner::new(driver).with_concurrency(3);
    let report = runner.run("concurrent run", &specs).await.unwrap();

    assert_eq!(report.count_total(), 6);
    assert_eq!(report.count_success(), 6);
    let ids: Vec<&str> = report.results().iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["c-00", "c-01", "c-02", "c-03", "c-04", "c-05"]);
}

#[tokio::test]
async fn test_populated_schema_declares_validator_binding() {
    // Expect a failure so the sandbox (and the written schema) is retained.
    let spec = spec_from(
        &TestcaseBuilder::new("e2e-19", "invalid")
            .schemas(r#"<sch:schema><sch:title>default variant</sch:title></sch:schema>"#)
            .build(),
    );
    let base = TempDir::new().unwrap();
    let (stub, driver) = driver_with(
        StubValidator::new(StubBehavior::Report(valid_report())).with_query_binding("xslt3"),
        &base,
    );
    let result = driver.execute(&spec).await.unwrap();
    assert_eq!(result.status, ValidationStatus::Failure);

    // The default variant was cloned and stamped with the backend's binding
    // before it reached the pipeline.
    let compiled = stub.compiled_schemas.lock().unwrap();
    let schema = std::fs::read_to_string(&compiled[0]).unwrap();
    assert!(schema.contains("queryBinding=\"xslt3\""));
    assert!(schema.contains("default variant"));
}

#[tokio::test]
async fn test_report_metadata_from_validator() {
    let spec = spec_from(&TestcaseBuilder::new("e2e-18", "valid").build());
    let base = TempDir::new().unwrap();
    let (_, driver) = driver_with(
        StubValidator::new(StubBehavior::Report(valid_report())).with_query_binding("xslt3"),
        &base,
    );
    let runner = TestsuiteRunner::new(driver);
    let report = runner.run("metadata run", &[spec]).await.unwrap();

    assert_eq!(report.label(), Some("metadata run"));
    let xml = report.to_xml().unwrap();
    assert!(xml.contains("stub validator 1.0"));
    assert!(xml.contains("queryBinding=\"xslt3\""));
}
