//! External-process validation backend.
//!
//! Each compiler stage is a stylesheet invoked as a subprocess; the command
//! line is produced by a configurable [`CommandlineBuilder`] strategy. A
//! non-zero exit code is a hard failure for the stage and aborts the chain.
//! Intermediate files live as tracked temp paths that are deleted on every
//! success or failure path, and every subprocess runs under a bounded wait
//! with forced termination.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempPath;
use tokio::process::Command;
use tracing::debug;

use crate::config::ValidatorConfig;
use crate::dom::Document;
use crate::error::PipelineError;
use crate::pipeline::{CompiledSchema, Validator};

/// One transform invocation, as seen by the commandline strategy.
pub struct Invocation<'a> {
    pub stylesheet: &'a Path,
    pub document: &'a Path,
    pub target: &'a Path,
    pub parameters: &'a BTreeMap<String, String>,
}

/// Strategy producing the full argv for one transform invocation.
pub trait CommandlineBuilder: Send + Sync {
    fn build(&self, invocation: &Invocation<'_>) -> Vec<String>;

    /// Program name, for the availability probe.
    fn program(&self) -> &str;
}

/// Template-driven commandline builder: fixed argument templates with
/// `{stylesheet}`, `{document}` and `{target}` placeholders, plus one
/// argument per stylesheet parameter.
pub struct TemplateCommandline {
    program: String,
    arguments: Vec<String>,
    parameter_argument: Option<String>,
}

impl TemplateCommandline {
    pub fn new(
        program: impl Into<String>,
        arguments: Vec<String>,
        parameter_argument: Option<String>,
    ) -> Self {
        Self {
            program: program.into(),
            arguments,
            parameter_argument,
        }
    }
}

impl CommandlineBuilder for TemplateCommandline {
    fn build(&self, invocation: &Invocation<'_>) -> Vec<String> {
        let substitute = |template: &str| {
            template
                .replace("{stylesheet}", &invocation.stylesheet.to_string_lossy())
                .replace("{document}", &invocation.document.to_string_lossy())
                .replace("{target}", &invocation.target.to_string_lossy())
        };

        let mut argv = vec![self.program.clone()];
        argv.extend(self.arguments.iter().map(|a| substitute(a)));
        if let Some(template) = &self.parameter_argument {
            for (name, value) in invocation.parameters {
                argv.push(template.replace("{name}", name).replace("{value}", value));
            }
        }
        argv
    }

    fn program(&self) -> &str {
        &self.program
    }
}

pub struct CommandlineValidator {
    builder: Arc<dyn CommandlineBuilder>,
    label: String,
    query_binding: String,
    features: BTreeSet<String>,
    stages: Vec<PathBuf>,
    timeout: Duration,
}

impl CommandlineValidator {
    pub fn new(
        builder: Arc<dyn CommandlineBuilder>,
        label: impl Into<String>,
        query_binding: impl Into<String>,
        features: impl IntoIterator<Item = String>,
        stages: Vec<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            builder,
            label: label.into(),
            query_binding: query_binding.into(),
            features: features.into_iter().collect(),
            stages,
            timeout,
        }
    }

    pub fn from_config(config: &ValidatorConfig) -> Result<Self, PipelineError> {
        let builder = TemplateCommandline::new(
            config.program.clone(),
            config.arguments.clone(),
            config.parameter_argument.clone(),
        );
        Ok(Self::new(
            Arc::new(builder),
            config.label.clone(),
            config.query_binding.clone(),
            config.features.iter().cloned(),
            config.compiler_stages.clone(),
            Duration::from_secs(config.timeout_seconds),
        ))
    }

    async fn run_stage(
        &self,
        stylesheet: &Path,
        document: &Path,
        target: &Path,
        parameters: &BTreeMap<String, String>,
    ) -> Result<(), PipelineError> {
        let argv = self.builder.build(&Invocation {
            stylesheet,
            document,
            target,
            parameters,
        });
        let (program, args) = argv.split_first().ok_or_else(|| PipelineError::Execution {
            details: "commandline builder produced an empty command".to_string(),
        })?;

        debug!(command = %argv.join(" "), "invoking external transform");

        let mut command = Command::new(program);
        command.args(args).kill_on_drop(true);

        let status = tokio::time::timeout(self.timeout, command.status())
            .await
            .map_err(|_| PipelineError::Timeout {
                seconds: self.timeout.as_secs(),
            })??;

        if !status.success() {
            return Err(PipelineError::NonZeroExit {
                code: status.code().unwrap_or(-1),
            });
        }
        Ok(())
    }
}

fn temp_target() -> Result<TempPath, PipelineError> {
    let file = tempfile::Builder::new()
        .prefix("stage-")
        .suffix(".xml")
        .tempfile()?;
    Ok(file.into_temp_path())
}

/// Locate `program` the way the shell would; absolute and relative paths
/// are checked directly.
fn program_available(program: &str) -> bool {
    if program.is_empty() {
        return false;
    }
    let path = Path::new(program);
    if path.components().count() > 1 {
        return path.exists();
    }
    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths).any(|dir| dir.join(program).is_file())
        })
        .unwrap_or(false)
}

#[async_trait]
impl Validator for CommandlineValidator {
    fn label(&self) -> &str {
        &self.label
    }

    fn query_binding(&self) -> &str {
        &self.query_binding
    }

    fn supported_features(&self) -> &BTreeSet<String> {
        &self.features
    }

    async fn is_available(&self) -> bool {
        program_available(self.builder.program())
            && self.stages.iter().all(|stage| stage.exists())
    }

    async fn compile(
        &self,
        schema: &Path,
        phase: Option<&str>,
    ) -> Result<Box<dyn CompiledSchema>, PipelineError> {
        let mut parameters = BTreeMap::new();
        if let Some(phase) = phase {
            parameters.insert("phase".to_string(), phase.to_string());
        }

        // Intermediate targets stay alive (and tracked for deletion) until
        // the compiled schema is dropped; on any error the vector unwinds
        // and removes them as well.
        let mut intermediates: Vec<TempPath> = Vec::new();
        let mut source = schema.to_path_buf();

        for stylesheet in &self.stages {
            let target = temp_target()?;
            self.run_stage(stylesheet, &source, &target, &parameters)
                .await?;
            source = target.to_path_buf();
            intermediates.push(target);
        }

        Ok(Box::new(CommandlineCompiled {
            builder: Arc::clone(&self.builder),
            stylesheet: source,
            timeout: self.timeout,
            _intermediates: intermediates,
        }))
    }
}

struct CommandlineCompiled {
    builder: Arc<dyn CommandlineBuilder>,
    /// The compiled validation stylesheet: the last stage's output, or the
    /// schema itself for an empty stage list.
    stylesheet: PathBuf,
    timeout: Duration,
    _intermediates: Vec<TempPath>,
}

impl CommandlineCompiled {
    async fn run(
        &self,
        document: &Path,
        target: &Path,
    ) -> Result<(), PipelineError> {
        let argv = self.builder.build(&Invocation {
            stylesheet: &self.stylesheet,
            document,
            target,
            parameters: &BTreeMap::new(),
        });
        let (program, args) = argv.split_first().ok_or_else(|| PipelineError::Execution {
            details: "commandline builder produced an empty command".to_string(),
        })?;

        let mut command = Command::new(program);
        command.args(args).kill_on_drop(true);

        let status = tokio::time::timeout(self.timeout, command.status())
            .await
            .map_err(|_| PipelineError::Timeout {
                seconds: self.timeout.as_secs(),
            })??;

        if !status.success() {
            return Err(PipelineError::NonZeroExit {
                code: status.code().unwrap_or(-1),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CompiledSchema for CommandlineCompiled {
    async fn apply(&self, document: &Path) -> Result<Option<Document>, PipelineError> {
        let target = temp_target()?;
        self.run(document, &target).await?;

        let text = tokio::fs::read_to_string(&target).await?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        Document::parse(&text)
            .map(Some)
            .map_err(|e| PipelineError::ReportParse {
                details: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_substitution() {
        let builder = TemplateCommandline::new(
            "xslt-runner",
            vec![
                "-s".to_string(),
                "{stylesheet}".to_string(),
                "-i".to_string(),
                "{document}".to_string(),
                "-o".to_string(),
                "{target}".to_string(),
            ],
            Some("{name}={value}".to_string()),
        );
        let mut parameters = BTreeMap::new();
        parameters.insert("phase".to_string(), "basic".to_string());

        let argv = builder.build(&Invocation {
            stylesheet: Path::new("/tmp/compile.xsl"),
            document: Path::new("/tmp/schema.sch"),
            target: Path::new("/tmp/out.xml"),
            parameters: &parameters,
        });

        assert_eq!(
            argv,
            vec![
                "xslt-runner",
                "-s",
                "/tmp/compile.xsl",
                "-i",
                "/tmp/schema.sch",
                "-o",
                "/tmp/out.xml",
                "phase=basic",
            ]
        );
    }

    #[test]
    fn test_no_parameter_argument_means_no_parameter_args() {
        let builder = TemplateCommandline::new("prog", vec!["{document}".to_string()], None);
        let mut parameters = BTreeMap::new();
        parameters.insert("phase".to_string(), "basic".to_string());
        let argv = builder.build(&Invocation {
            stylesheet: Path::new("s"),
            document: Path::new("d"),
            target: Path::new("t"),
            parameters: &parameters,
        });
        assert_eq!(argv, vec!["prog", "d"]);
    }

    #[test]
    fn test_program_available() {
        assert!(program_available("/bin/sh") || program_available("sh"));
        assert!(!program_available("surely-no-such-program-exists-here"));
        assert!(!program_available(""));
    }

    #[tokio::test]
    async fn test_nonzero_exit_aborts_stage() {
        let builder = TemplateCommandline::new(
            "sh",
            vec!["-c".to_string(), "exit 3".to_string()],
            None,
        );
        let validator = CommandlineValidator::new(
            Arc::new(builder),
            "shell",
            "xslt2",
            Vec::new(),
            vec![PathBuf::from("/dev/null")],
            Duration::from_secs(5),
        );
        let err = validator
            .compile(Path::new("/dev/null"), None)
            .await
            .err().unwrap();
        assert!(matches!(err, PipelineError::NonZeroExit { code: 3 }));
    }

    #[tokio::test]
    async fn test_hung_stage_is_killed() {
        let builder = TemplateCommandline::new(
            "sh",
            vec!["-c".to_string(), "sleep 60".to_string()],
            None,
        );
        let validator = CommandlineValidator::new(
            Arc::new(builder),
            "shell",
            "xslt2",
            Vec::new(),
            vec![PathBuf::from("/dev/null")],
            Duration::from_millis(200),
        );
        let err = validator
            .compile(Path::new("/dev/null"), None)
            .await
            .err().unwrap();
        assert!(matches!(err, PipelineError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_compile_and_apply_via_shell() {
        // A stage that copies its input to the target stands in for a real
        // transform; the chain then works end to end.
        let builder = TemplateCommandline::new(
            "sh",
            vec![
                "-c".to_string(),
                "cat \"$0\" > \"$1\"".to_string(),
                "{document}".to_string(),
                "{target}".to_string(),
            ],
            None,
        );
        let validator = CommandlineValidator::new(
            Arc::new(builder),
            "shell",
            "xslt2",
            Vec::new(),
            vec![PathBuf::from("/dev/null")],
            Duration::from_secs(5),
        );

        let schema = tempfile::Builder::new().suffix(".sch").tempfile().unwrap();
        std::fs::write(schema.path(), "<schema/>").unwrap();

        let compiled = validator.compile(schema.path(), None).await.unwrap();

        let doc = tempfile::Builder::new().suffix(".xml").tempfile().unwrap();
        std::fs::write(doc.path(), "<out><ok/></out>").unwrap();

        let report = compiled.apply(doc.path()).await.unwrap().unwrap();
        let root = report.root_element().unwrap();
        assert_eq!(report.element_name(root).unwrap().local, "out");
    }

    #[tokio::test]
    async fn test_availability_probe() {
        let stage = tempfile::Builder::new().suffix(".xsl").tempfile().unwrap();
        let present = CommandlineValidator::new(
            Arc::new(TemplateCommandline::new("sh", Vec::new(), None)),
            "shell",
            "xslt2",
            Vec::new(),
            vec![stage.path().to_path_buf()],
            Duration::from_secs(5),
        );
        assert!(present.is_available().await);

        let missing_program = CommandlineValidator::new(
            Arc::new(TemplateCommandline::new(
                "surely-no-such-program-exists-here",
                Vec::new(),
                None,
            )),
            "shell",
            "xslt2",
            Vec::new(),
            Vec::new(),
            Duration::from_secs(5),
        );
        assert!(!missing_program.is_available().await);

        let missing_stage = CommandlineValidator::new(
            Arc::new(TemplateCommandline::new("sh", Vec::new(), None)),
            "shell",
            "xslt2",
            Vec::new(),
            vec![PathBuf::from("/no/such/stage.xsl")],
            Duration::from_secs(5),
        );
        assert!(!missing_stage.is_available().await);
    }
}
