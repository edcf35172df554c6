//! Failure taxonomy for the packaging pipeline.
//!
//! Stages return `anyhow::Result` and raise one of these variants at the
//! point where a run must stop. Callers (and tests) can recover the category
//! with `err.downcast_ref::<PipelineError>()` regardless of how much context
//! was layered on top.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Unsupported host, missing privilege or missing runtime manager.
    #[error("environment check failed: {0}")]
    Environment(String),

    /// The package manager could not install required tools.
    #[error("dependency installation failed: {0}")]
    Dependency(String),

    /// The installer could not be downloaded or failed verification.
    #[error("download failed: {0}")]
    Transfer(String),

    /// One of the archive extract/pack operations failed.
    #[error("{step} failed: {detail}")]
    Extraction { step: &'static str, detail: String },

    /// The package builder failed or produced no artifact.
    #[error("package build failed: {0}")]
    Build(String),

    /// Bad command line or configuration.
    #[error("usage error: {0}")]
    Usage(String),
}

impl PipelineError {
    /// Short category name used in status lines.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Environment(_) => "environment",
            Self::Dependency(_) => "dependency",
            Self::Transfer(_) => "transfer",
            Self::Extraction { .. } => "extraction",
            Self::Build(_) => "build",
            Self::Usage(_) => "usage",
        }
    }
}

/// Find the pipeline category of an error chain, if any.
pub fn classify(err: &anyhow::Error) -> Option<&PipelineError> {
    err.chain().find_map(|cause| cause.downcast_ref::<PipelineError>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn classify_survives_added_context() {
        let err: anyhow::Result<()> = Err(PipelineError::Transfer("HTTP 404".into()).into());
        let err = err.context("fetching installer").unwrap_err();

        let found = classify(&err).expect("category should be recoverable");
        assert_eq!(found.category(), "transfer");
    }

    #[test]
    fn classify_returns_none_for_plain_errors() {
        let err = anyhow::anyhow!("something else");
        assert!(classify(&err).is_none());
    }

    #[test]
    fn extraction_message_names_the_step() {
        let err = PipelineError::Extraction {
            step: "extract installer",
            detail: "7z exited with status 2".into(),
        };
        assert_eq!(
            err.to_string(),
            "extract installer failed: 7z exited with status 2"
        );
    }
}
