//! Sandbox spec - what to run inside a sandbox.

use crate::error::RuntimeError;
use std::path::PathBuf;

/// Description of the program to run inside a sandbox.
#[derive(Debug, Clone, Default)]
pub struct SandboxSpec {
    /// Program to execute.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Environment variables set for the program.
    pub env: Vec<(String, String)>,
    /// Working directory; inherited from the runtime if unset.
    pub working_dir: Option<PathBuf>,
}

impl SandboxSpec {
    /// Create a new spec builder.
    pub fn builder() -> SandboxSpecBuilder {
        SandboxSpecBuilder::default()
    }

    /// Validate the spec.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.program.is_empty() {
            return Err(RuntimeError::InvalidSpec("program is required".into()));
        }
        Ok(())
    }
}

/// Builder for SandboxSpec.
#[derive(Debug, Default)]
pub struct SandboxSpecBuilder {
    spec: SandboxSpec,
}

impl SandboxSpecBuilder {
    /// Set the program to execute.
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.spec.program = program.into();
        self
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.spec.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set one environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.env.push((key.into(), value.into()));
        self
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spec.working_dir = Some(dir.into());
        self
    }

    /// Build the spec, validating required fields.
    pub fn build(self) -> Result<SandboxSpec, RuntimeError> {
        self.spec.validate()?;
        Ok(self.spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_requires_program() {
        let result = SandboxSpec::builder().arg("-v").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_success() {
        let spec = SandboxSpec::builder()
            .program("/bin/echo")
            .args(["hello", "world"])
            .env("RUST_LOG", "debug")
            .working_dir("/tmp")
            .build()
            .expect("should build successfully");

        assert_eq!(spec.program, "/bin/echo");
        assert_eq!(spec.args, vec!["hello".to_string(), "world".to_string()]);
        assert_eq!(spec.env.len(), 1);
        assert_eq!(spec.working_dir, Some(PathBuf::from("/tmp")));
    }
}
