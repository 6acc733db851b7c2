pub mod mirror;
pub mod submodule;

#[cfg(test)]
pub(crate) mod fake;

use std::{
    future::Future,
    path::{Path, PathBuf},
    process::Stdio,
};

use log::{debug, error};
use thiserror::Error;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum GitError {
    #[error("could not run `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("`{command}` failed ({status}):\n{output}")]
    Failed {
        command: String,
        status: String,
        code: Option<i32>,
        output: String,
    },
}

impl GitError {
    /// Exit code of the failed command, if it ran to completion.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            GitError::Spawn { .. } => None,
            GitError::Failed { code, .. } => *code,
        }
    }
}

/// Executes git subcommands on behalf of the pipeline.
///
/// Every invocation behaves like `git -C <dir> <args>`. On success the
/// standard output is returned; on failure the error carries the combined
/// output of the command.
pub trait GitRunner: Send + Sync + 'static {
    fn run(
        &self,
        dir: &Path,
        args: &[String],
    ) -> impl Future<Output = Result<String, GitError>> + Send;
}

/// Runs the `git` executable found on `PATH`.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
}

impl Default for GitCli {
    fn default() -> Self {
        GitCli {
            program: PathBuf::from("git"),
        }
    }
}

impl GitCli {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        GitCli {
            program: program.into(),
        }
    }
}

impl GitRunner for GitCli {
    async fn run(&self, dir: &Path, args: &[String]) -> Result<String, GitError> {
        let command = render_command(dir, args);
        debug!("exec: {}", command);

        let output = Command::new(&self.program)
            .arg("-C")
            .arg(dir)
            .args(args)
            // No credential prompts.
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| GitError::Spawn {
                command: command.clone(),
                source,
            })?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        error!("failed: {}\n{}", command, combined.trim_end());
        Err(GitError::Failed {
            command,
            status: output.status.to_string(),
            code: output.status.code(),
            output: combined,
        })
    }
}

pub(crate) fn render_command(dir: &Path, args: &[String]) -> String {
    format!("git -C {} {}", dir.display(), args.join(" "))
}

