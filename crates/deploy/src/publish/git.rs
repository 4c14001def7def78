//! Local git working tree driven through the `git` binary.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use anyhow::Context;
use base64::{Engine, engine::general_purpose::STANDARD};
use tokio::process::Command;

use super::{PublishError, SourceTree};
use crate::config::RepoToken;

/// Identity used for commits when the user has none configured.
const FALLBACK_NAME: &str = "crudforge";
const FALLBACK_EMAIL: &str = "crudforge@users.noreply.github.com";

/// Source directory published to the repository.
#[derive(Debug, Clone)]
pub struct GitWorkingTree {
    dir: PathBuf,
    token: Option<RepoToken>,
}

impl GitWorkingTree {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            token: None,
        }
    }

    /// Authenticate pushes with `token`.
    ///
    /// The token reaches git through environment-scoped configuration and is
    /// never written to `.git/config` or the remote URL.
    pub fn with_token(mut self, token: RepoToken) -> Self {
        self.token = Some(token);
        self
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.dir)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(token) = &self.token {
            let credentials = STANDARD.encode(format!("x-access-token:{}", token.as_str()));
            cmd.env("GIT_CONFIG_COUNT", "1")
                .env("GIT_CONFIG_KEY_0", "http.extraHeader")
                .env("GIT_CONFIG_VALUE_0", format!("AUTHORIZATION: basic {}", credentials));
        }
        cmd
    }

    async fn output(&self, args: &[&str]) -> Result<std::process::Output, PublishError> {
        tracing::debug!(command = %args.join(" "), dir = %self.dir.display(), "Running git");
        Ok(self
            .command(args)
            .output()
            .await
            .with_context(|| format!("Failed to run git {}", args.join(" ")))?)
    }

    async fn git(&self, args: &[&str]) -> Result<String, PublishError> {
        let output = self.output(args).await?;
        if !output.status.success() {
            return Err(PublishError::Git {
                command: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn ensure_repository(&self, branch: &str) -> Result<(), PublishError> {
        let git_dir = self.dir.join(".git");
        if tokio::fs::try_exists(&git_dir)
            .await
            .with_context(|| format!("Failed to inspect {}", git_dir.display()))?
        {
            tracing::debug!(dir = %self.dir.display(), "Reusing existing git repository");
            return Ok(());
        }
        self.git(&["init", "--initial-branch", branch]).await?;
        Ok(())
    }

    async fn set_origin(&self, remote_url: &str) -> Result<(), PublishError> {
        let remotes = self.git(&["remote"]).await?;
        if remotes.lines().any(|remote| remote.trim() == "origin") {
            self.git(&["remote", "set-url", "origin", remote_url]).await?;
        } else {
            self.git(&["remote", "add", "origin", remote_url]).await?;
        }
        Ok(())
    }

    async fn commit(&self, message: &str) -> Result<bool, PublishError> {
        self.git(&["add", "--all"]).await?;
        let status = self.git(&["status", "--porcelain"]).await?;
        if status.trim().is_empty() {
            tracing::debug!("Working tree clean, nothing to commit");
            return Ok(false);
        }

        let has_identity = self.output(&["config", "user.email"]).await?.status.success();
        let name = format!("user.name={}", FALLBACK_NAME);
        let email = format!("user.email={}", FALLBACK_EMAIL);
        let mut args = Vec::new();
        if !has_identity {
            args.extend(["-c", name.as_str(), "-c", email.as_str()]);
        }
        args.extend(["commit", "--message", message]);
        self.git(&args).await?;
        Ok(true)
    }
}

impl SourceTree for GitWorkingTree {
    async fn write_if_absent(&self, file: &str, content: &str) -> Result<bool, PublishError> {
        let path = self.dir.join(file);
        if tokio::fs::try_exists(&path)
            .await
            .with_context(|| format!("Failed to inspect {}", path.display()))?
        {
            return Ok(false);
        }
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(true)
    }

    async fn push(&self, remote_url: &str, branch: &str, message: &str) -> Result<(), PublishError> {
        self.ensure_repository(branch).await?;
        self.set_origin(remote_url).await?;
        if self.commit(message).await? {
            tracing::debug!(%message, "Committed working tree");
        }
        let refspec = format!("HEAD:refs/heads/{}", branch);
        self.git(&["push", "--set-upstream", "origin", &refspec])
            .await?;
        Ok(())
    }
}
