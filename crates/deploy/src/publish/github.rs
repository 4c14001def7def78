//! GitHub REST API client.

use std::time::Duration;

use anyhow::Context;
use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::{StatusCode, header};
use serde::Deserialize;
use serde_json::json;
use url::Url;

use super::{HostedRepository, PublishError, RepositoryHost};
use crate::config::RepoToken;

/// Timeout for every API request.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("crudforge/", env!("CARGO_PKG_VERSION"));

const ACCEPT: &str = "application/vnd.github+json";

#[derive(Debug, Deserialize)]
struct Owner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RepositoryResponse {
    name: String,
    html_url: String,
    clone_url: String,
    owner: Owner,
}

impl From<RepositoryResponse> for HostedRepository {
    fn from(repository: RepositoryResponse) -> Self {
        Self {
            owner: repository.owner.login,
            name: repository.name,
            html_url: repository.html_url,
            clone_url: repository.clone_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: String,
}

/// Client for the repository and contents endpoints.
#[derive(Debug, Clone)]
pub struct GithubClient {
    client: reqwest::Client,
    api_url: Url,
    token: RepoToken,
}

impl GithubClient {
    pub fn new(api_url: &Url, token: RepoToken) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;

        // Without a trailing slash `join` would drop the last path segment
        // of enterprise URLs such as `https://host/api/v3`.
        let mut api_url = api_url.clone();
        if !api_url.path().ends_with('/') {
            let path = format!("{}/", api_url.path());
            api_url.set_path(&path);
        }

        Ok(Self {
            client,
            api_url,
            token,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, PublishError> {
        Ok(self
            .api_url
            .join(path)
            .with_context(|| format!("Invalid API path {}", path))?)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(self.token.as_str())
            .header(header::ACCEPT, ACCEPT)
    }

    async fn rejected(operation: &'static str, response: reqwest::Response) -> PublishError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .map(|error| error.message)
            .unwrap_or(body);
        PublishError::Rejected {
            operation,
            status,
            message,
        }
    }

    /// Login of the account the token belongs to.
    async fn authenticated_login(&self) -> Result<String, PublishError> {
        let url = self.endpoint("user")?;
        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .context("Failed to query the authenticated user")?;
        if response.status() != StatusCode::OK {
            return Err(Self::rejected("read authenticated user", response).await);
        }
        let user: Owner = response
            .json()
            .await
            .context("Failed to parse authenticated user response")?;
        Ok(user.login)
    }

    /// Blob sha of an existing file, needed to replace it.
    async fn file_sha(
        &self,
        repository: &HostedRepository,
        branch: &str,
        path: &str,
    ) -> Result<Option<String>, PublishError> {
        let mut url = self.endpoint(&format!(
            "repos/{}/{}/contents/{}",
            repository.owner, repository.name, path
        ))?;
        url.query_pairs_mut().append_pair("ref", branch);

        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .context("Failed to query repository contents")?;
        match response.status() {
            StatusCode::OK => {
                let content: ContentResponse = response
                    .json()
                    .await
                    .context("Failed to parse contents response")?;
                Ok(Some(content.sha))
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(Self::rejected("read file", response).await),
        }
    }
}

impl RepositoryHost for GithubClient {
    async fn create_repository(
        &self,
        name: &str,
        private: bool,
    ) -> Result<HostedRepository, PublishError> {
        let url = self.endpoint("user/repos")?;
        tracing::debug!(%url, name, private, "Creating repository");

        let response = self
            .request(reqwest::Method::POST, url)
            .json(&json!({ "name": name, "private": private }))
            .send()
            .await
            .context("Failed to send create repository request")?;

        if response.status() != StatusCode::CREATED {
            return Err(Self::rejected("create repository", response).await);
        }

        let repository: RepositoryResponse = response
            .json()
            .await
            .context("Failed to parse create repository response")?;
        Ok(repository.into())
    }

    async fn find_repository(
        &self,
        owner: Option<&str>,
        name: &str,
    ) -> Result<Option<HostedRepository>, PublishError> {
        let owner = match owner {
            Some(owner) => owner.to_string(),
            None => self.authenticated_login().await?,
        };
        let url = self.endpoint(&format!("repos/{}/{}", owner, name))?;
        tracing::debug!(%url, "Looking up repository");

        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .context("Failed to send repository lookup request")?;
        match response.status() {
            StatusCode::OK => {
                let repository: RepositoryResponse = response
                    .json()
                    .await
                    .context("Failed to parse repository response")?;
                Ok(Some(repository.into()))
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(Self::rejected("look up repository", response).await),
        }
    }

    async fn put_file(
        &self,
        repository: &HostedRepository,
        branch: &str,
        path: &str,
        content: &[u8],
        message: &str,
    ) -> Result<(), PublishError> {
        let sha = self.file_sha(repository, branch, path).await?;
        let url = self.endpoint(&format!(
            "repos/{}/{}/contents/{}",
            repository.owner, repository.name, path
        ))?;
        tracing::debug!(%url, branch, replace = sha.is_some(), "Uploading file");

        let mut body = json!({
            "message": message,
            "content": STANDARD.encode(content),
            "branch": branch,
        });
        if let Some(sha) = sha {
            body["sha"] = json!(sha);
        }

        let response = self
            .request(reqwest::Method::PUT, url)
            .json(&body)
            .send()
            .await
            .context("Failed to send file upload request")?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => Ok(()),
            _ => Err(Self::rejected("upload file", response).await),
        }
    }
}
