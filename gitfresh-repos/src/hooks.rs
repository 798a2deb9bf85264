//! Push-webhook registration through the GitHub REST API.
//!
//! Registration is attempted once per repository. A hook that already points
//! at the same URL makes GitHub answer `422` with a `Hook` error saying
//! "already exists"; that answer counts as success.

use serde::{Deserialize, Serialize};

use gitfresh_core::types::normalize_hook_url;

use crate::error::RepoError;
use crate::scan::Repository;

pub const GITHUB_API: &str = "https://api.github.com";
pub const GITHUB_API_VERSION: &str = "2022-11-28";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    Created,
    AlreadyExists,
}

#[derive(Debug, Serialize)]
struct CreateHook<'a> {
    name: &'static str,
    active: bool,
    events: [&'static str; 1],
    config: HookConfig<'a>,
}

#[derive(Debug, Serialize)]
struct HookConfig<'a> {
    url: &'a str,
    content_type: &'static str,
    secret: &'a str,
    insecure_ssl: &'static str,
}

#[derive(Debug, Default, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    resource: String,
    #[serde(default)]
    message: String,
}

impl ApiError {
    fn hook_already_exists(&self) -> bool {
        self.errors
            .iter()
            .any(|e| e.resource == "Hook" && e.message.contains("already exists"))
    }
}

/// Blocking client creating push webhooks.
#[derive(Debug, Clone)]
pub struct HookRegistrar {
    agent: ureq::Agent,
    api_base: String,
    token: String,
}

impl HookRegistrar {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().build(),
            api_base: GITHUB_API.to_string(),
            token: token.into(),
        }
    }

    /// Point the client at another API root (GitHub Enterprise, tests).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Create a `push` webhook on `repo` delivering to `tunnel_domain`.
    pub fn register(
        &self,
        repo: &Repository,
        tunnel_domain: &str,
        secret: &str,
    ) -> Result<HookOutcome, RepoError> {
        let hook_url = normalize_hook_url(tunnel_domain).ok_or(RepoError::MissingHookUrl)?;
        let endpoint = format!(
            "{}/repos/{}/{}/hooks",
            self.api_base.trim_end_matches('/'),
            repo.owner,
            repo.name
        );
        let request = CreateHook {
            name: "web",
            active: true,
            events: ["push"],
            config: HookConfig {
                url: &hook_url,
                content_type: "json",
                secret,
                insecure_ssl: "0",
            },
        };

        tracing::debug!(repository = %repo, endpoint = %endpoint, hook_url = %hook_url, "creating webhook");
        let response = self
            .agent
            .post(&endpoint)
            .set("Authorization", &format!("Bearer {}", self.token))
            .set("Accept", "application/vnd.github+json")
            .set("X-GitHub-Api-Version", GITHUB_API_VERSION)
            .send_json(&request);

        let rejected = |status: u16, message: String| RepoError::HookRejected {
            repository: repo.to_string(),
            status,
            message,
        };
        match response {
            Ok(response) if response.status() == 201 => {
                tracing::info!(repository = %repo, "webhook created");
                Ok(HookOutcome::Created)
            }
            Ok(response) => Err(rejected(
                response.status(),
                response.status_text().to_string(),
            )),
            Err(ureq::Error::Status(status, response)) => {
                let body: ApiError = response.into_json().unwrap_or_default();
                if status == 422 && body.hook_already_exists() {
                    tracing::info!(repository = %repo, "webhook already exists");
                    return Ok(HookOutcome::AlreadyExists);
                }
                Err(rejected(status, body.message))
            }
            Err(err) => Err(RepoError::HookTransport {
                repository: repo.to_string(),
                message: err.to_string(),
            }),
        }
    }
}
