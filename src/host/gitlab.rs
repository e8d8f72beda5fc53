//! Minimal GitLab v4 REST client.

use super::{
    CodeHost, CreatedMergeRequest, MergeRequestStatus, NewMergeRequest, Pipeline, PipelineJob,
};
use crate::error::ApiError;
use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

/// Longest response body kept in an error
const MAX_ERROR_BODY: usize = 500;

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// GitLab API client authenticated with a personal or project access token
#[derive(Clone)]
pub struct GitLabClient {
    http_client: reqwest::Client,
    api_base: Url,
    token: String,
}

impl std::fmt::Debug for GitLabClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitLabClient")
            .field("api_base", &self.api_base.as_str())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct CreateMergeRequestBody<'a> {
    source_branch: &'a str,
    target_branch: &'a str,
    title: &'a str,
    description: &'a str,
}

impl GitLabClient {
    /// Client for the instance at `base_url` (e.g. `https://gitlab.example.com`)
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, ApiError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(ApiError::NotConfigured {
                reason: "no access token".to_string(),
            });
        }

        let mut api_base = Url::parse(base_url).map_err(|e| ApiError::NotConfigured {
            reason: format!("invalid GitLab URL '{}': {}", base_url, e),
        })?;
        if api_base.cannot_be_a_base() {
            return Err(ApiError::NotConfigured {
                reason: format!("'{}' cannot be used as a base URL", base_url),
            });
        }
        if let Ok(mut segments) = api_base.path_segments_mut() {
            segments.pop_if_empty().extend(["api", "v4"]);
        }

        let http_client = reqwest::Client::builder()
            .user_agent(concat!("rpb_release/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ApiError::NotConfigured {
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            http_client,
            api_base,
            token,
        })
    }

    /// `{api}/projects/{project}/{segments...}`; the project path is encoded
    /// as one segment so `group/app` becomes `group%2Fapp`
    fn project_url(&self, project: &str, segments: &[&str]) -> Url {
        let mut url = self.api_base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.push("projects").push(project).extend(segments);
        }
        url
    }

    async fn get<T: DeserializeOwned>(&self, url: Url, resource: &str) -> Result<T, ApiError> {
        log::debug!("GET {}", url);
        let response = self
            .http_client
            .get(url)
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await
            .map_err(|e| ApiError::Network {
                reason: e.to_string(),
            })?;
        decode(response, resource).await
    }

    async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        url: Url,
        body: &B,
        resource: &str,
    ) -> Result<T, ApiError> {
        log::debug!("POST {}", url);
        let response = self
            .http_client
            .post(url)
            .header("PRIVATE-TOKEN", &self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Network {
                reason: e.to_string(),
            })?;
        decode(response, resource).await
    }

    /// Merge request by project-scoped id
    pub async fn get_merge_request(
        &self,
        project: &str,
        iid: u64,
    ) -> Result<MergeRequestStatus, ApiError> {
        let url = self.project_url(project, &["merge_requests", &iid.to_string()]);
        self.get(url, &format!("merge request !{}", iid)).await
    }

    /// Pipelines for a commit, newest first
    pub async fn get_pipelines_by_commit(
        &self,
        project: &str,
        sha: &str,
    ) -> Result<Vec<Pipeline>, ApiError> {
        let mut url = self.project_url(project, &["pipelines"]);
        url.query_pairs_mut()
            .append_pair("sha", sha)
            .append_pair("order_by", "id")
            .append_pair("sort", "desc");
        self.get(url, &format!("pipelines for {}", sha)).await
    }

    /// Pipelines of a merge request, newest first
    pub async fn get_merge_request_pipelines(
        &self,
        project: &str,
        iid: u64,
    ) -> Result<Vec<Pipeline>, ApiError> {
        let url = self.project_url(project, &["merge_requests", &iid.to_string(), "pipelines"]);
        self.get(url, &format!("pipelines of merge request !{}", iid))
            .await
    }

    /// Latest attempt of every job in a pipeline
    pub async fn get_pipeline_jobs(
        &self,
        project: &str,
        pipeline_id: u64,
    ) -> Result<Vec<PipelineJob>, ApiError> {
        let mut url = self.project_url(project, &["pipelines", &pipeline_id.to_string(), "jobs"]);
        url.query_pairs_mut()
            .append_pair("per_page", "100")
            .append_pair("include_retried", "false");
        self.get(url, &format!("jobs of pipeline {}", pipeline_id))
            .await
    }

    /// Open a merge request
    pub async fn post_merge_request(
        &self,
        project: &str,
        request: &NewMergeRequest,
    ) -> Result<CreatedMergeRequest, ApiError> {
        let url = self.project_url(project, &["merge_requests"]);
        let body = CreateMergeRequestBody {
            source_branch: &request.source_branch,
            target_branch: &request.target_branch,
            title: &request.title,
            description: &request.description,
        };
        self.post(url, &body, "merge requests").await
    }

    /// Open merge request between two branches
    pub async fn get_open_merge_request(
        &self,
        project: &str,
        source: &str,
        target: &str,
    ) -> Result<Option<CreatedMergeRequest>, ApiError> {
        let mut url = self.project_url(project, &["merge_requests"]);
        url.query_pairs_mut()
            .append_pair("state", "opened")
            .append_pair("source_branch", source)
            .append_pair("target_branch", target);
        let found: Vec<CreatedMergeRequest> = self
            .get(url, &format!("merge requests {} -> {}", source, target))
            .await?;
        Ok(found.into_iter().next())
    }
}

/// Map an HTTP status to the error the callers distinguish
fn status_error(status: StatusCode, body: String, resource: &str) -> ApiError {
    match status {
        StatusCode::NOT_FOUND => ApiError::NotFound {
            resource: resource.to_string(),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::Unauthorized {
            status: status.as_u16(),
        },
        _ => {
            let mut body = body;
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            ApiError::Status {
                status: status.as_u16(),
                body,
            }
        }
    }
}

async fn decode<T: DeserializeOwned>(
    response: reqwest::Response,
    resource: &str,
) -> Result<T, ApiError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unable to read response body".to_string());
        return Err(status_error(status, body, resource));
    }
    response.json().await.map_err(|e| ApiError::Decode {
        reason: e.to_string(),
    })
}

impl CodeHost for GitLabClient {
    async fn merge_request_status(
        &self,
        project: &str,
        iid: u64,
    ) -> Result<MergeRequestStatus, ApiError> {
        self.get_merge_request(project, iid).await
    }

    async fn pipelines_by_commit(&self, project: &str, sha: &str) -> Result<Vec<Pipeline>, ApiError> {
        self.get_pipelines_by_commit(project, sha).await
    }

    async fn merge_request_pipelines(
        &self,
        project: &str,
        iid: u64,
    ) -> Result<Vec<Pipeline>, ApiError> {
        self.get_merge_request_pipelines(project, iid).await
    }

    async fn pipeline_jobs(
        &self,
        project: &str,
        pipeline_id: u64,
    ) -> Result<Vec<PipelineJob>, ApiError> {
        self.get_pipeline_jobs(project, pipeline_id).await
    }

    async fn create_merge_request(
        &self,
        project: &str,
        request: &NewMergeRequest,
    ) -> Result<CreatedMergeRequest, ApiError> {
        self.post_merge_request(project, request).await
    }

    async fn find_open_merge_request(
        &self,
        project: &str,
        source: &str,
        target: &str,
    ) -> Result<Option<CreatedMergeRequest>, ApiError> {
        self.get_open_merge_request(project, source, target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_path_is_one_encoded_segment() {
        let client = GitLabClient::new("https://gitlab.example.com/", "token").unwrap();
        let url = client.project_url("group/app", &["merge_requests", "12"]);
        assert_eq!(
            url.as_str(),
            "https://gitlab.example.com/api/v4/projects/group%2Fapp/merge_requests/12"
        );
    }

    #[test]
    fn test_instance_under_subpath() {
        let client = GitLabClient::new("https://example.com/gitlab", "token").unwrap();
        let url = client.project_url("42", &["pipelines"]);
        assert_eq!(url.as_str(), "https://example.com/gitlab/api/v4/projects/42/pipelines");
    }

    #[test]
    fn test_missing_token_or_bad_url_is_not_configured() {
        assert!(matches!(
            GitLabClient::new("https://gitlab.example.com", " "),
            Err(ApiError::NotConfigured { .. })
        ));
        assert!(matches!(
            GitLabClient::new("not a url", "token"),
            Err(ApiError::NotConfigured { .. })
        ));
    }

    #[test]
    fn test_status_mapping_distinguishes_not_found() {
        let err = status_error(StatusCode::NOT_FOUND, String::new(), "merge request !1");
        assert!(err.is_not_found());
        assert_eq!(
            status_error(StatusCode::FORBIDDEN, String::new(), "x"),
            ApiError::Unauthorized { status: 403 }
        );
        match status_error(StatusCode::BAD_GATEWAY, "é".repeat(400), "x") {
            ApiError::Status { status, body } => {
                assert_eq!(status, 502);
                assert!(body.len() <= MAX_ERROR_BODY);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
