//! GitHub-style repository contents API client.
//!
//! Files are read with `GET /repos/{owner}/{repo}/contents/{path}?ref={branch}`
//! and written with `PUT` on the same URL. The blob `sha` returned by the API
//! is the concurrency token: writes must carry the current `sha`, otherwise
//! the API answers `409 Conflict` (or `422` when the `sha` is missing).

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, ETAG, HeaderMap, HeaderValue, IF_NONE_MATCH};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::StoreConfig;
use crate::error::{BackendError, StorageError, StorageResult};

use super::encoding::{decode_content, encode_content};
use super::{DocumentStoreApi, ReadOutcome, RemoteObject, RemoteStoreError, VersionToken};

const BACKEND_NAME: &str = "github";
const API_VERSION: &str = "2022-11-28";
const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";
const RAW_MEDIA_TYPE: &str = "application/vnd.github.raw+json";

/// Contents API client bound to one `owner/repo@branch`.
#[derive(Debug, Clone)]
pub struct ContentsApiClient {
    http: Client,
    api_base_url: String,
    owner: String,
    repo: String,
    branch: String,
    auth_token: Option<String>,
    commit_message_prefix: String,
}

#[derive(Debug, Deserialize)]
struct ContentsFile {
    sha: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Serialize)]
struct WriteRequest<'a> {
    message: String,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct WriteResponse {
    content: WrittenFile,
}

#[derive(Debug, Deserialize)]
struct WrittenFile {
    sha: String,
}

impl ContentsApiClient {
    /// Builds a client from store configuration.
    pub fn new(config: &StoreConfig) -> StorageResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(JSON_MEDIA_TYPE));
        headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));

        let mut builder = Client::builder()
            .user_agent(concat!("carehub-persistence/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers);
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(std::time::Duration::from_secs(secs));
        }

        let http = builder.build().map_err(|e| {
            StorageError::Backend(BackendError::InvalidConfig {
                message: format!("failed to build HTTP client: {e}"),
            })
        })?;

        Ok(Self {
            http,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            owner: config.owner.clone(),
            repo: config.repo.clone(),
            branch: config.branch.clone(),
            auth_token: config.auth_token.clone(),
            commit_message_prefix: config.commit_message_prefix.clone(),
        })
    }

    fn contents_url(&self, path: &str) -> Result<Url, RemoteStoreError> {
        let mut url = Url::parse(&self.api_base_url)
            .map_err(|e| RemoteStoreError::InvalidInput(format!("bad api_base_url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| RemoteStoreError::InvalidInput("api_base_url cannot be a base".into()))?
            .pop_if_empty()
            .extend(["repos", self.owner.as_str(), self.repo.as_str(), "contents"])
            .extend(path.split('/').filter(|segment| !segment.is_empty()));
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }

    async fn fetch_raw(&self, url: Url) -> Result<String, RemoteStoreError> {
        let response = self
            .authorize(self.http.get(url))
            .query(&[("ref", self.branch.as_str())])
            .header(ACCEPT, RAW_MEDIA_TYPE)
            .send()
            .await
            .map_err(map_request_error)?;

        if !response.status().is_success() {
            return Err(error_from_response(response, false).await);
        }
        response.text().await.map_err(map_request_error)
    }
}

#[async_trait]
impl DocumentStoreApi for ContentsApiClient {
    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn read_object(
        &self,
        path: &str,
        known: Option<&VersionToken>,
    ) -> Result<ReadOutcome, RemoteStoreError> {
        let url = self.contents_url(path)?;
        let mut request = self
            .authorize(self.http.get(url.clone()))
            .query(&[("ref", self.branch.as_str())]);
        if let Some(etag) = known.and_then(|token| token.etag.as_deref()) {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = request.send().await.map_err(map_request_error)?;
        if response.status() == StatusCode::NOT_MODIFIED {
            debug!(path, "content unchanged (etag)");
            return Ok(ReadOutcome::NotModified);
        }
        if !response.status().is_success() {
            return Err(error_from_response(response, false).await);
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let file: ContentsFile = response
            .json()
            .await
            .map_err(|e| RemoteStoreError::Internal(format!("malformed contents response: {e}")))?;

        if known.is_some_and(|token| token.sha == file.sha) {
            debug!(path, sha = %file.sha, "content unchanged (sha)");
            return Ok(ReadOutcome::NotModified);
        }

        // Files above the inline size limit come back with encoding "none".
        let content = match file.encoding.as_deref() {
            Some("base64") => decode_content(&file.content)
                .map_err(|e| RemoteStoreError::Internal(e.to_string()))?,
            _ => self.fetch_raw(url).await?,
        };

        Ok(ReadOutcome::Modified(RemoteObject {
            content,
            token: VersionToken::new(file.sha).with_etag(etag),
        }))
    }

    async fn head_object(&self, path: &str) -> Result<Option<VersionToken>, RemoteStoreError> {
        match self.read_object(path, None).await {
            Ok(ReadOutcome::Modified(object)) => Ok(Some(object.token)),
            Ok(ReadOutcome::NotModified) => Err(RemoteStoreError::Internal(
                "unconditional read reported not modified".to_string(),
            )),
            Err(RemoteStoreError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn write_object(
        &self,
        path: &str,
        content: &str,
        expected: Option<&VersionToken>,
    ) -> Result<VersionToken, RemoteStoreError> {
        let url = self.contents_url(path)?;
        let body = WriteRequest {
            message: format!("{} {}", self.commit_message_prefix, path),
            content: encode_content(content),
            branch: &self.branch,
            sha: expected.map(|token| token.sha.as_str()),
        };

        let response = self
            .authorize(self.http.put(url))
            .json(&body)
            .send()
            .await
            .map_err(map_request_error)?;
        if !response.status().is_success() {
            return Err(error_from_response(response, true).await);
        }

        let written: WriteResponse = response
            .json()
            .await
            .map_err(|e| RemoteStoreError::Internal(format!("malformed write response: {e}")))?;
        Ok(VersionToken::new(written.content.sha))
    }
}

async fn error_from_response(response: Response, writing: bool) -> RemoteStoreError {
    let status = response.status();
    let rate_limited = response
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|value| value.to_str().ok())
        == Some("0");
    let body = response.text().await.unwrap_or_default();
    classify_status(status, rate_limited, body, writing)
}

fn classify_status(
    status: StatusCode,
    rate_limited: bool,
    message: String,
    writing: bool,
) -> RemoteStoreError {
    match status {
        StatusCode::NOT_FOUND => RemoteStoreError::NotFound,
        StatusCode::CONFLICT => RemoteStoreError::Conflict,
        StatusCode::UNPROCESSABLE_ENTITY if writing => RemoteStoreError::Conflict,
        StatusCode::UNPROCESSABLE_ENTITY | StatusCode::BAD_REQUEST => {
            RemoteStoreError::InvalidInput(message)
        }
        StatusCode::TOO_MANY_REQUESTS => RemoteStoreError::Throttled(message),
        StatusCode::FORBIDDEN if rate_limited => RemoteStoreError::Throttled(message),
        s if s.is_server_error() => RemoteStoreError::Unavailable(format!("{s}: {message}")),
        s => RemoteStoreError::Internal(format!("{s}: {message}")),
    }
}

fn map_request_error(err: reqwest::Error) -> RemoteStoreError {
    if err.is_timeout() || err.is_connect() {
        RemoteStoreError::Unavailable(err.to_string())
    } else {
        RemoteStoreError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ContentsApiClient {
        let mut config = StoreConfig::new("carehub", "platform-data");
        config.api_base_url = "https://api.github.com/".to_string();
        ContentsApiClient::new(&config).unwrap()
    }

    #[test]
    fn contents_url_joins_segments() {
        let url = client().contents_url("data/appointments.json").unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.github.com/repos/carehub/platform-data/contents/data/appointments.json"
        );
    }

    #[test]
    fn contents_url_keeps_enterprise_prefix() {
        let mut config = StoreConfig::new("carehub", "platform-data");
        config.api_base_url = "https://git.example.org/api/v3".to_string();
        let client = ContentsApiClient::new(&config).unwrap();
        let url = client.contents_url("/db//users.json").unwrap();
        assert_eq!(
            url.as_str(),
            "https://git.example.org/api/v3/repos/carehub/platform-data/contents/db/users.json"
        );
    }

    #[test]
    fn stale_sha_maps_to_conflict() {
        assert_eq!(
            classify_status(StatusCode::CONFLICT, false, String::new(), true),
            RemoteStoreError::Conflict
        );
        assert_eq!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY, false, String::new(), true),
            RemoteStoreError::Conflict
        );
        assert!(matches!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY, false, String::new(), false),
            RemoteStoreError::InvalidInput(_)
        ));
    }

    #[test]
    fn rate_limits_and_outages_are_distinguished() {
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, true, "limit".into(), false),
            RemoteStoreError::Throttled(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, false, "no access".into(), false),
            RemoteStoreError::Internal(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, false, String::new(), false),
            RemoteStoreError::Unavailable(_)
        ));
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND, false, String::new(), false),
            RemoteStoreError::NotFound
        );
    }

    #[test]
    fn write_request_omits_sha_on_create() {
        let body = WriteRequest {
            message: "carehub: update data/users.json".to_string(),
            content: encode_content("[]"),
            branch: "main",
            sha: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("sha").is_none());
        assert_eq!(json["content"], "W10=");
    }
}
