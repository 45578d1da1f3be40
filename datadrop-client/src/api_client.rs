use crate::{error::ApiError, uploader::PartResult};
use reqwest::{Body, Method, RequestBuilder, Response, StatusCode, header};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;
use std::{future::Future, time::Duration};
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;
use url::Url;

const METADATA_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum UploadType {
    /// Private file, shared through expiring links.
    Private,
    /// Public file served from the CDN.
    Cdn,
}

impl UploadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Cdn => "cdn",
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
    pub upload_type: UploadType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_downloads: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub upload_url: String,
    pub file_id: String,
    pub multipart: Option<MultipartInfo>,
    pub cdn_url: Option<String>,
    pub expires_at: Option<String>,
    pub max_downloads: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipartInfo {
    pub upload_id: String,
    pub part_count: u32,
    pub part_size: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartUrlResponse {
    pub upload_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceLoginResponse {
    pub code: String,
    pub display_code: String,
    pub auth_url: String,
    pub expires_in: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceLoginPoll {
    #[serde(default)]
    pub status: String,
    pub token: Option<String>,
    pub expires_at: Option<String>,
    pub user: Option<PollUser>,
    pub error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollUser {
    pub user_id: String,
    pub email: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub user_id: String,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub can_upload_cdn: bool,
    #[serde(default)]
    pub can_upload_file: bool,
    #[serde(default)]
    pub max_file_size_bytes: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub id: String,
    pub file_name: String,
    pub file_size: u64,
    #[serde(default)]
    pub file_type: String,
    pub upload_type: String,
    pub status: String,
    #[serde(default)]
    pub created_at: String,
    pub expires_at: Option<String>,
    pub cdn_url: Option<String>,
    pub max_downloads: Option<u32>,
    pub downloads_remaining: Option<u32>,
    #[serde(default)]
    pub is_expired: bool,
}

#[derive(Deserialize)]
struct FileListResponse {
    files: Vec<FileInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareResponse {
    pub share_url: String,
    #[serde(rename = "type")]
    pub share_type: String,
    pub expires_at: Option<String>,
    pub file_expires_at: Option<String>,
    pub max_downloads: Option<u32>,
    pub downloads_remaining: Option<u32>,
}

/// Raw bytes streamed to a one-time write location.
pub struct UploadBody {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    length: u64,
}

impl UploadBody {
    /// `length` must be exactly the number of bytes `reader` yields.
    pub fn new(reader: impl AsyncRead + Send + Unpin + 'static, length: u64) -> Self {
        Self {
            reader: Box::new(reader),
            length,
        }
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn into_reader(self) -> Box<dyn AsyncRead + Send + Unpin> {
        self.reader
    }
}

/// Calls the upload orchestrator needs from the server.
pub trait UploadApi {
    fn initiate_upload(
        &self,
        request: &UploadRequest,
    ) -> impl Future<Output = Result<UploadResponse, ApiError>> + Send;

    fn part_upload_url(
        &self,
        file_id: &str,
        part_number: u32,
    ) -> impl Future<Output = Result<PartUrlResponse, ApiError>> + Send;

    /// Stream `body` to a one-time write location, returning the `ETag` the storage
    /// backend answered with.
    fn put_object(
        &self,
        upload_url: &str,
        content_type: Option<&str>,
        body: UploadBody,
    ) -> impl Future<Output = Result<Option<String>, ApiError>> + Send;

    fn complete_multipart(
        &self,
        file_id: &str,
        parts: &[PartResult],
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn abort_multipart(&self, file_id: &str) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn confirm_upload(&self, file_id: &str) -> impl Future<Output = Result<(), ApiError>> + Send;
}

/// Public calls backing the device authorization flow.
pub trait DeviceAuthApi {
    fn start_device_login(&self) -> impl Future<Output = Result<DeviceLoginResponse, ApiError>> + Send;

    fn poll_device_login(
        &self,
        code: &str,
    ) -> impl Future<Output = Result<DeviceLoginPoll, ApiError>> + Send;
}

/// Build the API root from a user supplied endpoint.
///
/// Endpoints may be given with or without the trailing `/api` segment; both resolve
/// to the same base so relative paths can be joined onto it.
pub fn api_base_url(endpoint: &Url) -> Result<Url, url::ParseError> {
    let trimmed = endpoint.as_str().trim_end_matches('/');
    if trimmed.ends_with("/api") {
        Url::parse(&format!("{trimmed}/"))
    } else {
        Url::parse(&format!("{trimmed}/api/"))
    }
}

pub struct DataDropClient {
    base_url: Url,
    token: Option<String>,
    inner_client: reqwest::Client,
}

impl DataDropClient {
    pub fn new(endpoint: &Url, token: Option<String>) -> Result<Self, ApiError> {
        Ok(Self {
            base_url: api_base_url(endpoint)?,
            token,
            inner_client: reqwest::Client::builder()
                .user_agent(concat!(
                    env!("CARGO_PKG_NAME"),
                    "/",
                    env!("CARGO_PKG_VERSION")
                ))
                .build()
                .expect("api inner client should build"),
        })
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let builder = self
            .inner_client
            .request(method, self.base_url.join(path)?)
            .timeout(METADATA_REQUEST_TIMEOUT);
        Ok(match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    async fn send(builder: RequestBuilder, operation: &'static str) -> Result<Response, ApiError> {
        let res = builder
            .send()
            .await
            .map_err(|source| ApiError::Transport { operation, source })?;
        if res.status() != StatusCode::OK {
            return Err(ApiError::Status {
                operation,
                status: res.status(),
                body: res.text().await.unwrap_or_default(),
            });
        }
        Ok(res)
    }

    async fn decode<T: DeserializeOwned>(
        res: Response,
        operation: &'static str,
    ) -> Result<T, ApiError> {
        res.json::<T>()
            .await
            .map_err(|source| ApiError::Decode { operation, source })
    }

    pub async fn verify(&self) -> Result<UserInfo, ApiError> {
        let res = Self::send(self.request(Method::GET, "auth/verify")?, "verify").await?;
        Self::decode(res, "verify").await
    }

    pub async fn list_files(&self) -> Result<Vec<FileInfo>, ApiError> {
        let res = Self::send(self.request(Method::GET, "files")?, "list files").await?;
        Ok(Self::decode::<FileListResponse>(res, "list files")
            .await?
            .files)
    }

    pub async fn share_url(
        &self,
        file_id: &str,
        expires_in_seconds: u64,
    ) -> Result<ShareResponse, ApiError> {
        let req = self
            .request(Method::POST, &format!("files/{file_id}/share"))?
            .json(&json!({ "expiresInSeconds": expires_in_seconds }));
        let res = Self::send(req, "share url").await?;
        Self::decode(res, "share url").await
    }

    pub async fn delete_file(&self, file_id: &str) -> Result<(), ApiError> {
        Self::send(
            self.request(Method::DELETE, &format!("files/{file_id}"))?,
            "delete file",
        )
        .await?;
        Ok(())
    }
}

impl UploadApi for DataDropClient {
    async fn initiate_upload(&self, request: &UploadRequest) -> Result<UploadResponse, ApiError> {
        let req = self.request(Method::POST, "upload")?.json(request);
        let res = Self::send(req, "initiate upload").await?;
        Self::decode(res, "initiate upload").await
    }

    async fn part_upload_url(
        &self,
        file_id: &str,
        part_number: u32,
    ) -> Result<PartUrlResponse, ApiError> {
        let req = self
            .request(Method::POST, &format!("upload/{file_id}/part"))?
            .json(&json!({ "partNumber": part_number }));
        let res = Self::send(req, "part url").await?;
        Self::decode(res, "part url").await
    }

    async fn put_object(
        &self,
        upload_url: &str,
        content_type: Option<&str>,
        body: UploadBody,
    ) -> Result<Option<String>, ApiError> {
        // No timeout: large bodies must not be cut off by a fixed deadline.
        let mut req = self
            .inner_client
            .put(upload_url)
            .header(header::CONTENT_LENGTH, body.length());
        if let Some(content_type) = content_type {
            req = req.header(header::CONTENT_TYPE, content_type);
        }
        let req = req.body(Body::wrap_stream(ReaderStream::new(body.into_reader())));
        let res = Self::send(req, "storage upload").await?;
        Ok(res
            .headers()
            .get(header::ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned))
    }

    async fn complete_multipart(&self, file_id: &str, parts: &[PartResult]) -> Result<(), ApiError> {
        let req = self
            .request(Method::POST, &format!("upload/{file_id}/complete"))?
            .json(&json!({ "parts": parts }));
        Self::send(req, "complete multipart upload").await?;
        Ok(())
    }

    async fn abort_multipart(&self, file_id: &str) -> Result<(), ApiError> {
        let req = self.request(Method::POST, &format!("upload/{file_id}/abort"))?;
        Self::send(req, "abort multipart upload").await?;
        Ok(())
    }

    async fn confirm_upload(&self, file_id: &str) -> Result<(), ApiError> {
        let req = self.request(Method::POST, &format!("files/{file_id}/confirm"))?;
        Self::send(req, "confirm upload").await?;
        Ok(())
    }
}

impl DeviceAuthApi for DataDropClient {
    async fn start_device_login(&self) -> Result<DeviceLoginResponse, ApiError> {
        let req = self
            .inner_client
            .post(self.base_url.join("auth/cli/login")?)
            .timeout(METADATA_REQUEST_TIMEOUT);
        let res = Self::send(req, "initiate login").await?;
        Self::decode(res, "initiate login").await
    }

    async fn poll_device_login(&self, code: &str) -> Result<DeviceLoginPoll, ApiError> {
        let res = self
            .inner_client
            .get(self.base_url.join(&format!("auth/cli/login/{code}"))?)
            .timeout(POLL_REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|source| ApiError::Transport {
                operation: "poll login",
                source,
            })?;

        // Unknown or consumed codes come back as 4xx with an `error` field, so the
        // body is decoded for those. Server faults are left to the caller to retry.
        if res.status().is_server_error() {
            return Err(ApiError::Status {
                operation: "poll login",
                status: res.status(),
                body: res.text().await.unwrap_or_default(),
            });
        }
        Self::decode(res, "poll login").await
    }
}
