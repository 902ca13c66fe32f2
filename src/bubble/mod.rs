use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::{Client, Method, StatusCode, Url};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::RunConfig;
use crate::model::UploadMode;

pub mod model;

use model::{extract_record_id, extract_upload_url, truncate_chars, MAX_ERROR_BODY};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("failed to build HTTP client: {0}")]
    Client(String),
    #[error("invalid endpoint {0}")]
    Endpoint(String),
    #[error("API {status} {status_text} {url} :: {body}")]
    Status {
        status: u16,
        status_text: String,
        url: String,
        body: String,
    },
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("base64 decode failed: {0}")]
    Decode(String),
    #[error("fileupload {status} {status_text} :: {body}")]
    Status {
        status: u16,
        status_text: String,
        body: String,
    },
    #[error("fileupload response has no usable URL: {0}")]
    UnrecognizedResponse(String),
    #[error("fileupload request failed: {0}")]
    Transport(String),
}

impl UploadError {
    /// Errors that only lose the one file; the item is still written.
    pub fn keeps_item(&self) -> bool {
        matches!(self, UploadError::Decode(_) | UploadError::UnrecognizedResponse(_))
    }
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("{0} response carried no record id")]
    MissingId(&'static str),
}

/// Decoded file ready to be sent to the file-upload endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Operations the batch driver needs from the remote object store.
#[async_trait]
pub trait PhotoStore: Send + Sync {
    /// Upload one file and return its normalized http(s) URL.
    async fn upload_file(&self, file: &UploadFile) -> Result<String, UploadError>;

    async fn create_record(&self, body: &Value) -> Result<String, WriteError>;

    async fn update_record(&self, id: &str, body: &Value) -> Result<String, WriteError>;

    async fn fetch_record(&self, id: &str) -> Result<Value, ApiError>;
}

/// Backend workflow endpoints used by the key/value forwarder.
#[async_trait]
pub trait WorkflowApi: Send + Sync {
    async fn upload_workflow_file(
        &self,
        attach_to: Option<&str>,
        filename: &str,
        contents_b64: &str,
    ) -> Result<Value, ApiError>;

    async fn create_photo(&self, url: &str) -> Result<Value, ApiError>;

    async fn create_object(&self, body: &Value) -> Result<Value, ApiError>;
}

#[derive(Clone)]
pub struct BubbleClient {
    http: Client,
    api_base: Url,
    fileupload_url: Url,
    token: String,
    photo_type: String,
    upload_mode: UploadMode,
    attach_to: Option<String>,
}

impl fmt::Debug for BubbleClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BubbleClient")
            .field("api_base", &self.api_base)
            .field("photo_type", &self.photo_type)
            .finish_non_exhaustive()
    }
}

fn parse_base(raw: &str) -> Result<Url, ApiError> {
    // `join` drops the last path segment unless the base ends with a slash
    let with_slash = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{}/", raw)
    };
    Url::parse(&with_slash).map_err(|e| ApiError::Endpoint(format!("{}: {}", raw, e)))
}

impl BubbleClient {
    pub fn from_run_config(cfg: &RunConfig) -> Result<Self, ApiError> {
        let fileupload_url = Url::parse(&cfg.fileupload_url())
            .map_err(|e| ApiError::Endpoint(format!("{}: {}", cfg.fileupload_url(), e)))?;
        let mut client = Self::with_endpoints(
            parse_base(&cfg.api_base())?,
            fileupload_url,
            cfg.token.clone(),
            cfg.http_timeout,
        )?;
        client.photo_type = cfg.photo_type.clone();
        client.upload_mode = cfg.upload_mode;
        client.attach_to = cfg.attach_to.clone();
        Ok(client)
    }

    pub fn with_endpoints(
        api_base: Url,
        fileupload_url: Url,
        token: String,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let http = Client::builder()
            .user_agent("photo-workflow/0.1")
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Client(e.to_string()))?;
        Ok(Self {
            http,
            api_base,
            fileupload_url,
            token,
            photo_type: "Photos".into(),
            upload_mode: UploadMode::Multipart,
            attach_to: None,
        })
    }

    /// Client for the backend workflow API rooted at `api_base`.
    pub fn for_workflows(api_base: &str, token: String, timeout: Duration) -> Result<Self, ApiError> {
        let base = parse_base(api_base)?;
        let fileupload = base
            .join("wf/uploadfile")
            .map_err(|e| ApiError::Endpoint(e.to_string()))?;
        Self::with_endpoints(base, fileupload, token, timeout)
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.api_base
            .join(path)
            .map_err(|e| ApiError::Endpoint(format!("{}{}: {}", self.api_base, path, e)))
    }

    fn object_path(&self, id: Option<&str>) -> String {
        match id {
            Some(id) => format!("obj/{}/{}", self.photo_type, id),
            None => format!("obj/{}", self.photo_type),
        }
    }

    pub fn build_request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Request, ApiError> {
        let url = self.endpoint(path)?;
        let mut builder = self
            .http
            .request(method, url.clone())
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/json");
        if let Some(body) = body {
            builder = builder.json(body);
        }
        builder
            .build()
            .map_err(|e| ApiError::Endpoint(format!("{}: {}", url, e)))
    }

    pub fn build_upload_request(&self, file: &UploadFile) -> Result<reqwest::Request, ApiError> {
        let builder = self
            .http
            .post(self.fileupload_url.clone())
            .header("Authorization", format!("Bearer {}", self.token));
        let builder = match self.upload_mode {
            UploadMode::Multipart => {
                let part = reqwest::multipart::Part::bytes(file.bytes.clone())
                    .file_name(file.name.clone());
                let part = match part.mime_str(&file.content_type) {
                    Ok(part) => part,
                    Err(_) => reqwest::multipart::Part::bytes(file.bytes.clone())
                        .file_name(file.name.clone()),
                };
                builder.multipart(reqwest::multipart::Form::new().part("file", part))
            }
            UploadMode::Json => builder.json(&build_json_upload_body(
                file,
                self.attach_to.as_deref(),
            )),
        };
        builder
            .build()
            .map_err(|e| ApiError::Endpoint(format!("{}: {}", self.fileupload_url, e)))
    }

    /// Send a request and read the body as JSON, or as a JSON string when it is not JSON.
    async fn execute(&self, request: reqwest::Request) -> Result<Value, ApiError> {
        let url = request.url().to_string();
        debug!(method=%request.method(), %url, "sending bubble request (auth redacted)");
        let res = self
            .http
            .execute(request)
            .await
            .map_err(|e| ApiError::Transport {
                url: url.clone(),
                message: e.to_string(),
            })?;
        let status = res.status();
        let text = res.text().await.unwrap_or_default();
        if !status.is_success() {
            warn!(%url, status=%status, "bubble API error");
            return Err(ApiError::Status {
                status: status.as_u16(),
                status_text: status_text(status),
                url,
                body: truncate_chars(&text, MAX_ERROR_BODY),
            });
        }
        debug!(%url, status=%status, body_len = text.len(), "bubble response");
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

fn status_text(status: StatusCode) -> String {
    status.canonical_reason().unwrap_or("").to_string()
}

pub fn build_json_upload_body(file: &UploadFile, attach_to: Option<&str>) -> Value {
    let mut body = json!({
        "name": file.name,
        "contents": BASE64.encode(&file.bytes),
        "private": attach_to.is_some(),
    });
    if let Some(id) = attach_to {
        body["attach_to"] = Value::String(id.to_string());
    }
    body
}

#[async_trait]
impl PhotoStore for BubbleClient {
    async fn upload_file(&self, file: &UploadFile) -> Result<String, UploadError> {
        let request = self
            .build_upload_request(file)
            .map_err(|e| UploadError::Transport(e.to_string()))?;
        debug!(url=%request.url(), name=%file.name, bytes = file.bytes.len(), "uploading file");
        let res = self
            .http
            .execute(request)
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;
        let status = res.status();
        let text = res.text().await.unwrap_or_default();
        if !status.is_success() {
            warn!(status=%status, name=%file.name, "file upload rejected");
            return Err(UploadError::Status {
                status: status.as_u16(),
                status_text: status_text(status),
                body: truncate_chars(&text, MAX_ERROR_BODY),
            });
        }
        extract_upload_url(&text)
            .ok_or_else(|| UploadError::UnrecognizedResponse(truncate_chars(text.trim(), 200)))
    }

    async fn create_record(&self, body: &Value) -> Result<String, WriteError> {
        let request = self.build_request(Method::POST, &self.object_path(None), Some(body))?;
        let response = self.execute(request).await?;
        extract_record_id(&response).ok_or(WriteError::MissingId("create"))
    }

    async fn update_record(&self, id: &str, body: &Value) -> Result<String, WriteError> {
        let request = self.build_request(Method::PATCH, &self.object_path(Some(id)), Some(body))?;
        let response = self.execute(request).await?;
        // PATCH usually answers 204 with no body
        Ok(extract_record_id(&response).unwrap_or_else(|| id.to_string()))
    }

    async fn fetch_record(&self, id: &str) -> Result<Value, ApiError> {
        let request = self.build_request(Method::GET, &self.object_path(Some(id)), None)?;
        self.execute(request).await
    }
}

#[async_trait]
impl WorkflowApi for BubbleClient {
    async fn upload_workflow_file(
        &self,
        attach_to: Option<&str>,
        filename: &str,
        contents_b64: &str,
    ) -> Result<Value, ApiError> {
        let body = json!({
            "attach_to": attach_to,
            "key_file": {
                "filename": filename,
                "contents": contents_b64,
                "private": true,
            }
        });
        let request = self.build_request(Method::POST, "wf/uploadfile", Some(&body))?;
        self.execute(request).await
    }

    async fn create_photo(&self, url: &str) -> Result<Value, ApiError> {
        let body = json!({ "Url": url });
        let request = self.build_request(Method::POST, "obj/photos", Some(&body))?;
        self.execute(request).await
    }

    async fn create_object(&self, body: &Value) -> Result<Value, ApiError> {
        let request = self.build_request(Method::POST, "wf/apicreateobject", Some(body))?;
        self.execute(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, RunConfig};
    use crate::inputs::InputSources;

    fn client(extra: serde_json::Value) -> BubbleClient {
        let mut data = json!({ "token": "tok", "domain": "https://app.io" });
        if let (Some(d), Some(e)) = (data.as_object_mut(), extra.as_object()) {
            for (k, v) in e {
                d.insert(k.clone(), v.clone());
            }
        }
        let sources = InputSources::from_bag(&json!({ "data": data }));
        let cfg = RunConfig::resolve(&Config::default(), &sources).unwrap();
        BubbleClient::from_run_config(&cfg).unwrap()
    }

    #[test]
    fn create_request_targets_object_type() {
        let client = client(json!({ "photoType": "Photos" }));
        let body = json!({ "Urls": [] });
        let request = client
            .build_request(Method::POST, &client.object_path(None), Some(&body))
            .unwrap();
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.url().as_str(), "https://app.io/version-test/api/1.1/obj/Photos");
        assert_eq!(
            request
                .headers()
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "Bearer tok"
        );
        assert_eq!(
            request
                .headers()
                .get("Content-Type")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "application/json"
        );
    }

    #[test]
    fn update_request_uses_live_base_and_id() {
        let client = client(json!({ "env": "live" }));
        let request = client
            .build_request(Method::PATCH, &client.object_path(Some("123x")), Some(&json!({})))
            .unwrap();
        assert_eq!(request.method(), Method::PATCH);
        assert_eq!(request.url().path(), "/api/1.1/obj/Photos/123x");
    }

    #[test]
    fn multipart_upload_request() {
        let client = client(json!({}));
        let file = UploadFile {
            name: "a.jpg".into(),
            content_type: "image/jpeg".into(),
            bytes: vec![1, 2, 3],
        };
        let request = client.build_upload_request(&file).unwrap();
        assert_eq!(request.url().path(), "/version-test/fileupload");
        let content_type = request
            .headers()
            .get("Content-Type")
            .and_then(|h| h.to_str().ok())
            .unwrap();
        assert!(content_type.starts_with("multipart/form-data"));
    }

    #[test]
    fn json_upload_body_inlines_base64() {
        let file = UploadFile {
            name: "a.jpg".into(),
            content_type: "image/jpeg".into(),
            bytes: b"hello".to_vec(),
        };
        let body = build_json_upload_body(&file, Some("org-1"));
        assert_eq!(body["name"], "a.jpg");
        assert_eq!(body["contents"], "aGVsbG8=");
        assert_eq!(body["private"], true);
        assert_eq!(body["attach_to"], "org-1");

        let body = build_json_upload_body(&file, None);
        assert_eq!(body["private"], false);
        assert!(body.get("attach_to").is_none());
    }

    #[test]
    fn workflow_client_endpoints() {
        let client =
            BubbleClient::for_workflows("https://app.io/api/1.1", "t".into(), Duration::from_secs(5))
                .unwrap();
        let request = client
            .build_request(Method::POST, "wf/apicreateobject", Some(&json!({})))
            .unwrap();
        assert_eq!(request.url().as_str(), "https://app.io/api/1.1/wf/apicreateobject");
    }

    #[test]
    fn upload_error_policy() {
        assert!(UploadError::Decode("x".into()).keeps_item());
        assert!(UploadError::UnrecognizedResponse("x".into()).keeps_item());
        assert!(!UploadError::Transport("x".into()).keeps_item());
        assert!(!UploadError::Status {
            status: 500,
            status_text: "Internal Server Error".into(),
            body: String::new()
        }
        .keeps_item());
    }
}
