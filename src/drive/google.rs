use super::auth::{DriveAuth, DriveAuthError, OAuthCredentials};
use super::config::{FILES_URL, UPLOAD_URL};
use super::{StorageBackend, StorageError, StoredFile};
use crate::http::build_client;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Response, StatusCode, header::CONTENT_TYPE};
use serde_json::{Value, json};
use tracing::debug;
use uuid::Uuid;

/// Google Drive v3 over plain REST.
pub struct GoogleDriveStorage {
    auth: DriveAuth,
    http: Client,
}

impl GoogleDriveStorage {
    pub fn new(credentials: Option<OAuthCredentials>) -> Self {
        let http = build_client();
        Self {
            auth: DriveAuth::new(credentials, http.clone()),
            http,
        }
    }

    pub fn from_env() -> Self {
        Self::new(OAuthCredentials::from_env())
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, StorageError> {
        let token = self
            .auth
            .access_token(false)
            .await
            .map_err(auth_error)?;
        Ok(request.bearer_auth(token))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StorageError> {
        let response = self
            .authorized(request)
            .await?
            .send()
            .await
            .map_err(|err| StorageError::Request(err.to_string()))?;
        check_status(response).await
    }
}

fn auth_error(err: DriveAuthError) -> StorageError {
    match err {
        DriveAuthError::MissingCredentials => StorageError::Credentials(err.to_string()),
        DriveAuthError::Request(_) => StorageError::Request(err.to_string()),
    }
}

async fn check_status(response: Response) -> Result<Response, StorageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = format!("HTTP {status}: {}", body.trim());
    if status == StatusCode::UNAUTHORIZED {
        Err(StorageError::Unauthorized(message))
    } else {
        Err(StorageError::Request(message))
    }
}

/// Body for a `multipart/related` upload: JSON metadata part, then content.
fn multipart_related_body(boundary: &str, metadata: &Value, mime_type: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + 512);
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(format!("--{boundary}\r\nContent-Type: {mime_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

fn file_metadata(name: &str, folder_id: Option<&str>) -> Value {
    match folder_id {
        Some(folder) => json!({ "name": name, "parents": [folder] }),
        None => json!({ "name": name }),
    }
}

#[async_trait]
impl StorageBackend for GoogleDriveStorage {
    async fn refresh_credentials(&self, force: bool) -> Result<(), StorageError> {
        self.auth
            .access_token(force)
            .await
            .map(|_| ())
            .map_err(auth_error)
    }

    async fn create_file(
        &self,
        name: &str,
        folder_id: Option<&str>,
        mime_type: &str,
        content: Bytes,
    ) -> Result<StoredFile, StorageError> {
        let boundary = format!("labelhub-{}", Uuid::new_v4().simple());
        let body = multipart_related_body(&boundary, &file_metadata(name, folder_id), mime_type, &content);
        let request = self
            .http
            .post(UPLOAD_URL.as_str())
            .query(&[("uploadType", "multipart"), ("fields", "id,webViewLink")])
            .header(CONTENT_TYPE, format!("multipart/related; boundary={boundary}"))
            .body(body);
        let file: StoredFile = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|err| StorageError::Request(format!("invalid upload response: {err}")))?;
        debug!(target = "labelhub.drive", file_id = %file.id, name, "file_created");
        Ok(file)
    }

    async fn share_publicly(&self, file_id: &str) -> Result<(), StorageError> {
        let request = self
            .http
            .post(format!("{}/{file_id}/permissions", *FILES_URL))
            .json(&json!({ "type": "anyone", "role": "reader" }));
        self.send(request).await?;
        Ok(())
    }

    async fn shareable_link(&self, file: &StoredFile) -> Result<String, StorageError> {
        if let Some(link) = file.web_view_link.as_ref().filter(|l| !l.is_empty()) {
            return Ok(link.clone());
        }
        let request = self
            .http
            .get(format!("{}/{}", *FILES_URL, file.id))
            .query(&[("fields", "webViewLink")]);
        let value: Value = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|err| StorageError::Request(format!("invalid file response: {err}")))?;
        value
            .get("webViewLink")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| StorageError::Request(format!("file {} has no view link", file.id)))
    }

    async fn delete_file(&self, file_id: &str) -> Result<(), StorageError> {
        let request = self.http.delete(format!("{}/{file_id}", *FILES_URL));
        self.send(request).await?;
        debug!(target = "labelhub.drive", file_id, "file_deleted");
        Ok(())
    }
}
