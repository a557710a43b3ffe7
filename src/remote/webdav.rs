use async_trait::async_trait;
use reqwest::header::{HeaderValue, IF_NONE_MATCH};
use reqwest::{Method, StatusCode, Url};
use std::path::Path;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::accounts::RemoteAccount;
use crate::remote::{RemoteClient, RemoteError, RemoteSession};

/// WebDAV client (Nextcloud, ownCloud, Apache mod_dav, ...).
#[derive(Clone, Default)]
pub struct WebDavClient {
    http: reqwest::Client,
}

impl WebDavClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    pub fn with_http_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

struct WebDavSession {
    http: reqwest::Client,
    base: Url,
    user: String,
    secret: String,
}

/// Map an HTTP status onto the upload-error kinds.
pub fn classify_status(status: StatusCode, what: &str) -> Result<(), RemoteError> {
    if status.is_success() {
        return Ok(());
    }

    match status {
        StatusCode::PRECONDITION_FAILED => {
            Err(RemoteError::AlreadyExists(format!("{what}: {status}")))
        }
        StatusCode::UNAUTHORIZED => Err(RemoteError::AuthExpired(format!("{what}: {status}"))),
        _ => Err(RemoteError::Other(format!("{what}: {status}"))),
    }
}

fn dav_method(name: &str) -> Result<Method, RemoteError> {
    Method::from_bytes(name.as_bytes())
        .map_err(|e| RemoteError::Other(format!("invalid method {name}: {e}")))
}

fn transport_error(what: &str, e: reqwest::Error) -> RemoteError {
    RemoteError::Other(format!("{what}: {e}"))
}

impl WebDavSession {
    fn url_for(&self, remote_path: &str) -> Result<Url, RemoteError> {
        let mut url = self.base.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                RemoteError::Other(format!("endpoint {} cannot hold a path", self.base))
            })?;
            segments.pop_if_empty();
            segments.extend(remote_path.split('/').filter(|s| !s.is_empty()));
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .basic_auth(&self.user, Some(&self.secret))
    }
}

#[async_trait]
impl RemoteClient for WebDavClient {
    async fn connect(&self, account: &RemoteAccount) -> Result<Box<dyn RemoteSession>, RemoteError> {
        let base = Url::parse(&account.endpoint_url).map_err(|e| {
            RemoteError::Other(format!("invalid endpoint {}: {e}", account.endpoint_url))
        })?;

        let session = WebDavSession {
            http: self.http.clone(),
            base,
            user: account.credential.user.clone(),
            secret: account.credential.secret.clone(),
        };

        // Login check: the endpoint must answer an authenticated PROPFIND
        let url = session.url_for("/")?;
        let response = session
            .request(dav_method("PROPFIND")?, url)
            .header("Depth", "0")
            .send()
            .await
            .map_err(|e| transport_error("connect", e))?;
        classify_status(response.status(), "connect")?;

        debug!(account = %account.display_name, "WebDAV session established");
        Ok(Box::new(session))
    }
}

#[async_trait]
impl RemoteSession for WebDavSession {
    async fn create_folder(&mut self, remote_path: &str) -> Result<(), RemoteError> {
        let url = self.url_for(remote_path)?;
        let response = self
            .request(dav_method("MKCOL")?, url)
            .send()
            .await
            .map_err(|e| transport_error("create folder", e))?;

        if response.status() == StatusCode::METHOD_NOT_ALLOWED {
            return Err(RemoteError::AlreadyExists(remote_path.to_string()));
        }
        classify_status(response.status(), "create folder")
    }

    async fn upload(&mut self, local_path: &Path, remote_path: &str) -> Result<(), RemoteError> {
        let url = self.url_for(remote_path)?;
        let file = tokio::fs::File::open(local_path).await.map_err(|e| {
            RemoteError::Other(format!("cannot open {}: {e}", local_path.display()))
        })?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

        let response = self
            .request(Method::PUT, url)
            .header(IF_NONE_MATCH, HeaderValue::from_static("*"))
            .body(body)
            .send()
            .await
            .map_err(|e| transport_error("upload", e))?;

        classify_status(response.status(), remote_path)
    }
}
