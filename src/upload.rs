//! YouTube Shorts upload with OAuth2 installed-app credentials.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use reqwest::header::LOCATION;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use url::Url;

use crate::error::{PipelineError, Result};

const UPLOAD_SCOPE: &str = "https://www.googleapis.com/auth/youtube.upload";
const UPLOAD_ENDPOINT: &str = "https://www.googleapis.com/upload/youtube/v3/videos";
const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
/// People & Blogs
const CATEGORY_ID: &str = "22";

/// Refresh tokens this long before they actually expire.
const EXPIRY_SLACK_SECS: i64 = 60;

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

#[derive(Debug, Clone, Deserialize)]
struct ClientSecrets {
    client_id: String,
    client_secret: String,
    #[serde(default = "default_auth_uri")]
    auth_uri: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

/// Credentials persisted between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

impl StoredCredentials {
    /// Usable without a refresh at `now`. Tokens without a recorded expiry
    /// are trusted.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.token.is_empty()
            && self
                .expiry
                .is_none_or(|expiry| expiry - Duration::seconds(EXPIRY_SLACK_SECS) > now)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadedVideo {
    id: String,
}

pub fn load_credentials(path: &Path) -> Result<Option<StoredCredentials>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&data)?))
}

pub fn save_credentials(path: &Path, credentials: &StoredCredentials) -> Result<()> {
    let data = serde_json::to_string_pretty(credentials)?;
    std::fs::write(path, data)?;
    Ok(())
}

/// Pull the authorization code out of the redirect request line,
/// e.g. `GET /?code=4/abc&scope=... HTTP/1.1`.
fn parse_redirect(request_line: &str) -> Result<String> {
    let target = request_line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| PipelineError::Upload("malformed OAuth redirect".to_string()))?;
    let url = Url::parse(&format!("http://localhost{target}"))
        .map_err(|e| PipelineError::Upload(format!("bad OAuth redirect: {e}")))?;

    let mut code = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "error" => {
                return Err(PipelineError::Upload(format!("consent denied: {value}")));
            }
            _ => {}
        }
    }
    code.ok_or_else(|| PipelineError::Upload("OAuth redirect carried no code".to_string()))
}

/// Uploads finished videos to YouTube.
pub struct YouTubeUploader {
    client: Client,
    secrets_path: PathBuf,
    credentials_path: PathBuf,
}

impl YouTubeUploader {
    pub fn new(secrets_path: impl Into<PathBuf>, credentials_path: impl Into<PathBuf>) -> Self {
        Self {
            client: Client::new(),
            secrets_path: secrets_path.into(),
            credentials_path: credentials_path.into(),
        }
    }

    fn client_secrets(&self) -> Result<ClientSecrets> {
        let data = std::fs::read_to_string(&self.secrets_path).map_err(|e| {
            PipelineError::config(format!(
                "cannot read client secrets {}: {e}",
                self.secrets_path.display()
            ))
        })?;
        let file: ClientSecretsFile = serde_json::from_str(&data)?;
        file.installed
            .or(file.web)
            .ok_or_else(|| PipelineError::config("client secrets have no 'installed' section"))
    }

    /// Load stored credentials, refreshing or re-consenting as needed, and
    /// persist the result.
    async fn authenticate(&self) -> Result<StoredCredentials> {
        let stored = load_credentials(&self.credentials_path)?;
        let credentials = match stored {
            Some(c) if c.is_valid_at(Utc::now()) => return Ok(c),
            Some(c) if c.refresh_token.is_some() => match self.refresh(&c).await {
                Ok(refreshed) => refreshed,
                Err(e) => {
                    warn!("Token refresh failed, starting consent flow: {}", e);
                    self.consent_flow().await?
                }
            },
            _ => self.consent_flow().await?,
        };
        save_credentials(&self.credentials_path, &credentials)?;
        Ok(credentials)
    }

    async fn refresh(&self, credentials: &StoredCredentials) -> Result<StoredCredentials> {
        let refresh_token = credentials.refresh_token.clone().unwrap_or_default();
        let params = [
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("refresh_token", refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];
        let token: TokenResponse = self
            .client
            .post(&credentials.token_uri)
            .form(&params)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        info!("Refreshed YouTube access token");

        Ok(StoredCredentials {
            token: token.access_token,
            refresh_token: token.refresh_token.or(credentials.refresh_token.clone()),
            expiry: token.expires_in.map(|secs| Utc::now() + Duration::seconds(secs)),
            ..credentials.clone()
        })
    }

    /// Installed-app consent: the user opens the printed URL, the browser is
    /// redirected to a one-shot listener on the loopback interface.
    async fn consent_flow(&self) -> Result<StoredCredentials> {
        let secrets = self.client_secrets()?;
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let redirect_uri = format!("http://127.0.0.1:{}/", listener.local_addr()?.port());

        let auth_url = Url::parse_with_params(
            &secrets.auth_uri,
            &[
                ("client_id", secrets.client_id.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", UPLOAD_SCOPE),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| PipelineError::config(format!("bad auth_uri: {e}")))?;
        info!("Please visit this URL to authorize this application: {}", auth_url);

        let (stream, _) = listener.accept().await?;
        let mut reader = BufReader::new(stream);
        let mut request_line = String::new();
        reader.read_line(&mut request_line).await?;
        let code = parse_redirect(&request_line);

        let body = match &code {
            Ok(_) => "The authentication flow has completed. You may close this window.",
            Err(_) => "Authorization failed. You may close this window.",
        };
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        reader.get_mut().write_all(response.as_bytes()).await?;
        let code = code?;

        let params = [
            ("code", code.as_str()),
            ("client_id", secrets.client_id.as_str()),
            ("client_secret", secrets.client_secret.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];
        let token: TokenResponse = self
            .client
            .post(&secrets.token_uri)
            .form(&params)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(StoredCredentials {
            token: token.access_token,
            refresh_token: token.refresh_token,
            token_uri: secrets.token_uri,
            client_id: secrets.client_id,
            client_secret: secrets.client_secret,
            scopes: vec![UPLOAD_SCOPE.to_string()],
            expiry: token.expires_in.map(|secs| Utc::now() + Duration::seconds(secs)),
        })
    }

    /// Upload `video` as a public Short and return its URL.
    pub async fn upload(&self, video: &Path, title: &str, description: &str) -> Result<String> {
        self.try_upload(video, title, description)
            .await
            .inspect(|url| info!("Short uploaded: {}", url))
            .inspect_err(|e| error!("Short upload failed: {}", e))
    }

    async fn try_upload(&self, video: &Path, title: &str, description: &str) -> Result<String> {
        let credentials = self.authenticate().await?;
        let bytes = tokio::fs::read(video).await?;

        let metadata = json!({
            "snippet": {
                "title": title,
                "description": description,
                "categoryId": CATEGORY_ID,
            },
            "status": {
                "privacyStatus": "public",
                "selfDeclaredMadeForKids": false,
            },
        });
        let session = self
            .client
            .post(UPLOAD_ENDPOINT)
            .query(&[("uploadType", "resumable"), ("part", "snippet,status")])
            .bearer_auth(&credentials.token)
            .header("X-Upload-Content-Type", "video/mp4")
            .header("X-Upload-Content-Length", bytes.len())
            .json(&metadata)
            .send()
            .await?
            .error_for_status()?;
        let location = session
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| PipelineError::Upload("no resumable session URL".to_string()))?
            .to_string();

        let uploaded: UploadedVideo = self
            .client
            .put(location)
            .bearer_auth(&credentials.token)
            .header("Content-Type", "video/mp4")
            .body(bytes)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(format!("https://youtube.com/shorts/{}", uploaded.id))
    }
}
