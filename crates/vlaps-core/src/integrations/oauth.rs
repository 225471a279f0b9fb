//! Lightweight OAuth2 Authorization Code flow for desktop apps.
//!
//! 1. Opens browser to authorization URL
//! 2. Listens on localhost for the callback
//! 3. Exchanges the code for an access token (+ refresh token)
//!
//! Persisting the tokens is up to the caller, see [`save_tokens`].

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

use super::CredentialStore;
use crate::error::{AuthError, OAuthError};

pub const CALLBACK_TIMEOUT_SECS: u64 = 300;
pub const TOKEN_KEY: &str = "google_sheets_token";

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
/// See, edit, create, and delete only the Drive files this app creates.
pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>, // Unix timestamp
    pub token_type: String,
    pub scope: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
    pub redirect_port: u16,
}

impl OAuthConfig {
    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}/callback", self.redirect_port)
    }

    pub fn auth_url_full(&self) -> Result<String, OAuthError> {
        let scopes = self.scopes.join(" ");
        let redirect = self.redirect_uri();
        let url = url::Url::parse_with_params(
            &self.auth_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect.as_str()),
                ("response_type", "code"),
                ("scope", scopes.as_str()),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| OAuthError::AuthorizationFailed(e.to_string()))?;
        Ok(url.into())
    }
}

const SUCCESS_PAGE: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n<html><body><h2>vlaps is connected to Google Sheets.</h2><p>You can close this tab.</p><script>window.close()</script></body></html>";

/// Run the full OAuth2 flow: open browser -> listen for callback -> exchange code.
pub async fn authorize(http: &Client, config: &OAuthConfig) -> Result<OAuthTokens, OAuthError> {
    let failed = |e: std::io::Error| OAuthError::AuthorizationFailed(e.to_string());

    let listener = TcpListener::bind(("127.0.0.1", config.redirect_port))
        .await
        .map_err(failed)?;
    let auth_url = config.auth_url_full()?;
    info!(port = config.redirect_port, "opening browser for Google consent");
    open::that(&auth_url).map_err(failed)?;

    let (mut stream, _) = tokio::time::timeout(
        Duration::from_secs(CALLBACK_TIMEOUT_SECS),
        listener.accept(),
    )
    .await?
    .map_err(failed)?;

    let mut buf = [0u8; 4096];
    let n = stream.read(&mut buf).await.map_err(failed)?;
    let request = String::from_utf8_lossy(&buf[..n]);

    let code = match parse_callback(&request) {
        Ok(code) => code,
        Err(e) => {
            let _ = stream
                .write_all(b"HTTP/1.1 400 Bad Request\r\n\r\nAuthorization failed.")
                .await;
            return Err(e);
        }
    };
    stream
        .write_all(SUCCESS_PAGE.as_bytes())
        .await
        .map_err(failed)?;
    drop(stream);
    drop(listener);

    exchange_code(http, config, &code).await
}

/// Exchange authorization code for tokens.
async fn exchange_code(
    http: &Client,
    config: &OAuthConfig,
    code: &str,
) -> Result<OAuthTokens, OAuthError> {
    let redirect = config.redirect_uri();
    let params = [
        ("client_id", config.client_id.as_str()),
        ("client_secret", config.client_secret.as_str()),
        ("code", code),
        ("grant_type", "authorization_code"),
        ("redirect_uri", redirect.as_str()),
    ];

    let body: serde_json::Value = http
        .post(&config.token_url)
        .form(&params)
        .send()
        .await
        .map_err(|e| OAuthError::TokenExchangeFailed(e.to_string()))?
        .json()
        .await
        .map_err(|e| OAuthError::TokenExchangeFailed(e.to_string()))?;

    tokens_from_response(&body, None).map_err(OAuthError::TokenExchangeFailed)
}

/// Refresh an access token using a refresh token.
pub async fn refresh_token(
    http: &Client,
    config: &OAuthConfig,
    refresh: &str,
) -> Result<OAuthTokens, OAuthError> {
    let params = [
        ("client_id", config.client_id.as_str()),
        ("client_secret", config.client_secret.as_str()),
        ("refresh_token", refresh),
        ("grant_type", "refresh_token"),
    ];

    let body: serde_json::Value = http
        .post(&config.token_url)
        .form(&params)
        .send()
        .await
        .map_err(|e| OAuthError::TokenRefreshFailed(e.to_string()))?
        .json()
        .await
        .map_err(|e| OAuthError::TokenRefreshFailed(e.to_string()))?;

    debug!("access token refreshed");
    tokens_from_response(&body, Some(refresh)).map_err(OAuthError::TokenRefreshFailed)
}

/// Build tokens from a token-endpoint response. Refresh responses usually
/// omit the refresh token, so the previous one is carried over.
pub fn tokens_from_response(
    body: &serde_json::Value,
    previous_refresh: Option<&str>,
) -> Result<OAuthTokens, String> {
    if let Some(error) = body.get("error") {
        return Err(format!("OAuth error: {error}"));
    }

    let access_token = body["access_token"]
        .as_str()
        .filter(|t| !t.is_empty())
        .ok_or("no access_token in response")?
        .to_string();
    let expires_in = body.get("expires_in").and_then(|v| v.as_i64());
    let expires_at = expires_in.map(|ei| chrono::Utc::now().timestamp() + ei);

    Ok(OAuthTokens {
        access_token,
        refresh_token: body
            .get("refresh_token")
            .and_then(|v| v.as_str())
            .map(String::from)
            .or_else(|| previous_refresh.map(String::from)),
        expires_at,
        token_type: body["token_type"].as_str().unwrap_or("Bearer").to_string(),
        scope: body.get("scope").and_then(|v| v.as_str()).map(String::from),
    })
}

/// Load stored tokens. Unreadable token JSON counts as no token.
pub fn load_tokens(store: &dyn CredentialStore) -> Result<Option<OAuthTokens>, AuthError> {
    Ok(store
        .get(TOKEN_KEY)?
        .and_then(|json| serde_json::from_str(&json).ok()))
}

pub fn save_tokens(store: &dyn CredentialStore, tokens: &OAuthTokens) -> Result<(), AuthError> {
    let json = serde_json::to_string(tokens).map_err(|e| AuthError::Keyring(e.to_string()))?;
    store.set(TOKEN_KEY, &json)
}

pub fn remove_tokens(store: &dyn CredentialStore) -> Result<(), AuthError> {
    store.delete(TOKEN_KEY)
}

/// Check if stored tokens are expired (with 60s buffer).
pub fn is_expired(tokens: &OAuthTokens) -> bool {
    match tokens.expires_at {
        Some(exp) => chrono::Utc::now().timestamp() > exp - 60,
        None => false,
    }
}

/// Extract the code from `GET /callback?code=XXX&...`; a denied consent
/// arrives as `?error=access_denied`.
fn parse_callback(request: &str) -> Result<String, OAuthError> {
    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .ok_or_else(|| OAuthError::InvalidCallback("empty request".into()))?;
    let url = url::Url::parse(&format!("http://localhost{path}"))
        .map_err(|e| OAuthError::InvalidCallback(e.to_string()))?;

    if let Some((_, error)) = url.query_pairs().find(|(k, _)| k == "error") {
        return Err(OAuthError::AuthorizationFailed(error.into_owned()));
    }
    url.query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.into_owned())
        .ok_or_else(|| OAuthError::InvalidCallback("no code in callback".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::MemoryCredentials;

    fn config() -> OAuthConfig {
        OAuthConfig {
            client_id: "client id".into(),
            client_secret: "secret".into(),
            auth_url: GOOGLE_AUTH_URL.into(),
            token_url: GOOGLE_TOKEN_URL.into(),
            scopes: vec![SHEETS_SCOPE.into()],
            redirect_port: 19822,
        }
    }

    #[test]
    fn auth_url_is_encoded() {
        let url = config().auth_url_full().unwrap();
        assert!(url.starts_with(GOOGLE_AUTH_URL));
        assert!(url.contains("client_id=client+id"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A19822%2Fcallback"));
        assert!(url.contains("access_type=offline"));
    }

    #[test]
    fn callback_with_code() {
        let req = "GET /callback?code=4%2Fabc&scope=x HTTP/1.1\r\nHost: localhost\r\n\r\n";
        assert_eq!(parse_callback(req).unwrap(), "4/abc");
    }

    #[test]
    fn callback_with_denied_consent() {
        let req = "GET /callback?error=access_denied HTTP/1.1\r\n\r\n";
        assert!(matches!(
            parse_callback(req),
            Err(OAuthError::AuthorizationFailed(e)) if e == "access_denied"
        ));
        assert!(matches!(
            parse_callback("GET /favicon.ico HTTP/1.1\r\n\r\n"),
            Err(OAuthError::InvalidCallback(_))
        ));
    }

    #[test]
    fn refresh_response_keeps_previous_refresh_token() {
        let body = serde_json::json!({
            "access_token": "new",
            "expires_in": 3600,
            "token_type": "Bearer"
        });
        let tokens = tokens_from_response(&body, Some("keep-me")).unwrap();
        assert_eq!(tokens.access_token, "new");
        assert_eq!(tokens.refresh_token.as_deref(), Some("keep-me"));
        assert!(!is_expired(&tokens));
    }

    #[test]
    fn error_response_is_rejected() {
        let body = serde_json::json!({"error": "invalid_grant"});
        assert!(tokens_from_response(&body, None).is_err());
        assert!(tokens_from_response(&serde_json::json!({}), None).is_err());
    }

    #[test]
    fn expiry_has_a_buffer() {
        let mut tokens = OAuthTokens {
            access_token: "t".into(),
            refresh_token: None,
            expires_at: None,
            token_type: "Bearer".into(),
            scope: None,
        };
        assert!(!is_expired(&tokens));
        tokens.expires_at = Some(chrono::Utc::now().timestamp() + 30);
        assert!(is_expired(&tokens));
    }

    #[test]
    fn token_persistence() {
        let store = MemoryCredentials::new();
        assert!(load_tokens(&store).unwrap().is_none());
        let tokens = tokens_from_response(&serde_json::json!({"access_token": "a"}), None).unwrap();
        save_tokens(&store, &tokens).unwrap();
        assert_eq!(load_tokens(&store).unwrap(), Some(tokens));
        remove_tokens(&store).unwrap();
        assert!(load_tokens(&store).unwrap().is_none());

        store.set(TOKEN_KEY, "not json").unwrap();
        assert!(load_tokens(&store).unwrap().is_none());
    }
}
