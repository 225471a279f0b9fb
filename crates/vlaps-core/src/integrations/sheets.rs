//! Google Sheets as the remote lap store.
//!
//! The spreadsheet keeps a row counter in `A1` and one lap per row from
//! row 2 on, in columns `B..I`. Appending a lap reads the counter and writes
//! the bumped counter together with the new row in one batch update.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::oauth::{self, OAuthConfig};
use super::traits::RemoteStore;
use super::CredentialStore;
use crate::error::{AuthError, DeliveryError};
use crate::models::LapDetailed;
use crate::storage::GoogleConfig;

pub const SPREADSHEET_ID_KEY: &str = "spreadsheet_id";
pub const CLIENT_ID_KEY: &str = "google_client_id";
pub const CLIENT_SECRET_KEY: &str = "google_client_secret";

pub const HEADERS: [&str; 8] = [
    "id",
    "sessionId",
    "idx",
    "poolMeters",
    "lapMeters",
    "begin",
    "seconds",
    "lapDelay",
];

/// An authorized view on the lap spreadsheet, valid for one sync pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetHandle {
    pub spreadsheet_id: String,
    access_token: String,
}

impl SheetHandle {
    pub fn new(spreadsheet_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            spreadsheet_id: spreadsheet_id.into(),
            access_token: access_token.into(),
        }
    }
}

pub struct GoogleSheetsStore {
    http: Client,
    api_base: String,
    title: String,
    redirect_port: u16,
    auth_url: String,
    token_url: String,
    credentials: Arc<dyn CredentialStore>,
}

impl GoogleSheetsStore {
    pub fn new(
        config: &GoogleConfig,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, AuthError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;
        Ok(Self {
            http,
            api_base: config.sheets_api_base.trim_end_matches('/').to_string(),
            title: config.spreadsheet_title.clone(),
            redirect_port: config.redirect_port,
            auth_url: oauth::GOOGLE_AUTH_URL.to_string(),
            token_url: oauth::GOOGLE_TOKEN_URL.to_string(),
            credentials,
        })
    }

    /// Point the OAuth flow at other endpoints.
    pub fn with_oauth_endpoints(
        mut self,
        auth_url: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        self.auth_url = auth_url.into();
        self.token_url = token_url.into();
        self
    }

    pub fn credentials(&self) -> &dyn CredentialStore {
        &*self.credentials
    }

    /// Persist the OAuth client credentials used for consent and refresh.
    pub fn set_client_credentials(&self, client_id: &str, client_secret: &str) -> Result<(), AuthError> {
        self.credentials.set(CLIENT_ID_KEY, client_id)?;
        self.credentials.set(CLIENT_SECRET_KEY, client_secret)
    }

    pub fn spreadsheet_id(&self) -> Result<Option<String>, AuthError> {
        self.credentials.get(SPREADSHEET_ID_KEY)
    }

    pub fn is_authenticated(&self) -> Result<bool, AuthError> {
        Ok(oauth::load_tokens(self.credentials())?.is_some())
    }

    /// Forget the token. The spreadsheet id is kept so a later login reuses it.
    pub fn logout(&self) -> Result<(), AuthError> {
        oauth::remove_tokens(self.credentials())
    }

    fn oauth_config(&self) -> Result<OAuthConfig, AuthError> {
        let client_id = self.credentials.get(CLIENT_ID_KEY)?;
        let client_secret = self.credentials.get(CLIENT_SECRET_KEY)?;
        match (client_id, client_secret) {
            (Some(client_id), Some(client_secret)) if !client_id.is_empty() => Ok(OAuthConfig {
                client_id,
                client_secret,
                auth_url: self.auth_url.clone(),
                token_url: self.token_url.clone(),
                scopes: vec![oauth::SHEETS_SCOPE.to_string()],
                redirect_port: self.redirect_port,
            }),
            _ => Err(AuthError::CredentialsNotConfigured),
        }
    }

    /// Return a valid access token, refreshing if expired.
    pub async fn access_token(&self) -> Result<String, AuthError> {
        let tokens =
            oauth::load_tokens(self.credentials())?.ok_or(AuthError::NotAuthenticated)?;
        if !oauth::is_expired(&tokens) {
            return Ok(tokens.access_token);
        }

        let refresh = tokens.refresh_token.as_deref().ok_or(AuthError::TokenExpired)?;
        let config = self.oauth_config()?;
        match oauth::refresh_token(&self.http, &config, refresh).await {
            Ok(fresh) => {
                oauth::save_tokens(self.credentials(), &fresh)?;
                Ok(fresh.access_token)
            }
            Err(e) => {
                warn!(error = %e, "token refresh failed");
                Err(AuthError::TokenExpired)
            }
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v4/spreadsheets{}", self.api_base, path)
    }

    /// Verify the spreadsheet is reachable with `token`. A rejected token is
    /// removed from the credential store.
    async fn check_spreadsheet(&self, token: &str, spreadsheet_id: &str) -> Result<(), AuthError> {
        let resp = self
            .http
            .get(self.url(&format!("/{spreadsheet_id}")))
            .query(&[("fields", "spreadsheetId")])
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        match resp.status() {
            s if s.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED => {
                warn!("stored token rejected, removing it");
                self.invalidate_token()?;
                Err(AuthError::Unauthorized)
            }
            StatusCode::NOT_FOUND => Err(AuthError::SpreadsheetMissing),
            s => Err(AuthError::Unavailable(format!("HTTP {s}"))),
        }
    }

    async fn create_spreadsheet(&self, token: &str) -> Result<String, AuthError> {
        let resp = self
            .http
            .post(self.url(""))
            .bearer_auth(token)
            .json(&json!({ "properties": { "title": self.title } }))
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;
        let body: Value = checked(resp)
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        let id = body["spreadsheetId"]
            .as_str()
            .ok_or_else(|| AuthError::Unavailable("no spreadsheetId in response".into()))?
            .to_string();
        info!(spreadsheet_id = %id, title = %self.title, "created lap spreadsheet");
        Ok(id)
    }

    async fn batch_update(&self, handle: &SheetHandle, data: Value) -> Result<(), DeliveryError> {
        let resp = self
            .http
            .post(self.url(&format!("/{}/values:batchUpdate", handle.spreadsheet_id)))
            .bearer_auth(&handle.access_token)
            .json(&json!({ "valueInputOption": "RAW", "data": data }))
            .send()
            .await?;
        checked(resp).await?;
        Ok(())
    }

    async fn read_row_count(&self, handle: &SheetHandle) -> Result<u64, DeliveryError> {
        let resp = self
            .http
            .get(self.url(&format!("/{}/values/A1:A1", handle.spreadsheet_id)))
            .query(&[("valueRenderOption", "UNFORMATTED_VALUE")])
            .bearer_auth(&handle.access_token)
            .send()
            .await?;
        let body: Value = checked(resp).await?.json().await?;
        row_count(&body).ok_or_else(|| DeliveryError::Other("bad row count in A1".into()))
    }

    /// Make sure a usable spreadsheet exists, creating and initializing one
    /// when none is stored or the stored one is gone. Returns its id.
    pub async fn provision_spreadsheet(&self, token: &str) -> Result<String, AuthError> {
        if let Some(id) = self.spreadsheet_id()? {
            match self.check_spreadsheet(token, &id).await {
                Ok(()) => return Ok(id),
                Err(AuthError::SpreadsheetMissing) => {
                    warn!(spreadsheet_id = %id, "stored spreadsheet is gone, creating a new one")
                }
                Err(e) => return Err(e),
            }
        }

        let id = self.create_spreadsheet(token).await?;
        let handle = SheetHandle::new(id.clone(), token);
        self.batch_update(&handle, init_data())
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;
        self.credentials.set(SPREADSHEET_ID_KEY, &id)?;
        Ok(id)
    }
}

#[async_trait]
impl RemoteStore for GoogleSheetsStore {
    type Handle = SheetHandle;

    async fn ensure_authorized(&self) -> Result<SheetHandle, AuthError> {
        let spreadsheet_id = self.spreadsheet_id()?.ok_or(AuthError::SpreadsheetMissing)?;
        let token = self.access_token().await?;
        self.check_spreadsheet(&token, &spreadsheet_id).await?;
        Ok(SheetHandle::new(spreadsheet_id, token))
    }

    async fn append_lap(&self, handle: &SheetHandle, lap: &LapDetailed) -> Result<(), DeliveryError> {
        let count = self.read_row_count(handle).await?;
        self.batch_update(handle, append_data(count, lap)).await?;
        debug!(lap_id = %lap.lap.id, row = count + 2, "lap row written");
        Ok(())
    }

    fn invalidate_token(&self) -> Result<(), AuthError> {
        oauth::remove_tokens(self.credentials())
    }

    async fn reauthorize(&self) -> Result<(), AuthError> {
        let config = self.oauth_config()?;
        let tokens = oauth::authorize(&self.http, &config).await?;
        oauth::save_tokens(self.credentials(), &tokens)?;
        info!("authorized with Google");
        self.provision_spreadsheet(&tokens.access_token).await?;
        Ok(())
    }
}

/// Pass through successful responses; turn the rest into a delivery error.
async fn checked(resp: Response) -> Result<Response, DeliveryError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(classify(status, &body))
}

pub fn classify(status: StatusCode, body: &str) -> DeliveryError {
    match status {
        StatusCode::UNAUTHORIZED => DeliveryError::Unauthorized,
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            DeliveryError::Transient(format!("HTTP {status}"))
        }
        s if s.is_server_error() => DeliveryError::Transient(format!("HTTP {s}")),
        s => DeliveryError::Other(format!("HTTP {s}: {}", body.trim())),
    }
}

/// The row counter from a `values.get` response on `A1:A1`.
fn row_count(body: &Value) -> Option<u64> {
    let cell = body.get("values")?.get(0)?.get(0)?;
    match cell {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Cells of one lap row, in `HEADERS` order.
pub fn lap_row(lap: &LapDetailed) -> Value {
    let l = &lap.lap;
    json!([
        l.id,
        l.session_id,
        l.idx,
        l.pool_meters,
        l.lap_meters(),
        l.begin.to_rfc3339(),
        l.seconds,
        l.delay_seconds(),
    ])
}

fn append_data(count: u64, lap: &LapDetailed) -> Value {
    let row = count + 2;
    json!([
        { "range": "A1", "values": [[count + 1]] },
        { "range": format!("B{row}:I{row}"), "values": [lap_row(lap)] },
    ])
}

fn init_data() -> Value {
    json!([
        { "range": "A1", "values": [[0]] },
        { "range": "B1:I1", "values": [HEADERS] },
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Lap, LapTotals};
    use chrono::{TimeZone, Utc};

    fn lap() -> LapDetailed {
        LapDetailed {
            lap: Lap {
                id: "lap-1".into(),
                session_id: "s-1".into(),
                idx: 3,
                pool_meters: 25.0,
                begin: Utc.with_ymd_and_hms(2024, 5, 1, 7, 30, 0).unwrap(),
                seconds: 47.5,
                expected_seconds: 45.0,
                synced: false,
            },
            totals: LapTotals::default(),
        }
    }

    #[test]
    fn lap_row_column_order() {
        let row = lap_row(&lap());
        assert_eq!(
            row,
            json!(["lap-1", "s-1", 3, 25.0, 50.0, "2024-05-01T07:30:00+00:00", 47.5, 2.5])
        );
        assert_eq!(row.as_array().unwrap().len(), HEADERS.len());
    }

    #[test]
    fn append_targets_row_after_counter() {
        let data = append_data(4, &lap());
        assert_eq!(data[0]["range"], "A1");
        assert_eq!(data[0]["values"], json!([[5]]));
        assert_eq!(data[1]["range"], "B6:I6");
    }

    #[test]
    fn init_writes_counter_and_headers() {
        let data = init_data();
        assert_eq!(data[0]["values"], json!([[0]]));
        assert_eq!(data[1]["range"], "B1:I1");
        assert_eq!(data[1]["values"][0][0], "id");
        assert_eq!(data[1]["values"][0][7], "lapDelay");
    }

    #[test]
    fn row_count_accepts_numbers_and_strings() {
        assert_eq!(row_count(&json!({"values": [[7]]})), Some(7));
        assert_eq!(row_count(&json!({"values": [[7.0]]})), Some(7));
        assert_eq!(row_count(&json!({"values": [["12"]]})), Some(12));
        assert_eq!(row_count(&json!({"range": "Sheet1!A1"})), None);
        assert_eq!(row_count(&json!({"values": [["x"]]})), None);
    }

    #[test]
    fn status_classification() {
        assert_eq!(classify(StatusCode::UNAUTHORIZED, ""), DeliveryError::Unauthorized);
        assert!(matches!(
            classify(StatusCode::TOO_MANY_REQUESTS, ""),
            DeliveryError::Transient(_)
        ));
        assert!(matches!(
            classify(StatusCode::BAD_GATEWAY, ""),
            DeliveryError::Transient(_)
        ));
        assert!(matches!(
            classify(StatusCode::BAD_REQUEST, "bad range"),
            DeliveryError::Other(msg) if msg.contains("bad range")
        ));
    }
}
