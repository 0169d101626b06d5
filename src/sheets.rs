//! Utilities for working with Google Sheets.

use {
    std::path::PathBuf,
    serde::Serialize,
    tokio::time::sleep_until,
    yup_oauth2::{
        ServiceAccountAuthenticator,
        read_service_account_key,
    },
    crate::prelude::*,
};

/// from <https://developers.google.com/sheets/api/limits#quota>:
///
/// > Write requests […] Per minute per user per project […] 60
const RATE_LIMIT: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error(transparent)] OAuth(#[from] yup_oauth2::Error),
    #[error(transparent)] Reqwest(#[from] reqwest::Error),
    #[error(transparent)] Wheel(#[from] wheel::Error),
    #[error("empty token is not valid")]
    EmptyToken,
    #[error("OAuth token is expired")]
    TokenExpired,
}

impl IsNetworkError for Error {
    fn is_network_error(&self) -> bool {
        match self {
            Self::OAuth(_) => false,
            Self::Reqwest(e) => e.is_network_error(),
            Self::Wheel(e) => e.is_network_error(),
            Self::EmptyToken => false,
            Self::TokenExpired => false,
        }
    }
}

/// The remote calls the spreadsheet mirror needs.
#[async_trait]
pub(crate) trait SheetsBackend: Send {
    /// Reads a range row by row. Trailing empty cells and rows are omitted by the API.
    async fn values(&mut self, range: &str) -> Result<Vec<Vec<String>>, Error>;
    /// Appends rows after the last row of the table found in `range`.
    async fn append_rows(&mut self, range: &str, rows: Vec<Vec<String>>) -> Result<(), Error>;
    /// Overwrites several ranges in a single request.
    async fn batch_update(&mut self, data: Vec<(String, Vec<Vec<String>>)>) -> Result<(), Error>;
}

/// A spreadsheet accessed with a Google service account.
pub(crate) struct GoogleSheets {
    http_client: reqwest::Client,
    sheet_id: String,
    service_account_key: PathBuf,
    next_request: Instant,
}

impl GoogleSheets {
    pub(crate) fn new(http_client: reqwest::Client, sheet_id: String, service_account_key: PathBuf) -> Self {
        Self {
            next_request: Instant::now(),
            http_client, sheet_id, service_account_key,
        }
    }

    async fn auth_token(&self) -> Result<String, Error> {
        let gsuite_secret = read_service_account_key(&self.service_account_key).await.at(&self.service_account_key)?;
        let auth = ServiceAccountAuthenticator::builder(gsuite_secret)
            .build().await.at_unknown()?;
        let token = auth.token(&["https://www.googleapis.com/auth/spreadsheets"]).await?;
        if token.is_expired() { return Err(Error::TokenExpired) }
        let Some(token) = token.token() else { return Err(Error::EmptyToken) };
        if token.is_empty() { return Err(Error::EmptyToken) }
        Ok(token.to_owned())
    }
}

#[derive(Debug, Deserialize)]
struct AppendResponse {
    updates: AppendUpdates,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendUpdates {
    updated_range: String,
    updated_rows: i32,
}

#[async_trait]
impl SheetsBackend for GoogleSheets {
    async fn values(&mut self, range: &str) -> Result<Vec<Vec<String>>, Error> {
        #[derive(Deserialize)]
        struct ValueRange {
            #[serde(default)]
            values: Vec<Vec<String>>,
        }

        sleep_until(self.next_request).await;
        let token = self.auth_token().await?;
        let ValueRange { values } = self.http_client.get(&format!("https://sheets.googleapis.com/v4/spreadsheets/{}/values/{range}", self.sheet_id))
            .bearer_auth(token)
            .query(&[
                ("valueRenderOption", "FORMATTED_VALUE"),
                ("majorDimension", "ROWS"),
            ])
            .send().await?
            .detailed_error_for_status().await?
            .json_with_text_in_error::<ValueRange>().await?;
        self.next_request = Instant::now() + RATE_LIMIT;
        Ok(values)
    }

    async fn append_rows(&mut self, range: &str, rows: Vec<Vec<String>>) -> Result<(), Error> {
        #[derive(Serialize)]
        struct ValueRange {
            values: Vec<Vec<String>>,
        }

        sleep_until(self.next_request).await;
        let token = self.auth_token().await?;
        let AppendResponse { updates } = self.http_client.post(&format!("https://sheets.googleapis.com/v4/spreadsheets/{}/values/{range}:append", self.sheet_id))
            .bearer_auth(token)
            .query(&[
                ("valueInputOption", "USER_ENTERED"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .json(&ValueRange { values: rows })
            .send().await?
            .detailed_error_for_status().await?
            .json_with_text_in_error::<AppendResponse>().await?;
        self.next_request = Instant::now() + RATE_LIMIT;
        log::debug!("appended {} rows to {}", updates.updated_rows, updates.updated_range);
        Ok(())
    }

    async fn batch_update(&mut self, data: Vec<(String, Vec<Vec<String>>)>) -> Result<(), Error> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct BatchUpdateRequest {
            data: Vec<ValueRange>,
            value_input_option: &'static str,
        }

        #[derive(Serialize)]
        struct ValueRange {
            range: String,
            values: Vec<Vec<String>>,
        }

        if data.is_empty() {
            return Ok(())
        }
        sleep_until(self.next_request).await;
        let token = self.auth_token().await?;
        let request = BatchUpdateRequest {
            data: data.into_iter().map(|(range, values)| ValueRange { range, values }).collect(),
            value_input_option: "USER_ENTERED",
        };
        self.http_client.post(&format!("https://sheets.googleapis.com/v4/spreadsheets/{}/values:batchUpdate", self.sheet_id))
            .bearer_auth(token)
            .json(&request)
            .send().await?
            .detailed_error_for_status().await?;
        self.next_request = Instant::now() + RATE_LIMIT;
        Ok(())
    }
}
