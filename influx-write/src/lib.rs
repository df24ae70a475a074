use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

mod line;
pub use line::{encode, escape_field_key, escape_measurement};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    HttpErr(#[from] reqwest::Error),

    #[error(transparent)]
    UrlErr(#[from] url::ParseError),

    #[error("{status}{}", match .message {
        Some(msg) => format!(" - {}", &msg),
        None => "".to_owned(),
    })]
    ServerError { status: u16, message: Option<String> },
}

type Result<T> = std::result::Result<T, Error>;

/// Writes line-protocol bodies to a single database through `POST /write?db=<database>`.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    write_url: Url,
}

impl Client {
    pub fn new(base: &Url, database: &str) -> Result<Self> {
        Self::with_timeout(base, database, Duration::from_secs(10))
    }

    pub fn with_timeout(base: &Url, database: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Client {
            http,
            write_url: write_url(base, database)?,
        })
    }

    pub fn write_url(&self) -> &Url {
        &self.write_url
    }

    /// Sends `body` as-is. Any non-2xx status is an error; InfluxDB answers a good write with `204 No Content`.
    #[tracing::instrument(level = "debug", skip(body), fields(url = %self.write_url, bytes = body.len()))]
    pub async fn write(&self, body: String) -> Result<()> {
        let response = self
            .http
            .post(self.write_url.clone())
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(%status, "write accepted");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(Error::ServerError {
            status: status.as_u16(),
            message: server_message(&body),
        })
    }
}

fn write_url(base: &Url, database: &str) -> Result<Url> {
    // `join` would replace the last path segment unless the base ends in a slash
    let mut url = if base.path().ends_with('/') {
        base.join("write")?
    } else {
        let mut base = base.clone();
        base.set_path(&format!("{}/", base.path()));
        base.join("write")?
    };
    url.query_pairs_mut().clear().append_pair("db", database);
    Ok(url)
}

// {"error":"unable to parse 'ALL_SENSORS GEN_VOLT': missing field value"}
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

fn server_message(body: &str) -> Option<String> {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody { error }) => Some(error),
        Err(_) if body.trim().is_empty() => None,
        Err(_) => Some(body.trim().to_owned()),
    }
}
