use anyhow::{Context, Result, bail};
use serde_json::Value;
use tracing::{debug, info};

use crate::http::HttpClient;

/// Fetch the in-play diary document from `url`.
///
/// Uses the same header set and retry policy as the session token fetch.
/// A non-success status after retries is an error.
pub async fn fetch_inplay_diary(http: &HttpClient, url: &str) -> Result<Value> {
    info!("Requesting in-play diary from {url}");
    let resp = http.get(url).await?;
    let status = resp.status();
    if !status.is_success() {
        bail!("in-play diary request returned {status}");
    }

    let body = resp
        .text()
        .await
        .context("failed to read in-play diary body")?;
    debug!("In-play diary body: {} bytes", body.len());
    let document: Value =
        serde_json::from_str(&body).context("in-play diary body is not valid JSON")?;
    Ok(document)
}
