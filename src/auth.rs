use anyhow::{Context, Result, anyhow, bail};
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::rest_types::TokenResponse;

const LOGIN_BASE_URL: &str = "https://login.microsoftonline.com/";
pub const GRAPH_SCOPE: &str = "offline_access Files.ReadWrite openid profile User.Read";

/// Delegated credentials of the account that owns the submission drive.
#[derive(Clone)]
pub struct Credentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

pub fn token_url(tenant_id: &str) -> Result<Url> {
    let route = format!("{}/oauth2/v2.0/token", urlencoding::encode(tenant_id));
    Url::parse(LOGIN_BASE_URL)?
        .join(&route)
        .context("Failed to construct token URL")
}

pub async fn exchange_refresh_token(client: &Client, credentials: &Credentials) -> Result<String> {
    let url = token_url(&credentials.tenant_id)?;
    let form = [
        ("client_id", credentials.client_id.as_str()),
        ("client_secret", credentials.client_secret.as_str()),
        ("refresh_token", credentials.refresh_token.as_str()),
        ("grant_type", "refresh_token"),
        ("scope", GRAPH_SCOPE),
    ];

    debug!(tenant = %credentials.tenant_id, "exchanging refresh token");
    let response = client.post(url).form(&form).send().await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("Token exchange failed: {} - {}", status, body);
    }

    let token: TokenResponse = response.json().await?;
    token
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| anyhow!("No access_token in token response"))
}
