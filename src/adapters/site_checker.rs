use crate::domain::ports::{SiteChecker, SiteResponse};
use crate::utils::error::{RemoteError, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use std::time::Duration;

pub const USER_AGENT: &str = "HarvesterBot/1.0";
const ROBOTS_TIMEOUT: Duration = Duration::from_secs(3);

/// Checks advertised sites over plain HTTP. Any HTTP answer counts as a
/// response; only transport failures become errors.
#[derive(Debug, Clone)]
pub struct HttpSiteChecker {
    client: Client,
}

impl HttpSiteChecker {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }

    async fn send(&self, method: Method, url: &str) -> std::result::Result<reqwest::Response, RemoteError> {
        self.client
            .request(method.clone(), url)
            .send()
            .await
            .map_err(|e| RemoteError::network(format!("{} {} failed: {}", method, url, e)))
    }
}

/// `true` when a `User-agent: *` group contains `Disallow: /`.
pub fn robots_disallows_root(robots: &str) -> bool {
    let mut in_wildcard_group = false;
    for line in robots.lines().map(str::trim) {
        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if field.trim().eq_ignore_ascii_case("user-agent") {
            in_wildcard_group = value == "*";
        } else if in_wildcard_group && field.trim().eq_ignore_ascii_case("disallow") && value == "/" {
            return true;
        }
    }
    false
}

#[async_trait]
impl SiteChecker for HttpSiteChecker {
    async fn robots_disallow_all(&self, base_url: &str) -> bool {
        let url = format!("{}/robots.txt", base_url.trim_end_matches('/'));
        let response = match self.client.get(&url).timeout(ROBOTS_TIMEOUT).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(_) => return false,
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "robots.txt unavailable");
                return false;
            }
        };
        match response.text().await {
            Ok(text) => robots_disallows_root(&text),
            Err(_) => false,
        }
    }

    async fn check(&self, url: &str) -> std::result::Result<SiteResponse, RemoteError> {
        let mut method = Method::HEAD;
        let mut response = self.send(Method::HEAD, url).await?;
        if response.status() == StatusCode::METHOD_NOT_ALLOWED {
            method = Method::GET;
            response = self.send(Method::GET, url).await?;
        }

        let server = response
            .headers()
            .get(reqwest::header::SERVER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(SiteResponse {
            status: response.status().as_u16(),
            server,
            method: method.to_string(),
        })
    }
}
