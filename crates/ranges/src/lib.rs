//! Cloudflare edge IP ranges, fetched from the published plaintext lists.

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument};

pub const CLOUDFLARE_IPS_V4: &str = "https://www.cloudflare.com/ips-v4";
pub const CLOUDFLARE_IPS_V6: &str = "https://www.cloudflare.com/ips-v6";

/// Where the two newline-delimited CIDR lists live.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Endpoints {
    #[serde(default = "default_v4")]
    pub v4: String,
    #[serde(default = "default_v6")]
    pub v6: String,
}

fn default_v4() -> String { CLOUDFLARE_IPS_V4.to_string() }
fn default_v6() -> String { CLOUDFLARE_IPS_V6.to_string() }

impl Default for Endpoints {
    fn default() -> Self {
        Self { v4: default_v4(), v6: default_v6() }
    }
}

#[derive(Error, Debug)]
pub enum RangeError {
    #[error("failed to fetch IP ranges from {url}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("IP range feed returned no entries")]
    Empty,
}

/// Ordered CIDR list, v4 entries first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpRanges(Vec<String>);

impl IpRanges {
    pub fn as_slice(&self) -> &[String] { &self.0 }
    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
    pub fn into_vec(self) -> Vec<String> { self.0 }
}

/// Join both lists and keep every non-blank line, in feed order.
pub fn parse_ranges(v4: &str, v6: &str) -> IpRanges {
    let joined = format!("{v4}\n{v6}");
    IpRanges(
        joined
            .split('\n')
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
    )
}

async fn fetch_list(client: &reqwest::Client, url: &str) -> Result<String, RangeError> {
    let fetch_err = |source| RangeError::Fetch { url: url.to_string(), source };
    let resp = client.get(url).send().await.map_err(fetch_err)?;
    let resp = resp.error_for_status().map_err(fetch_err)?;
    resp.text().await.map_err(fetch_err)
}

/// Fetch the current ranges. Any failure here must stop the whole run.
#[instrument(skip(client))]
pub async fn fetch_ranges(client: &reqwest::Client, endpoints: &Endpoints) -> Result<IpRanges, RangeError> {
    let v4 = fetch_list(client, &endpoints.v4).await?;
    let v6 = fetch_list(client, &endpoints.v6).await?;
    let ranges = parse_ranges(&v4, &v6);
    if ranges.is_empty() {
        return Err(RangeError::Empty);
    }
    debug!(count = ranges.len(), ranges = ?ranges.as_slice(), "fetched IP ranges");
    Ok(ranges)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_drops_blank_lines_and_keeps_order() {
        let ranges = parse_ranges("1.2.3.0/24\n4.5.6.0/24\n", "\n::1/128\n\n");
        assert_eq!(ranges.into_vec(), vec!["1.2.3.0/24", "4.5.6.0/24", "::1/128"]);
    }

    #[test]
    fn parse_handles_missing_trailing_newline() {
        let ranges = parse_ranges("1.2.3.0/24", "::1/128");
        assert_eq!(ranges.into_vec(), vec!["1.2.3.0/24", "::1/128"]);
    }

    #[test]
    fn parse_trims_crlf() {
        let ranges = parse_ranges("1.2.3.0/24\r\n", "::1/128\r\n");
        assert_eq!(ranges.into_vec(), vec!["1.2.3.0/24", "::1/128"]);
    }

    #[test]
    fn default_endpoints_point_at_cloudflare() {
        let e = Endpoints::default();
        assert_eq!(e.v4, CLOUDFLARE_IPS_V4);
        assert_eq!(e.v6, CLOUDFLARE_IPS_V6);
    }

    #[tokio::test]
    async fn fetch_concatenates_v4_then_v6() {
        let mut server = mockito::Server::new_async().await;
        let _v4 = server.mock("GET", "/ips-v4").with_body("1.2.3.0/24").create_async().await;
        let _v6 = server.mock("GET", "/ips-v6").with_body("::1/128").create_async().await;
        let endpoints = Endpoints {
            v4: format!("{}/ips-v4", server.url()),
            v6: format!("{}/ips-v6", server.url()),
        };
        let ranges = fetch_ranges(&reqwest::Client::new(), &endpoints).await.unwrap();
        assert_eq!(ranges.into_vec(), vec!["1.2.3.0/24", "::1/128"]);
    }

    #[tokio::test]
    async fn fetch_fails_on_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _v4 = server.mock("GET", "/ips-v4").with_status(503).create_async().await;
        let _v6 = server.mock("GET", "/ips-v6").with_body("::1/128").create_async().await;
        let endpoints = Endpoints {
            v4: format!("{}/ips-v4", server.url()),
            v6: format!("{}/ips-v6", server.url()),
        };
        let err = fetch_ranges(&reqwest::Client::new(), &endpoints).await.unwrap_err();
        assert!(matches!(err, RangeError::Fetch { ref url, .. } if url.ends_with("/ips-v4")));
        assert_eq!(err.to_string(), format!("failed to fetch IP ranges from {}", endpoints.v4));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[tokio::test]
    async fn fetch_rejects_empty_feed() {
        let mut server = mockito::Server::new_async().await;
        let _v4 = server.mock("GET", "/ips-v4").with_body("\n").create_async().await;
        let _v6 = server.mock("GET", "/ips-v6").with_body("").create_async().await;
        let endpoints = Endpoints {
            v4: format!("{}/ips-v4", server.url()),
            v6: format!("{}/ips-v6", server.url()),
        };
        let err = fetch_ranges(&reqwest::Client::new(), &endpoints).await.unwrap_err();
        assert!(matches!(err, RangeError::Empty));
    }
}
