//! Azure Blob Storage client
//!
//! Talks to the Blob service REST API directly over `reqwest`. Supports the
//! two connection-string flavours in use on build agents: Shared Key
//! (`AccountName` + `AccountKey`) and SAS (`SharedAccessSignature`).

use std::sync::OnceLock;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::stream::{self, StreamExt};
use hmac::{Hmac, Mac};
use regex::Regex;
use reqwest::{Method, Response, StatusCode, Url};
use sha2::Sha256;
use tracing::{debug, info};

use crate::error::BlobError;
use crate::store::{BlobDownload, BlobItem, BlobStore};
use crate::Result;

/// REST API version sent with every request.
const API_VERSION: &str = "2021-08-06";

type HmacSha256 = Hmac<Sha256>;

/// How requests are authorized.
#[derive(Clone, PartialEq, Eq)]
pub enum BlobCredential {
    /// Base64 account key used to sign each request.
    SharedKey { account: String, key: String },
    /// Pre-signed query string appended to every URL.
    Sas { token: String },
}

impl std::fmt::Debug for BlobCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlobCredential::SharedKey { account, .. } => f
                .debug_struct("SharedKey")
                .field("account", account)
                .field("key", &"<redacted>")
                .finish(),
            BlobCredential::Sas { .. } => f
                .debug_struct("Sas")
                .field("token", &"<redacted>")
                .finish(),
        }
    }
}

/// Blob service endpoint and credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobConfig {
    /// Service endpoint without trailing slash, e.g. `https://acct.blob.core.windows.net`
    pub endpoint: String,
    pub credential: BlobCredential,
}

impl BlobConfig {
    /// Parse a `Key=Value;Key=Value` storage connection string.
    pub fn from_connection_string(raw: &str) -> Result<Self> {
        let mut protocol = "https".to_string();
        let mut account = None;
        let mut key = None;
        let mut suffix = "core.windows.net".to_string();
        let mut blob_endpoint = None;
        let mut sas = None;

        for part in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, value) = part.split_once('=').ok_or_else(|| {
                BlobError::InvalidConnectionString(format!("segment without '=': {part}"))
            })?;
            match name {
                "DefaultEndpointsProtocol" => protocol = value.to_string(),
                "AccountName" => account = Some(value.to_string()),
                "AccountKey" => key = Some(value.to_string()),
                "EndpointSuffix" => suffix = value.to_string(),
                "BlobEndpoint" => blob_endpoint = Some(value.trim_end_matches('/').to_string()),
                "SharedAccessSignature" => sas = Some(value.trim_start_matches('?').to_string()),
                _ => debug!(setting = name, "Ignoring connection string setting"),
            }
        }

        let endpoint = match (blob_endpoint, &account) {
            (Some(endpoint), _) => endpoint,
            (None, Some(account)) => format!("{protocol}://{account}.blob.{suffix}"),
            (None, None) => {
                return Err(BlobError::InvalidConnectionString(
                    "neither BlobEndpoint nor AccountName present".to_string(),
                ))
            }
        };

        let credential = match (sas, account, key) {
            (Some(token), _, _) => BlobCredential::Sas { token },
            (None, Some(account), Some(key)) => BlobCredential::SharedKey { account, key },
            _ => {
                return Err(BlobError::InvalidConnectionString(
                    "expected AccountKey or SharedAccessSignature".to_string(),
                ))
            }
        };

        Ok(BlobConfig {
            endpoint,
            credential,
        })
    }
}

/// Blob store backed by the Azure Blob REST API
pub struct AzureBlobStore {
    config: BlobConfig,
    http_client: reqwest::Client,
}

impl AzureBlobStore {
    /// Create a new client
    pub fn new(config: BlobConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("albuild/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(AzureBlobStore {
            config,
            http_client,
        })
    }

    fn resource_url(&self, container: &str, key: Option<&str>) -> Result<Url> {
        let mut raw = format!("{}/{}", self.config.endpoint, container);
        if let Some(key) = key {
            raw.push('/');
            raw.push_str(&encode_key(key));
        }
        Url::parse(&raw).map_err(|e| BlobError::InvalidConnectionString(e.to_string()))
    }

    /// Build, authorize and send one request.
    async fn send(
        &self,
        method: Method,
        container: &str,
        key: Option<&str>,
        query: &[(&str, String)],
        body: Option<Vec<u8>>,
    ) -> Result<Response> {
        let mut url = self.resource_url(container, key)?;
        if let BlobCredential::Sas { token } = &self.config.credential {
            url.set_query(Some(token.as_str()));
        }
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in query {
                pairs.append_pair(name, value);
            }
        }

        let content_length = body.as_ref().map(|b| b.len() as u64).unwrap_or(0);
        let content_type = if body.is_some() {
            "application/octet-stream"
        } else {
            ""
        };

        let mut ms_headers = vec![
            ("x-ms-date", http_date(chrono::Utc::now())),
            ("x-ms-version", API_VERSION.to_string()),
        ];
        if body.is_some() {
            ms_headers.push(("x-ms-blob-type", "BlockBlob".to_string()));
        }

        let mut request = self.http_client.request(method.clone(), url.clone());
        for (name, value) in &ms_headers {
            request = request.header(*name, value);
        }

        if let BlobCredential::SharedKey { account, key } = &self.config.credential {
            let string_to_sign = string_to_sign(
                method.as_str(),
                account,
                url.path(),
                content_length,
                content_type,
                &ms_headers,
                query,
            );
            let signature = sign(key, &string_to_sign)?;
            request = request.header("Authorization", format!("SharedKey {account}:{signature}"));
        }

        if let Some(body) = body {
            request = request
                .header("Content-Type", content_type)
                .body(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(BlobError::NotFound {
                container: container.to_string(),
                key: key.unwrap_or_default().to_string(),
            });
        }
        if !status.is_success() {
            return Err(BlobError::Status {
                status: status.as_u16(),
                key: key.unwrap_or(container).to_string(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl BlobStore for AzureBlobStore {
    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<BlobItem>> {
        let mut items = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut query = vec![
                ("comp", "list".to_string()),
                ("prefix", prefix.to_string()),
                ("restype", "container".to_string()),
            ];
            if let Some(m) = &marker {
                query.push(("marker", m.clone()));
            }

            let body = self
                .send(Method::GET, container, None, &query, None)
                .await?
                .text()
                .await?;
            let page = parse_list_page(&body);
            debug!(container, prefix, count = page.items.len(), "Listed blob page");
            items.extend(page.items);

            match page.next_marker {
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        Ok(items)
    }

    async fn open(&self, container: &str, key: &str) -> Result<BlobDownload> {
        let response = self.send(Method::GET, container, Some(key), &[], None).await?;
        let size = response.content_length();
        let key_owned = key.to_string();

        let chunks = stream::unfold(Some(response), move |state| {
            let key = key_owned.clone();
            async move {
                let mut response = state?;
                match response.chunk().await {
                    Ok(Some(bytes)) => Some((Ok(bytes.to_vec()), Some(response))),
                    Ok(None) => None,
                    Err(e) => Some((
                        Err(BlobError::Transfer {
                            key,
                            reason: e.to_string(),
                        }),
                        None,
                    )),
                }
            }
        })
        .boxed();

        Ok(BlobDownload { size, chunks })
    }

    async fn upload(&self, container: &str, key: &str, data: Vec<u8>) -> Result<()> {
        let bytes = data.len();
        self.send(Method::PUT, container, Some(key), &[], Some(data))
            .await?;
        info!(container, key, bytes, "Uploaded blob");
        Ok(())
    }
}

/// Percent-encode every path segment of a blob key, keeping `/`.
fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// RFC 1123 date as required by `x-ms-date`.
fn http_date(now: chrono::DateTime<chrono::Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Shared Key string-to-sign for the Blob service.
fn string_to_sign(
    verb: &str,
    account: &str,
    path: &str,
    content_length: u64,
    content_type: &str,
    ms_headers: &[(&str, String)],
    query: &[(&str, String)],
) -> String {
    let length = if content_length == 0 {
        String::new()
    } else {
        content_length.to_string()
    };

    let mut headers: Vec<(String, &str)> = ms_headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.as_str()))
        .collect();
    headers.sort();
    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{name}:{}\n", value.trim()))
        .collect();

    let mut params: Vec<(String, &str)> = query
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.as_str()))
        .collect();
    params.sort();
    let mut canonical_resource = format!("/{account}{path}");
    for (name, value) in params {
        canonical_resource.push_str(&format!("\n{name}:{value}"));
    }

    format!(
        "{verb}\n\n\n{length}\n\n{content_type}\n\n\n\n\n\n\n{canonical_headers}{canonical_resource}"
    )
}

/// HMAC-SHA256 of `string_to_sign` keyed with the decoded account key.
fn sign(account_key: &str, string_to_sign: &str) -> Result<String> {
    let key = STANDARD
        .decode(account_key)
        .map_err(|e| BlobError::InvalidConnectionString(format!("AccountKey: {e}")))?;
    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|e| BlobError::InvalidConnectionString(format!("AccountKey: {e}")))?;
    mac.update(string_to_sign.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

struct ListPage {
    items: Vec<BlobItem>,
    next_marker: Option<String>,
}

fn parse_list_page(xml: &str) -> ListPage {
    static BLOB: OnceLock<Regex> = OnceLock::new();
    static NAME: OnceLock<Regex> = OnceLock::new();
    static LENGTH: OnceLock<Regex> = OnceLock::new();
    static MARKER: OnceLock<Regex> = OnceLock::new();

    let blob = BLOB.get_or_init(|| Regex::new(r"(?s)<Blob>(.*?)</Blob>").unwrap());
    let name = NAME.get_or_init(|| Regex::new(r"(?s)<Name>(.*?)</Name>").unwrap());
    let length =
        LENGTH.get_or_init(|| Regex::new(r"<Content-Length>(\d+)</Content-Length>").unwrap());
    let marker = MARKER.get_or_init(|| Regex::new(r"(?s)<NextMarker>(.*?)</NextMarker>").unwrap());

    let items = blob
        .captures_iter(xml)
        .filter_map(|blob_caps| {
            let body = blob_caps.get(1)?.as_str();
            let blob_name = name.captures(body)?.get(1)?.as_str();
            let size = length
                .captures(body)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse().ok());
            Some(BlobItem {
                name: unescape_xml(blob_name),
                size,
            })
        })
        .collect();

    let next_marker = marker
        .captures(xml)
        .and_then(|c| c.get(1))
        .map(|m| unescape_xml(m.as_str()))
        .filter(|m| !m.is_empty());

    ListPage { items, next_marker }
}

/// Decodes the predefined entities and numeric character references in one
/// pass. Unknown or out-of-range references are left as written.
fn unescape_xml(s: &str) -> String {
    static ENTITY: OnceLock<Regex> = OnceLock::new();
    let entity = ENTITY
        .get_or_init(|| Regex::new(r"&(#[xX][0-9A-Fa-f]+|#[0-9]+|lt|gt|quot|apos|amp);").unwrap());

    entity
        .replace_all(s, |caps: &regex::Captures<'_>| {
            let body = &caps[1];
            let decoded = match body {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "amp" => Some('&'),
                _ => {
                    let code = match body.strip_prefix("#x").or_else(|| body.strip_prefix("#X")) {
                        Some(hex) => u32::from_str_radix(hex, 16).ok(),
                        None => body[1..].parse::<u32>().ok(),
                    };
                    code.and_then(char::from_u32)
                }
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}
