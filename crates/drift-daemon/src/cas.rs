//! Client for the content store's `/api/v0` HTTP API.
//!
//! Every endpoint is `POST` with query parameters; uploads are
//! `multipart/form-data`. Responses are JSON, except `repo/gc` and
//! `pubsub/sub` which stream one JSON object per line.

use bytes::Bytes;
use drift_core::multibase;
use futures_util::{StreamExt, TryStreamExt};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio_util::io::StreamReader;
use tracing::{info, warn};

const IDENTITY_TIMEOUT: Duration = Duration::from_secs(5);
const ADD_TIMEOUT: Duration = Duration::from_secs(30);
const PIN_TIMEOUT: Duration = Duration::from_secs(30);
const STAT_TIMEOUT: Duration = Duration::from_secs(10);
const GC_TIMEOUT: Duration = Duration::from_secs(120);
const KEY_LIST_TIMEOUT: Duration = Duration::from_secs(5);
const KEY_GEN_TIMEOUT: Duration = Duration::from_secs(10);
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(30);
const PUBSUB_PUB_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum CasError {
    #[error("store unreachable: {0}")]
    Network(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
    #[error("store returned HTTP {status}: {body}")]
    Remote { status: u16, body: String },
    #[error("undecodable store response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<reqwest::Error> for CasError {
    fn from(e: reqwest::Error) -> Self {
        CasError::Network(Box::new(e))
    }
}

pub type CasResult<T> = Result<T, CasError>;

// ── response documents ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct NodeIdentity {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "AgentVersion", default)]
    pub agent_version: String,
}

impl NodeIdentity {
    /// Shortened id for log lines.
    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(16)]
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RepoStat {
    #[serde(rename = "RepoSize")]
    pub repo_size: u64,
    #[serde(rename = "StorageMax")]
    pub storage_max: u64,
    #[serde(rename = "NumObjects")]
    pub num_objects: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeyInfo {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Id")]
    pub id: String,
}

#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

#[derive(Debug, Deserialize)]
struct PinLsResponse {
    #[serde(rename = "Keys", default)]
    keys: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct KeyListResponse {
    #[serde(rename = "Keys", default)]
    keys: Vec<KeyInfo>,
}

#[derive(Debug, Deserialize)]
struct KeyGenResponse {
    #[serde(rename = "Id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct PublishResponse {
    #[serde(rename = "Name")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct GcLine {
    #[serde(rename = "Error", default)]
    error: Option<String>,
}

// ── client ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CasClient {
    http: reqwest::Client,
    base: String,
}

impl CasClient {
    pub fn new(api_base: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: api_base.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, action: &str) -> String {
        format!("{}/api/v0/{}", self.base, action)
    }

    /// Non-200 becomes `Remote`, transport failure becomes `Network`;
    /// success hands back the body for decoding.
    async fn into_body(response: reqwest::Response) -> CasResult<String> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(CasError::Remote {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    pub async fn identity(&self) -> CasResult<NodeIdentity> {
        let response = self
            .http
            .post(self.url("id"))
            .timeout(IDENTITY_TIMEOUT)
            .send()
            .await?;
        let body = Self::into_body(response).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Poll `identity` until the store answers. Used at boot by daemons that
    /// must outlive a store restart rather than die on it.
    pub async fn wait_ready(&self, probe_interval: Duration) -> NodeIdentity {
        loop {
            match self.identity().await {
                Ok(identity) => {
                    info!("connected to store node {}...", identity.short_id());
                    return identity;
                }
                Err(e) => {
                    warn!("store not ready: {e}");
                    tokio::time::sleep(probe_interval).await;
                }
            }
        }
    }

    /// Upload one blob, returning its CID.
    pub async fn add(&self, data: Vec<u8>, filename: &str, pin: bool) -> CasResult<String> {
        let part = reqwest::multipart::Part::bytes(data).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        let response = self
            .http
            .post(self.url("add"))
            .query(&[("pin", if pin { "true" } else { "false" }), ("quiet", "true")])
            .multipart(form)
            .timeout(ADD_TIMEOUT)
            .send()
            .await?;
        let body = Self::into_body(response).await?;
        let parsed: AddResponse = serde_json::from_str(&body)?;
        Ok(parsed.hash)
    }

    pub async fn pin_ls(&self) -> CasResult<HashSet<String>> {
        let response = self
            .http
            .post(self.url("pin/ls"))
            .query(&[("type", "recursive")])
            .timeout(PIN_TIMEOUT)
            .send()
            .await?;
        let body = Self::into_body(response).await?;
        let parsed: PinLsResponse = serde_json::from_str(&body)?;
        Ok(parsed.keys.into_keys().collect())
    }

    pub async fn unpin(&self, cid: &str) -> CasResult<()> {
        let response = self
            .http
            .post(self.url("pin/rm"))
            .query(&[("arg", cid)])
            .timeout(PIN_TIMEOUT)
            .send()
            .await?;
        Self::into_body(response).await?;
        Ok(())
    }

    pub async fn repo_stat(&self) -> CasResult<RepoStat> {
        let response = self
            .http
            .post(self.url("repo/stat"))
            .timeout(STAT_TIMEOUT)
            .send()
            .await?;
        let body = Self::into_body(response).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Run garbage collection. Per-object errors in the event stream are
    /// logged as warnings, not failures.
    pub async fn repo_gc(&self) -> CasResult<()> {
        let response = self
            .http
            .post(self.url("repo/gc"))
            .timeout(GC_TIMEOUT)
            .send()
            .await?;
        let body = Self::into_body(response).await?;
        for line in body.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<GcLine>(line) {
                Ok(GcLine { error: Some(error) }) => warn!("gc error: {error}"),
                Ok(_) => {}
                Err(_) => {}
            }
        }
        Ok(())
    }

    pub async fn key_list(&self) -> CasResult<Vec<KeyInfo>> {
        let response = self
            .http
            .post(self.url("key/list"))
            .timeout(KEY_LIST_TIMEOUT)
            .send()
            .await?;
        let body = Self::into_body(response).await?;
        let parsed: KeyListResponse = serde_json::from_str(&body)?;
        Ok(parsed.keys)
    }

    pub async fn key_gen(&self, name: &str) -> CasResult<String> {
        let response = self
            .http
            .post(self.url("key/gen"))
            .query(&[("arg", name), ("type", "ed25519")])
            .timeout(KEY_GEN_TIMEOUT)
            .send()
            .await?;
        let body = Self::into_body(response).await?;
        let parsed: KeyGenResponse = serde_json::from_str(&body)?;
        Ok(parsed.id)
    }

    /// Bind `key`'s mutable name to `cid`; returns the published name.
    pub async fn name_publish(
        &self,
        key: &str,
        cid: &str,
        lifetime: &str,
        ttl: &str,
        allow_offline: bool,
    ) -> CasResult<String> {
        let mut query = vec![
            ("arg", cid),
            ("key", key),
            ("lifetime", lifetime),
            ("ttl", ttl),
            ("resolve", "true"),
        ];
        if allow_offline {
            query.push(("allow-offline", "true"));
        }
        let response = self
            .http
            .post(self.url("name/publish"))
            .query(&query)
            .timeout(PUBLISH_TIMEOUT)
            .send()
            .await?;
        let body = Self::into_body(response).await?;
        let parsed: PublishResponse = serde_json::from_str(&body)?;
        Ok(parsed.name)
    }

    /// Publish raw bytes on a topic. The topic goes over the wire multibase
    /// encoded; the payload is the `data` form field.
    pub async fn pubsub_pub(&self, topic: &str, payload: Vec<u8>) -> CasResult<()> {
        let form = reqwest::multipart::Form::new()
            .part("data", reqwest::multipart::Part::bytes(payload));
        let response = self
            .http
            .post(self.url("pubsub/pub"))
            .query(&[("arg", multibase::encode(topic))])
            .multipart(form)
            .timeout(PUBSUB_PUB_TIMEOUT)
            .send()
            .await?;
        Self::into_body(response).await?;
        Ok(())
    }

    /// Open a long-lived subscription. The returned stream has no read
    /// timeout; it ends when the store drops the connection.
    pub async fn subscribe(&self, topic: &str) -> CasResult<Subscription> {
        let response = self
            .http
            .post(self.url("pubsub/sub"))
            .query(&[("arg", multibase::encode(topic))])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CasError::Remote {
                status: status.as_u16(),
                body,
            });
        }
        let stream = response
            .bytes_stream()
            .map_err(std::io::Error::other)
            .boxed();
        let lines = BufReader::new(StreamReader::new(stream)).lines();
        Ok(Subscription { lines })
    }
}

/// One line per message, raw JSON envelope text.
pub struct Subscription {
    lines: Lines<BufReader<StreamReader<futures_util::stream::BoxStream<'static, std::io::Result<Bytes>>, Bytes>>>,
}

impl Subscription {
    /// `Ok(None)` when the subscription ended.
    pub async fn next_line(&mut self) -> CasResult<Option<String>> {
        self.lines
            .next_line()
            .await
            .map_err(|e| CasError::Network(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_identity() {
        let body = r#"{"ID":"12D3KooWabc","AgentVersion":"kubo/0.28.0"}"#;
        let identity: NodeIdentity = serde_json::from_str(body).unwrap();
        assert_eq!(identity.id, "12D3KooWabc");
        assert_eq!(identity.short_id(), "12D3KooWabc");
    }

    #[test]
    fn decodes_pin_ls_keys() {
        let body = r#"{"Keys":{"QmA":{"Type":"recursive"},"QmB":{"Type":"recursive"}}}"#;
        let parsed: PinLsResponse = serde_json::from_str(body).unwrap();
        let cids: HashSet<String> = parsed.keys.into_keys().collect();
        assert!(cids.contains("QmA") && cids.contains("QmB"));
    }

    #[test]
    fn decodes_repo_stat() {
        let body = r#"{"RepoSize":1048576,"StorageMax":10737418240,"NumObjects":321}"#;
        let stat: RepoStat = serde_json::from_str(body).unwrap();
        assert_eq!(stat.repo_size, 1_048_576);
        assert_eq!(stat.num_objects, 321);
    }

    #[test]
    fn decodes_key_list_and_publish() {
        let body = r#"{"Keys":[{"Name":"node1-stream","Id":"k51qzi"}]}"#;
        let parsed: KeyListResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.keys[0].name, "node1-stream");

        let body = r#"{"Name":"k51qzi","Value":"/ipfs/QmA"}"#;
        let parsed: PublishResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.name, "k51qzi");
    }

    #[test]
    fn remote_errors_carry_status_and_body() {
        let err = CasError::Remote {
            status: 500,
            body: "routing: not found".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("500") && text.contains("routing"));
    }
}
