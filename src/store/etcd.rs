//! etcd v2 keys API client
//!
//! Speaks the HTTP/JSON v2 protocol with `reqwest`. Endpoints are tried in
//! order; a transport failure on one endpoint falls through to the next,
//! while an answer from any endpoint (including an etcd error) is final.

use async_trait::async_trait;
use reqwest::{Client, Method, Response};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use super::{CoordinationStore, Node, StoreError, StoreResult};

const ERROR_KEY_NOT_FOUND: u32 = 100;
const ERROR_TEST_FAILED: u32 = 101;
const ERROR_NODE_EXIST: u32 = 105;

#[derive(Debug, Deserialize)]
struct EtcdResponse {
    #[allow(dead_code)]
    action: String,
    node: Option<EtcdNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EtcdNode {
    key: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    modified_index: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EtcdErrorBody {
    error_code: u32,
    message: String,
    #[serde(default)]
    cause: Option<String>,
}

/// [`CoordinationStore`] backed by an etcd v2 cluster
#[derive(Debug, Clone)]
pub struct EtcdV2Store {
    client: Client,
    endpoints: Vec<Url>,
}

impl EtcdV2Store {
    /// Build a client without contacting the cluster
    pub fn new(endpoints: &[String], timeout: Duration) -> StoreResult<Self> {
        if endpoints.is_empty() {
            return Err(StoreError::InvalidEndpoint("no endpoints configured".to_string()));
        }

        let endpoints = endpoints
            .iter()
            .map(|raw| {
                let normalized = if raw.ends_with('/') {
                    raw.clone()
                } else {
                    format!("{raw}/")
                };
                Url::parse(&normalized)
                    .map_err(|e| StoreError::InvalidEndpoint(format!("{raw}: {e}")))
            })
            .collect::<StoreResult<Vec<_>>>()?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Unavailable(format!("failed to build http client: {e}")))?;

        Ok(Self { client, endpoints })
    }

    /// Build a client and verify that at least one endpoint answers
    pub async fn connect(endpoints: &[String], timeout: Duration) -> StoreResult<Self> {
        let store = Self::new(endpoints, timeout)?;
        let version = store.version().await?;
        tracing::info!(endpoints = ?endpoints, version = %version, "Connected to etcd");
        Ok(store)
    }

    /// Raw `/version` response of the first reachable endpoint
    pub async fn version(&self) -> StoreResult<String> {
        let mut last_error = StoreError::Unavailable("no endpoints configured".to_string());

        for endpoint in &self.endpoints {
            let url = endpoint
                .join("version")
                .map_err(|e| StoreError::InvalidEndpoint(e.to_string()))?;
            match self.client.get(url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    return resp.text().await.map_err(|e| StoreError::Decode(e.to_string()));
                }
                Ok(resp) => {
                    last_error = StoreError::Http {
                        status: resp.status().as_u16(),
                        message: "version probe failed".to_string(),
                    };
                }
                Err(e) => {
                    tracing::debug!(endpoint = %endpoint, error = %e, "etcd endpoint unreachable");
                    last_error = transport_error(e);
                }
            }
        }

        Err(last_error)
    }

    /// Each key segment is percent-encoded, so `?`, `#` and `%` stay in the path
    fn key_url(endpoint: &Url, key: &str) -> StoreResult<Url> {
        let mut url = endpoint.clone();
        url.path_segments_mut()
            .map_err(|()| StoreError::InvalidEndpoint(format!("{endpoint}: cannot be a base")))?
            .pop_if_empty()
            .extend(["v2", "keys"])
            .extend(key.split('/').filter(|segment| !segment.is_empty()));
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        key: &str,
        query: &[(&str, String)],
        form: &[(&str, String)],
    ) -> StoreResult<EtcdResponse> {
        let mut last_error = StoreError::Unavailable("no endpoints configured".to_string());

        for endpoint in &self.endpoints {
            let url = Self::key_url(endpoint, key)?;
            let mut request = self.client.request(method.clone(), url).query(query);
            if !form.is_empty() {
                request = request.form(form);
            }

            match request.send().await {
                Ok(resp) => return decode(key, resp).await,
                Err(e) => {
                    tracing::debug!(endpoint = %endpoint, key = %key, error = %e, "etcd request failed, trying next endpoint");
                    last_error = transport_error(e);
                }
            }
        }

        Err(last_error)
    }
}

fn transport_error(e: reqwest::Error) -> StoreError {
    if e.is_timeout() {
        StoreError::Timeout
    } else {
        StoreError::Unavailable(e.to_string())
    }
}

async fn decode(key: &str, resp: Response) -> StoreResult<EtcdResponse> {
    let status = resp.status();
    let body = resp.text().await.map_err(|e| StoreError::Decode(e.to_string()))?;

    if status.is_success() {
        return serde_json::from_str(&body).map_err(|e| StoreError::Decode(e.to_string()));
    }

    let Ok(err) = serde_json::from_str::<EtcdErrorBody>(&body) else {
        return Err(StoreError::Http {
            status: status.as_u16(),
            message: body,
        });
    };

    Err(match err.error_code {
        ERROR_KEY_NOT_FOUND => StoreError::NotFound {
            key: key.to_string(),
        },
        ERROR_NODE_EXIST => StoreError::NodeExists {
            key: key.to_string(),
        },
        ERROR_TEST_FAILED => StoreError::CompareFailed {
            key: key.to_string(),
            reason: err.cause.unwrap_or(err.message),
        },
        _ => StoreError::Http {
            status: status.as_u16(),
            message: err.message,
        },
    })
}

fn into_node(key: &str, resp: EtcdResponse) -> StoreResult<Node> {
    let node = resp
        .node
        .ok_or_else(|| StoreError::Decode(format!("response for {key} has no node")))?;
    Ok(Node {
        key: node.key,
        value: node.value.unwrap_or_default(),
        modified_index: node.modified_index,
    })
}

fn ttl_param(ttl: Option<Duration>) -> Option<(&'static str, String)> {
    ttl.map(|t| ("ttl", t.as_secs().max(1).to_string()))
}

#[async_trait]
impl CoordinationStore for EtcdV2Store {
    async fn get(&self, key: &str) -> StoreResult<Option<Node>> {
        match self.send(Method::GET, key, &[], &[]).await {
            Ok(resp) => into_node(key, resp).map(Some),
            Err(StoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<Node> {
        let mut form = vec![("value", value.to_string())];
        form.extend(ttl_param(ttl));
        let resp = self.send(Method::PUT, key, &[], &form).await?;
        into_node(key, resp)
    }

    async fn refresh(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        let mut form = vec![
            ("refresh", "true".to_string()),
            ("prevExist", "true".to_string()),
        ];
        form.extend(ttl_param(Some(ttl)));
        self.send(Method::PUT, key, &[], &form).await?;
        Ok(())
    }

    async fn create(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<Node> {
        let mut form = vec![
            ("value", value.to_string()),
            ("prevExist", "false".to_string()),
        ];
        form.extend(ttl_param(ttl));
        let resp = self.send(Method::PUT, key, &[], &form).await?;
        into_node(key, resp)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        value: &str,
        prev_index: Option<u64>,
        ttl: Option<Duration>,
    ) -> StoreResult<Node> {
        let mut form = vec![("value", value.to_string())];
        match prev_index {
            Some(index) => form.push(("prevIndex", index.to_string())),
            None => form.push(("prevExist", "false".to_string())),
        }
        form.extend(ttl_param(ttl));
        let resp = self.send(Method::PUT, key, &[], &form).await?;
        into_node(key, resp)
    }

    async fn delete(&self, key: &str, recursive: bool) -> StoreResult<()> {
        let query = if recursive {
            vec![("recursive", "true".to_string())]
        } else {
            Vec::new()
        };
        self.send(Method::DELETE, key, &query, &[]).await?;
        Ok(())
    }

    async fn compare_and_delete(&self, key: &str, prev_index: u64) -> StoreResult<()> {
        let query = [("prevIndex", prev_index.to_string())];
        self.send(Method::DELETE, key, &query, &[]).await?;
        Ok(())
    }
}
