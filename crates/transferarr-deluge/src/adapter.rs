//! `DownloadClient` implementation over the Deluge Web JSON-RPC interface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use transferarr_config::DownloadClientConfig;
use transferarr_core::{
    AddMetainfo, ClientError, ClientResult, DownloadClient, InfoHash, TorrentSnapshot,
};

use crate::convert::snapshot_from_row;
use crate::rpc::{RpcResponse, STATUS_FIELDS, TorrentStatusRow};

/// One Deluge instance reached through its web interface.
///
/// The driver and transfer workers call one instance concurrently; the login
/// guard serialises session re-establishment while plain calls run in
/// parallel on the shared HTTP client.
pub struct DelugeEndpoint {
    name: String,
    url: String,
    password: String,
    http: reqwest::Client,
    request_id: AtomicU64,
    login_guard: Mutex<bool>,
}

impl DelugeEndpoint {
    /// Build an endpoint from its configuration entry. The session is
    /// established lazily by [`DownloadClient::ensure_connected`].
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(
        name: impl Into<String>,
        config: &DownloadClientConfig,
        timeout: Duration,
    ) -> ClientResult<Self> {
        let name = name.into();
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()
            .map_err(|err| ClientError::Connection {
                endpoint: name.clone(),
                detail: format!("http client construction failed: {err}"),
            })?;
        Ok(Self {
            url: format!("http://{}:{}/json", config.host, config.port),
            password: config.password.clone(),
            name,
            http,
            request_id: AtomicU64::new(1),
            login_guard: Mutex::new(false),
        })
    }

    fn request_error(&self, operation: &'static str, err: &reqwest::Error) -> ClientError {
        if err.is_timeout() {
            ClientError::Timeout {
                endpoint: self.name.clone(),
                operation,
            }
        } else {
            ClientError::Connection {
                endpoint: self.name.clone(),
                detail: err.to_string(),
            }
        }
    }

    async fn call(
        &self,
        operation: &'static str,
        method: &str,
        params: Value,
    ) -> ClientResult<RpcResponse> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({"method": method, "params": params, "id": id});
        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|err| self.request_error(operation, &err))?;
        if !response.status().is_success() {
            return Err(ClientError::Connection {
                endpoint: self.name.clone(),
                detail: format!("http status {}", response.status()),
            });
        }
        response
            .json::<RpcResponse>()
            .await
            .map_err(|err| ClientError::Protocol {
                endpoint: self.name.clone(),
                detail: err.to_string(),
            })
    }

    async fn login(&self) -> ClientResult<()> {
        let mut authenticated = self.login_guard.lock().await;
        let response = self
            .call("login", "auth.login", json!([self.password]))
            .await?;
        if let Some(error) = response.error {
            *authenticated = false;
            return Err(ClientError::Rejected {
                endpoint: self.name.clone(),
                operation: "login",
                detail: error.message,
            });
        }
        if response.result.as_bool() == Some(true) {
            if !*authenticated {
                info!(endpoint = %self.name, "deluge web session established");
            }
            *authenticated = true;
            Ok(())
        } else {
            *authenticated = false;
            Err(ClientError::Rejected {
                endpoint: self.name.clone(),
                operation: "login",
                detail: "password refused".to_string(),
            })
        }
    }

    /// Issue a call, re-authenticating once when the session cookie went
    /// stale between ticks.
    async fn call_authenticated(
        &self,
        operation: &'static str,
        method: &str,
        params: Value,
    ) -> ClientResult<RpcResponse> {
        {
            let authenticated = self.login_guard.lock().await;
            if !*authenticated {
                drop(authenticated);
                self.login().await?;
            }
        }

        let response = self.call(operation, method, params.clone()).await?;
        if response
            .error
            .as_ref()
            .is_some_and(crate::rpc::RpcError::is_stale_session)
        {
            debug!(endpoint = %self.name, operation, "session went stale; logging in again");
            self.login().await?;
            return self.call(operation, method, params).await;
        }
        Ok(response)
    }
}

#[async_trait]
impl DownloadClient for DelugeEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ensure_connected(&self) -> ClientResult<()> {
        self.login().await
    }

    async fn list(&self) -> ClientResult<HashMap<InfoHash, TorrentSnapshot>> {
        let response = self
            .call_authenticated(
                "list",
                "core.get_torrents_status",
                json!([{}, STATUS_FIELDS]),
            )
            .await?;
        if let Some(error) = response.error {
            return Err(ClientError::Rejected {
                endpoint: self.name.clone(),
                operation: "list",
                detail: error.message,
            });
        }

        let rows: HashMap<String, TorrentStatusRow> = serde_json::from_value(response.result)
            .map_err(|err| ClientError::Protocol {
                endpoint: self.name.clone(),
                detail: err.to_string(),
            })?;

        let mut torrents = HashMap::with_capacity(rows.len());
        for (raw_hash, row) in rows {
            match InfoHash::new(raw_hash) {
                Ok(hash) => {
                    torrents.insert(hash, snapshot_from_row(&self.name, row));
                }
                Err(err) => {
                    warn!(endpoint = %self.name, error = %err, "skipping torrent with invalid hash");
                }
            }
        }
        Ok(torrents)
    }

    async fn add_metainfo(&self, request: AddMetainfo) -> ClientResult<()> {
        let options = json!({
            "download_location": request.save_path,
            "add_paused": request.paused,
        });
        let params = json!([request.file_name, BASE64.encode(&request.bytes), options]);
        let response = self
            .call_authenticated("add_metainfo", "core.add_torrent_file", params)
            .await?;
        match response.error {
            None => Ok(()),
            Some(error) if error.is_already_added() => {
                debug!(endpoint = %self.name, "torrent already present; add is a no-op");
                Ok(())
            }
            Some(error) => Err(ClientError::Rejected {
                endpoint: self.name.clone(),
                operation: "add_metainfo",
                detail: error.message,
            }),
        }
    }

    async fn remove(&self, hash: &InfoHash, delete_data: bool) -> ClientResult<()> {
        let response = self
            .call_authenticated(
                "remove",
                "core.remove_torrent",
                json!([hash.as_str(), delete_data]),
            )
            .await?;
        match response.error {
            None => Ok(()),
            Some(error) if error.is_not_present() => {
                debug!(endpoint = %self.name, hash = %hash, "torrent already gone; remove is a no-op");
                Ok(())
            }
            Some(error) => Err(ClientError::Rejected {
                endpoint: self.name.clone(),
                operation: "remove",
                detail: error.message,
            }),
        }
    }
}
