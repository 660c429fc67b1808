//! HTTP client used by the CLI subcommands to drive a running node.

use anyhow::{bail, Context, Result};
use peerfs_core::search::SearchResult;
use peerfs_core::FileMeta;
use serde::de::DeserializeOwned;

use crate::control::DownloadRequest;

pub struct ApiClient {
    http: reqwest::Client,
    base: String,
}

impl ApiClient {
    /// Client for the node listening on `127.0.0.1:<port>`.
    pub fn new(port: u16) -> Self {
        Self::with_base(format!("http://127.0.0.1:{port}"))
    }

    pub fn with_base(base: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.into(),
        }
    }

    async fn read<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let body: serde_json::Value = resp.json().await.unwrap_or_default();
            let message = body["error"].as_str().unwrap_or("no details");
            bail!("node answered {status}: {message}");
        }
        resp.json().await.context("unexpected response from node")
    }

    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let resp = self
            .http
            .get(format!("{}/search", self.base))
            .query(&[("q", query)])
            .send()
            .await
            .context("could not reach the peerfs node; is `peerfs start` running?")?;
        Self::read(resp).await
    }

    pub async fn file_meta(&self, hash: &str) -> Result<FileMeta> {
        let resp = self
            .http
            .get(format!("{}/fileMeta", self.base))
            .query(&[("hash", hash)])
            .send()
            .await
            .context("could not reach the peerfs node; is `peerfs start` running?")?;
        Self::read(resp).await
    }

    async fn post(
        &self,
        route: &str,
        meta: FileMeta,
        providers: Vec<String>,
        whole: bool,
    ) -> Result<serde_json::Value> {
        let resp = self
            .http
            .post(format!("{}{route}", self.base))
            .json(&DownloadRequest {
                meta,
                providers,
                whole,
            })
            .send()
            .await
            .context("could not reach the peerfs node; is `peerfs start` running?")?;
        Self::read(resp).await
    }

    pub async fn download(&self, meta: FileMeta, providers: Vec<String>, whole: bool) -> Result<serde_json::Value> {
        self.post("/download", meta, providers, whole).await
    }

    pub async fn benchmark(&self, meta: FileMeta, providers: Vec<String>, whole: bool) -> Result<serde_json::Value> {
        self.post("/benchmark/transfer", meta, providers, whole).await
    }
}
