//! Local HTTP control plane on 127.0.0.1: search, file metadata, download and benchmark.
//! One request per connection; the response closes the connection.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use peerfs_core::{DownloadError, FileMeta, Node, NodeError, PeerId};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::benchmark::{self, BenchmarkEntry};
use crate::transport::TcpHost;

const MAX_HEAD_LEN: usize = 16 * 1024;
const MAX_BODY_LEN: usize = 4 * 1024 * 1024;

/// Body of `POST /download` and `POST /benchmark/transfer`.
#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub meta: FileMeta,
    pub providers: Vec<String>,
    /// Fetch over the legacy whole-file protocol from the single listed provider.
    #[serde(default)]
    pub whole: bool,
}

pub struct ControlPlane {
    node: Arc<Node<TcpHost>>,
    download_dir: PathBuf,
    benchmark_log: PathBuf,
}

#[derive(Debug, PartialEq)]
struct Response {
    status: u16,
    body: String,
}

impl Response {
    fn json(status: u16, value: &impl Serialize) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self { status, body },
            Err(e) => Self::error(500, &e.to_string()),
        }
    }

    fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            body: json!({ "error": message }).to_string(),
        }
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            400 => "Bad Request",
            404 => "Not Found",
            405 => "Method Not Allowed",
            413 => "Payload Too Large",
            _ => "Internal Server Error",
        }
    }
}

impl ControlPlane {
    pub fn new(node: Arc<Node<TcpHost>>, download_dir: PathBuf) -> Self {
        Self {
            node,
            download_dir,
            benchmark_log: PathBuf::from(benchmark::DEFAULT_LOG_FILE),
        }
    }

    pub fn with_benchmark_log(mut self, path: PathBuf) -> Self {
        self.benchmark_log = path;
        self
    }

    async fn route(&self, method: &str, target: &str, body: &[u8]) -> Response {
        let Ok(url) = reqwest::Url::parse(&format!("http://localhost{target}")) else {
            return Response::error(400, "bad request target");
        };
        let param = |key: &str| {
            url.query_pairs()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.into_owned())
        };
        match (method, url.path()) {
            ("GET", "/search") => match param("q") {
                Some(q) => self.search(&q).await,
                None => Response::error(400, "missing query parameter q"),
            },
            ("GET", "/fileMeta") => match param("hash") {
                Some(hash) => match self.node.resolve_metadata(&hash) {
                    Ok(meta) => Response::json(200, &meta),
                    Err(e) => Response::error(404, &e.to_string()),
                },
                None => Response::error(400, "missing query parameter hash"),
            },
            ("POST", "/download") => self.download(body, false).await,
            ("POST", "/benchmark/transfer") => self.download(body, true).await,
            (_, "/search" | "/fileMeta" | "/download" | "/benchmark/transfer") => {
                Response::error(405, "method not allowed")
            }
            _ => Response::error(404, "not found"),
        }
    }

    async fn search(&self, query: &str) -> Response {
        match self.node.search(query).await {
            Ok(results) => Response::json(200, &results),
            Err(e @ NodeError::EmptyQuery) | Err(e @ NodeError::Search(_)) => {
                Response::error(400, &e.to_string())
            }
            Err(e) => Response::error(500, &e.to_string()),
        }
    }

    async fn download(&self, body: &[u8], benchmark: bool) -> Response {
        let request: DownloadRequest = match serde_json::from_slice(body) {
            Ok(r) => r,
            Err(e) => return Response::error(400, &format!("invalid request body: {e}")),
        };
        let providers = match request
            .providers
            .iter()
            .map(|p| p.parse::<PeerId>())
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(p) => p,
            Err(e) => return Response::error(400, &format!("invalid provider id: {e}")),
        };
        let Some(name) = safe_file_name(&request.meta.name) else {
            return Response::error(400, "file name is not usable");
        };
        let destination = self.download_dir.join(&name);

        let result = if request.whole {
            let [peer] = providers.as_slice() else {
                return Response::error(400, "whole-file download takes exactly one provider");
            };
            self.node.download_whole(&request.meta, *peer, &destination).await
        } else {
            self.node.download(&request.meta, &providers, &destination).await
        };
        let report = match result {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(name = %name, error = %e, "download failed");
                let status = match e {
                    NodeError::Download(DownloadError::NoProviders)
                    | NodeError::Download(DownloadError::InconsistentMetadata { .. }) => 400,
                    _ => 500,
                };
                return Response::error(status, &e.to_string());
            }
        };
        tracing::info!(name = %name, path = %destination.display(), bytes = report.bytes, "saved download");

        if !benchmark {
            return Response::json(
                200,
                &json!({
                    "message": format!("File '{name}' downloaded successfully"),
                    "path": destination,
                    "bytes": report.bytes,
                }),
            );
        }
        let throughput = benchmark::megabytes_per_second(report.bytes, report.elapsed);
        let entry = BenchmarkEntry::now(
            format!("Transfer: {name}"),
            report.elapsed,
            format!(
                "{} bytes from {} provider(s), {:.2} MB/s",
                report.bytes,
                providers.len(),
                throughput
            ),
        );
        if let Err(e) = benchmark::append(&self.benchmark_log, &entry).await {
            tracing::warn!(path = %self.benchmark_log.display(), error = %e, "cannot write benchmark log");
        }
        Response::json(
            200,
            &json!({
                "message": format!("Benchmark for '{name}' complete"),
                "durationMs": report.elapsed.as_millis() as u64,
                "bytes": report.bytes,
                "throughputMBps": throughput,
            }),
        )
    }
}

/// Last path component of `name`, with either separator stripped. `None` if nothing usable remains.
fn safe_file_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next()?.trim();
    if base.is_empty() || base == "." || base == ".." {
        return None;
    }
    Some(base.to_string())
}

/// Parsed request head: method, target, header length, declared body length.
fn parse_head(buf: &[u8]) -> Result<Option<(String, String, usize, usize)>, httparse::Error> {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut req = httparse::Request::new(&mut headers);
    let status = req.parse(buf)?;
    let httparse::Status::Complete(head_len) = status else {
        return Ok(None);
    };
    let content_length = req
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("Content-Length"))
        .and_then(|h| std::str::from_utf8(h.value).ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0);
    Ok(Some((
        req.method.unwrap_or_default().to_string(),
        req.path.unwrap_or_default().to_string(),
        head_len,
        content_length,
    )))
}

async fn handle_client<S>(mut client: S, plane: &ControlPlane) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    let (method, target, head_len, content_length) = loop {
        let n = client.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        match parse_head(&buf) {
            Ok(Some(head)) => break head,
            Ok(None) if buf.len() < MAX_HEAD_LEN => continue,
            Ok(None) => return write_response(&mut client, &Response::error(413, "request head too large")).await,
            Err(e) => return write_response(&mut client, &Response::error(400, &e.to_string())).await,
        }
    };
    if content_length > MAX_BODY_LEN {
        return write_response(&mut client, &Response::error(413, "request body too large")).await;
    }
    let mut body = buf.split_off(head_len);
    if body.len() < content_length {
        let mut rest = vec![0u8; content_length - body.len()];
        client.read_exact(&mut rest).await?;
        body.extend_from_slice(&rest);
    }
    body.truncate(content_length);

    tracing::debug!(method = %method, target = %target, "control request");
    let response = plane.route(&method, &target, &body).await;
    write_response(&mut client, &response).await
}

async fn write_response<S: AsyncWrite + Unpin>(client: &mut S, response: &Response) -> std::io::Result<()> {
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.status,
        response.reason(),
        response.body.len()
    );
    client.write_all(head.as_bytes()).await?;
    client.write_all(response.body.as_bytes()).await?;
    client.flush().await?;
    client.shutdown().await
}

/// Accept loop for the control plane.
pub async fn run_control(bind: SocketAddr, plane: Arc<ControlPlane>) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    tracing::info!(%bind, "control plane listening");
    serve(listener, plane).await
}

pub async fn serve(listener: TcpListener, plane: Arc<ControlPlane>) -> std::io::Result<()> {
    loop {
        let (stream, _) = listener.accept().await?;
        let plane = plane.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, &plane).await {
                tracing::debug!(error = %e, "control connection error");
            }
        });
    }
}
