use crate::error::ChannelError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// One decoded `data:` payload per item. Empty frames are keep-alive pings
/// and are delivered as-is; the channel layer ignores them.
pub type FrameStream = BoxStream<'static, Result<String, ChannelError>>;

/// The boundary to the chat server: one push subscription plus plain
/// request/response calls. Everything above this trait is testable with a
/// scripted implementation.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn subscribe(&self, url: &str) -> Result<FrameStream, ChannelError>;

    async fn get_json(&self, url: &str) -> Result<Value, ChannelError>;

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, ChannelError>;

    async fn post_file(
        &self,
        url: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<Value, ChannelError>;

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, ChannelError>;
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    /// Applies to request/response calls only. The push subscription is
    /// long-lived and must not carry an overall deadline.
    pub request_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(130),
        }
    }
}

/// HTTP implementation over reqwest.
pub struct HttpTransport {
    client: reqwest::Client,
    stream_client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;

        // No overall timeout here: the SSE connection stays open for the
        // whole session and only the connect phase is bounded.
        let stream_client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            client,
            stream_client,
        })
    }

    fn check_status(url: &str, resp: &reqwest::Response) -> Result<(), ChannelError> {
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::Transport(format!(
                "{} returned HTTP {}",
                url,
                resp.status().as_u16()
            )))
        }
    }
}

#[async_trait]
impl MessageTransport for HttpTransport {
    async fn subscribe(&self, url: &str) -> Result<FrameStream, ChannelError> {
        let resp = self
            .stream_client
            .get(url)
            .send()
            .await
            .map_err(ChannelError::transport)?;
        Self::check_status(url, &resp)?;
        debug!("Subscribed to {}", url);

        let mut bytes = resp.bytes_stream();
        let stream = async_stream::stream! {
            let mut buf: Vec<u8> = Vec::new();
            let mut data = String::new();
            let mut in_event = false;
            loop {
                let chunk = match bytes.next().await {
                    Some(Ok(chunk)) => chunk,
                    Some(Err(e)) => {
                        yield Err(ChannelError::transport(e));
                        break;
                    }
                    None => break,
                };
                buf.extend_from_slice(&chunk);
                while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);
                    let line = line.trim_end_matches(&['\r', '\n'][..]);
                    if line.is_empty() {
                        // Event boundary. Keep-alive comments produce an
                        // empty frame here, which the channel ignores.
                        if in_event {
                            yield Ok(std::mem::take(&mut data));
                            in_event = false;
                        }
                        continue;
                    }
                    in_event = true;
                    if let Some(rest) = line.strip_prefix("data:") {
                        if !data.is_empty() {
                            data.push('\n');
                        }
                        data.push_str(rest.trim_start());
                    }
                    // "id:", "event:" and ":" comment lines carry nothing we use
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn get_json(&self, url: &str) -> Result<Value, ChannelError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(ChannelError::transport)?;
        Self::check_status(url, &resp)?;
        resp.json().await.map_err(ChannelError::transport)
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, ChannelError> {
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(ChannelError::transport)?;
        Self::check_status(url, &resp)?;
        resp.json().await.map_err(ChannelError::transport)
    }

    async fn post_file(
        &self,
        url: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<Value, ChannelError> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);

        let resp = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(ChannelError::transport)?;
        Self::check_status(url, &resp)?;
        resp.json().await.map_err(ChannelError::transport)
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, ChannelError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(ChannelError::transport)?;
        Self::check_status(url, &resp)?;
        let bytes = resp.bytes().await.map_err(ChannelError::transport)?;
        Ok(bytes.to_vec())
    }
}
