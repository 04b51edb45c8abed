use crate::deepinfra::catalog::{ModelCatalog, ModelEntry};
use crate::deepinfra::config::DeepinfraConfig;
use crate::deepinfra::{decoder, identity};
use deepchat_core::chat::{
    validate_conversation, ClientError, CompletionProps, Envelope, Message, StreamObserver,
};
use futures::StreamExt;
use reqwest::{header, Client, StatusCode};
use std::time::Duration;
use tracing::{error, info, warn};

/// Model used when a streaming request names none or an uncataloged one.
pub const DEFAULT_STREAM_MODEL: &str = "meta-llama/Llama-2-70b-chat-hf";
/// Fallback for the buffered path, deliberately not the streaming one.
pub const DEFAULT_SYNC_MODEL: &str = "meta-llama/Meta-Llama-3.1-405B-Instruct";

#[derive(Clone)]
pub struct DeepinfraClient {
    http: Client,
    cfg: DeepinfraConfig,
    catalog: ModelCatalog,
}

impl DeepinfraClient {
    pub fn new(cfg: DeepinfraConfig) -> anyhow::Result<Self> {
        let mut headers = identity::browser_headers();
        for (name, value) in &cfg.extra_headers {
            headers.insert(
                header::HeaderName::from_bytes(name.as_bytes())?,
                header::HeaderValue::from_str(value)?,
            );
        }
        let mut builder = Client::builder()
            .default_headers(headers)
            .use_rustls_tls()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(2)
            .timeout(cfg.timeout);
        if let Some(p) = &cfg.proxy {
            builder = builder.proxy(reqwest::Proxy::all(p)?);
        }
        let http = builder.build()?;
        Ok(Self {
            http,
            cfg,
            catalog: ModelCatalog::default(),
        })
    }

    /// Fetches the featured-model catalog once. The catalog never changes
    /// afterwards for this instance.
    pub async fn init(&mut self) -> Result<(), ClientError> {
        let url = format!("{}/models/featured", self.base());
        info!(target:"providers::deepinfra","fetch model catalog url={}", url);
        let resp = self
            .http
            .get(url)
            .header("x-forwarded-for", identity::random_ipv4())
            .send()
            .await
            .map_err(map_reqwest_err)?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.ok();
            error!(target:"providers::deepinfra","catalog fetch non-200 status={} body={:?}", status, body);
            return Err(map_status_err(status, body));
        }
        let entries: Vec<ModelEntry> = resp
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        self.catalog = ModelCatalog::from_entries(entries);
        info!(target:"providers::deepinfra","catalog ready models={}", self.catalog.len());
        Ok(())
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// Streaming completion. A validation failure returns the 400 envelope
    /// before any request goes out; everything that fails later folds into
    /// the 500 envelope. The observer sees the reply grow once per chunk.
    pub async fn completion_stream<O>(&self, props: &CompletionProps, observer: &mut O) -> Envelope
    where
        O: StreamObserver,
    {
        if let Err(e) = validate_conversation(props.messages.as_ref()) {
            return Envelope::bad_request(e.to_string());
        }
        let model = self
            .catalog
            .resolve(props.model.as_deref(), self.stream_model());
        match self.run_stream(model, props, observer).await {
            Ok(reply) => Envelope::success(reply),
            Err(e) => {
                warn!(target:"providers::deepinfra","completion stream failed: {}", e);
                Envelope::internal_error(e.to_string())
            }
        }
    }

    /// Buffered completion: same validation and model resolution, one JSON
    /// body instead of a stream.
    pub async fn completion(&self, props: &CompletionProps) -> Envelope {
        if let Err(e) = validate_conversation(props.messages.as_ref()) {
            return Envelope::bad_request(e.to_string());
        }
        let model = self
            .catalog
            .resolve(props.model.as_deref(), self.sync_model());
        match self.run_completion(model, props).await {
            Ok(reply) => Envelope::success(reply),
            Err(e) => {
                warn!(target:"providers::deepinfra","completion failed: {}", e);
                Envelope::internal_error(e.to_string())
            }
        }
    }

    async fn run_stream<O>(
        &self,
        model: &str,
        props: &CompletionProps,
        observer: &mut O,
    ) -> Result<Message, ClientError>
    where
        O: StreamObserver,
    {
        let url = self.completions_url();
        info!(target:"providers::deepinfra","start completion stream model={} url={}", model, url);
        let body = serde_json::json!({
            "model": model,
            "messages": props.messages,
            "stream": true,
        });
        let resp = self
            .http
            .post(url)
            .header("x-forwarded-for", identity::random_ipv4())
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_err)?;
        // The response headers arrived: loading is over, the reply is awaited.
        // A failing status keeps the awaiting flag set.
        observer.on_loading(false);
        observer.on_awaiting(true);
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.ok();
            error!(target:"providers::deepinfra","completion stream non-200 status={} body={:?}", status, body);
            return Err(map_status_err(status, body));
        }
        let bytes = resp.bytes_stream().map(|r| r.map_err(map_reqwest_err));
        let mut snapshots = decoder::snapshot_stream(bytes);
        let mut reply = Message::assistant("");
        while let Some(item) = snapshots.next().await {
            let snapshot = item?;
            observer.on_message(&snapshot);
            reply = snapshot;
        }
        observer.on_awaiting(false);
        info!(target:"providers::deepinfra","completion stream done chars={}", reply.content.len());
        Ok(reply)
    }

    async fn run_completion(
        &self,
        model: &str,
        props: &CompletionProps,
    ) -> Result<Message, ClientError> {
        let url = self.completions_url();
        info!(target:"providers::deepinfra","start completion model={} url={}", model, url);
        let body = serde_json::json!({
            "model": model,
            "messages": props.messages,
            "stream": false,
        });
        let resp = self
            .http
            .post(url)
            .header("x-forwarded-for", identity::random_ipv4())
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_err)?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.ok();
            error!(target:"providers::deepinfra","completion non-200 status={} body={:?}", status, body);
            return Err(map_status_err(status, body));
        }
        let v: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        let reply: Message = serde_json::from_value(v["choices"][0]["message"].clone())
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        Ok(reply)
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/openai/chat/completions", self.base())
    }

    fn base(&self) -> &str {
        self.cfg.base_url.as_str().trim_end_matches('/')
    }

    fn stream_model(&self) -> &str {
        self.cfg
            .stream_model
            .as_deref()
            .unwrap_or(DEFAULT_STREAM_MODEL)
    }

    fn sync_model(&self) -> &str {
        self.cfg.sync_model.as_deref().unwrap_or(DEFAULT_SYNC_MODEL)
    }
}

fn map_reqwest_err(e: reqwest::Error) -> ClientError {
    if e.is_timeout() {
        ClientError::Timeout(e.to_string())
    } else if e.is_request() || e.is_connect() {
        ClientError::Network(e.to_string())
    } else {
        ClientError::Other(e.to_string())
    }
}

fn map_status_err(status: StatusCode, body: Option<String>) -> ClientError {
    ClientError::Status(format!("{} {}", status.as_u16(), body.unwrap_or_default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_err_keeps_code_and_body() {
        let e = map_status_err(StatusCode::SERVICE_UNAVAILABLE, Some("overloaded".into()));
        assert_eq!(e.to_string(), "status: 503 overloaded");
        let e = map_status_err(StatusCode::IM_A_TEAPOT, None);
        assert_eq!(e.to_string(), "status: 418 ");
    }

    #[test]
    fn test_default_models_differ_per_path() {
        assert_ne!(DEFAULT_STREAM_MODEL, DEFAULT_SYNC_MODEL);
    }
}
