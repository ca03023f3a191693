use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use protocol::{AnalysisRequest, ChatMessage, ChatRequest};
use reqwest::redirect::Policy;
use reqwest::{Client, Response};
use serde_json::Value;

use crate::config::InferenceConfig;

use super::frames::{
    first_match, frame_error, is_done, parse_frame, LineBuffer, FINAL_TEXT_RULES,
    STREAM_DELTA_RULES,
};
use super::prompt::SystemPrompt;

const CHAT_PATH: &str = "/api/chat";
const ERROR_BODY_PREVIEW: usize = 512;

pub(crate) struct AnalysisClient {
    http: Client,
    url: String,
    model: String,
    read_timeout: Duration,
    verbose: bool,
    prompt: Arc<SystemPrompt>,
}

impl AnalysisClient {
    pub(crate) fn new(config: &InferenceConfig, prompt: Arc<SystemPrompt>) -> anyhow::Result<Self> {
        let http = build_http_client(config.read_timeout()).context("build http client")?;
        let url = join_base_path(&config.host, CHAT_PATH)?;
        Ok(Self {
            http,
            url,
            model: config.model.clone(),
            read_timeout: config.read_timeout(),
            verbose: config.verbose,
            prompt,
        })
    }

    pub(crate) fn model(&self) -> &str {
        &self.model
    }

    /// Prepares one analysis exchange. Nothing is sent until the first
    /// [`AnalysisStream::next_fragment`] call.
    pub(crate) fn stream(&self, payload: &AnalysisRequest) -> anyhow::Result<AnalysisStream> {
        let content = serde_json::to_string(payload).context("serialize analysis payload")?;
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(&*self.prompt.text()),
                ChatMessage::user(content),
            ],
            stream: true,
        };
        Ok(AnalysisStream {
            http: self.http.clone(),
            url: self.url.clone(),
            request,
            read_timeout: self.read_timeout,
            verbose: self.verbose,
            phase: Phase::Connect,
            body: None,
            lines: LineBuffer::default(),
            ready: VecDeque::new(),
            queued: VecDeque::new(),
            yielded_delta: false,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Connect,
    Streaming,
    Fallback,
    Finished,
}

/// Text fragments of one model reply, pulled one at a time.
///
/// Streams `/api/chat` first. If that pass produced no text at all, the same
/// request is re-sent once with `stream: false` and its body becomes the only
/// fragment. Transport failures and non-success statuses come back as `Err`;
/// an `error` frame from the backend is reported as a final fragment instead.
pub(crate) struct AnalysisStream {
    http: Client,
    url: String,
    request: ChatRequest,
    read_timeout: Duration,
    verbose: bool,
    phase: Phase,
    body: Option<BoxStream<'static, reqwest::Result<Bytes>>>,
    lines: LineBuffer,
    ready: VecDeque<String>,
    queued: VecDeque<String>,
    yielded_delta: bool,
}

impl AnalysisStream {
    pub(crate) async fn next_fragment(&mut self) -> anyhow::Result<Option<String>> {
        loop {
            if let Some(fragment) = self.queued.pop_front() {
                return Ok(Some(fragment));
            }
            match self.phase {
                Phase::Connect => {
                    self.phase = Phase::Finished;
                    self.note(format!(
                        "POST {} model={} stream=true",
                        self.url, self.request.model
                    ));
                    let body = open_stream(
                        self.http.clone(),
                        self.url.clone(),
                        self.request.clone(),
                        self.read_timeout,
                    )
                    .await?;
                    self.body = Some(body);
                    self.phase = Phase::Streaming;
                }
                Phase::Streaming => {
                    if let Some(line) = self.ready.pop_front() {
                        self.handle_line(&line);
                        continue;
                    }
                    let chunk = match self.read_chunk().await {
                        Ok(chunk) => chunk,
                        Err(err) => {
                            self.close(Phase::Finished);
                            return Err(err);
                        }
                    };
                    match chunk {
                        Some(bytes) => {
                            let lines = self.lines.push(&bytes);
                            self.ready.extend(lines);
                        }
                        None => {
                            self.body = None;
                            match self.lines.finish() {
                                Some(rest) => self.ready.push_back(rest),
                                None => self.end_stream(),
                            }
                        }
                    }
                }
                Phase::Fallback => {
                    self.phase = Phase::Finished;
                    self.run_fallback().await?;
                }
                Phase::Finished => return Ok(None),
            }
        }
    }

    async fn read_chunk(&mut self) -> anyhow::Result<Option<Bytes>> {
        let Some(body) = self.body.as_mut() else {
            return Ok(None);
        };
        match tokio::time::timeout(self.read_timeout, body.next()).await {
            Err(_) => anyhow::bail!(
                "inference stream stalled for {}s",
                self.read_timeout.as_secs()
            ),
            Ok(None) => Ok(None),
            Ok(Some(chunk)) => Ok(Some(chunk.context("read inference stream")?)),
        }
    }

    fn handle_line(&mut self, line: &str) {
        let Some(frame) = parse_frame(line) else {
            let raw = line.trim();
            if !raw.is_empty() {
                self.note(format!("non-json line: {raw}"));
            }
            return;
        };

        if let Some(error) = frame_error(&frame) {
            tracing::warn!(error = %error, "inference backend reported an error");
            self.queued.push_back(format!("LLM error: {error}\n"));
            self.close(Phase::Finished);
            return;
        }

        if let Some(delta) =
            first_match(&STREAM_DELTA_RULES, &frame).filter(|delta| !delta.is_empty())
        {
            self.yielded_delta = true;
            self.queued.push_back(delta);
        }

        if is_done(&frame) {
            self.end_stream();
        }
    }

    fn end_stream(&mut self) {
        if self.yielded_delta {
            self.close(Phase::Finished);
        } else {
            self.close(Phase::Fallback);
            self.note("no streamed chunks; trying non-stream fallback".to_string());
        }
    }

    fn close(&mut self, next: Phase) {
        self.body = None;
        self.ready.clear();
        self.lines = LineBuffer::default();
        self.phase = next;
    }

    async fn run_fallback(&mut self) -> anyhow::Result<()> {
        let request = self.request.non_streaming();
        let response = self
            .http
            .post(&self.url)
            .json(&request)
            .timeout(self.read_timeout)
            .send()
            .await
            .with_context(|| format!("POST {} (non-streaming)", self.url))?;
        let response = ensure_success(response).await?;
        let data: Value = response
            .json()
            .await
            .context("non-streaming reply was not JSON")?;

        match first_match(&FINAL_TEXT_RULES, &data).filter(|text| !text.is_empty()) {
            Some(text) => self.queued.push_back(text),
            None => {
                let keys = data
                    .as_object()
                    .map(|object| object.keys().cloned().collect::<Vec<_>>().join(", "))
                    .unwrap_or_else(|| "<not an object>".to_string());
                self.note(format!("final object keys: [{keys}]"));
            }
        }
        Ok(())
    }

    /// Diagnostic about the exchange. Always traced; also surfaced as a
    /// `(debug)` fragment when verbose mode is on.
    fn note(&mut self, message: String) {
        tracing::debug!(detail = %message, "analysis stream");
        if self.verbose {
            self.queued.push_back(format!("(debug) {message}\n"));
        }
    }
}

/// Owned inputs keep the future `Send`; the boxed body is not `Sync`.
async fn open_stream(
    http: Client,
    url: String,
    request: ChatRequest,
    read_timeout: Duration,
) -> anyhow::Result<BoxStream<'static, reqwest::Result<Bytes>>> {
    let send = http.post(&url).json(&request).send();
    let response = tokio::time::timeout(read_timeout, send)
        .await
        .map_err(|_| {
            anyhow::anyhow!(
                "no response from {} within {}s",
                url,
                read_timeout.as_secs()
            )
        })?
        .with_context(|| format!("POST {url}"))?;
    let response = ensure_success(response).await?;
    tracing::debug!(
        status = %response.status(),
        url = %url,
        "inference stream opened"
    );
    Ok(response.bytes_stream().boxed())
}

async fn ensure_success(response: Response) -> anyhow::Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let preview: String = text.trim().chars().take(ERROR_BODY_PREVIEW).collect();
    anyhow::bail!("inference backend returned {status}: {preview}")
}

fn join_base_path(base: &str, path: &str) -> anyhow::Result<String> {
    if base.trim().is_empty() {
        anyhow::bail!("inference host is empty");
    }
    let normalized_base = base.trim().trim_end_matches('/');
    let normalized_path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    Ok(format!("{normalized_base}{normalized_path}"))
}

fn build_http_client(connect_timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .http1_only()
        .redirect(Policy::none())
        .connect_timeout(connect_timeout)
        .pool_max_idle_per_host(0)
        .build()
}
