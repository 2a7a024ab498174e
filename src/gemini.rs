// Gemini クライアント - streamGenerateContent (SSE) の呼び出しと受信

use std::pin::Pin;

use anyhow::{Context, Result, anyhow, bail};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use log::debug;
use reqwest::{self, header};

use crate::llm::schemas::gemini_response::{GenerateContentRequest, GenerateContentResponse};

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";

// テキスト断片のストリーム
pub type TextStream = BoxStream<'static, Result<String>>;

// リクエストを受けてテキスト断片を流すもの
pub trait ContentGenerator: Send + Sync {
    fn generate_stream(
        &self,
        request: GenerateContentRequest,
    ) -> BoxFuture<'_, Result<TextStream>>;
}

// Gemini API クライアント
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    api_base: String,
}

impl GeminiClient {
    pub fn new(api_key: Option<String>, model: impl Into<String>) -> Self {
        GeminiClient {
            client: reqwest::Client::new(),
            api_key,
            model: model.into(),
            api_base: GEMINI_API_BASE.to_string(),
        }
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.api_base, self.model
        )
    }

    pub async fn stream_generate_content(
        &self,
        request: &GenerateContentRequest,
    ) -> Result<TextStream> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("Gemini API key is not defined"))?;

        debug!("Gemini へ送信中: model={}", self.model);

        let response = self
            .client
            .post(self.stream_url())
            .header("x-goog-api-key", api_key)
            .header(header::ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await
            .context("Gemini API への接続に失敗")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            bail!(
                "Gemini API エラー: ステータス {}, レスポンス: {}",
                status,
                error_text
            );
        }

        Ok(sse_text_stream(response.bytes_stream()))
    }
}

impl ContentGenerator for GeminiClient {
    fn generate_stream(
        &self,
        request: GenerateContentRequest,
    ) -> BoxFuture<'_, Result<TextStream>> {
        async move { self.stream_generate_content(&request).await }.boxed()
    }
}

// ストリームを最後まで読み、全断片を連結する
pub async fn collect_stream<S>(mut stream: S) -> Result<String>
where
    S: Stream<Item = Result<String>> + Unpin,
{
    let mut buffer: Vec<String> = Vec::new();
    while let Some(fragment) = stream.next().await {
        buffer.push(fragment?);
    }
    Ok(buffer.concat())
}

// SSE の data 1件 (JSON) からテキストを取り出す
fn chunk_text(data: &str) -> Result<String> {
    let value: serde_json::Value =
        serde_json::from_str(data).with_context(|| format!("チャンク解析エラー: {}", data))?;

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        bail!("Gemini API エラー: {}", message);
    }

    let chunk: GenerateContentResponse = serde_json::from_value(value)?;
    if let Some(reason) = chunk.block_reason() {
        bail!("Response was blocked due to {}", reason);
    }
    if let Some(reason) = chunk.stop_reason() {
        bail!("Candidate was blocked due to {}", reason);
    }
    Ok(chunk.text())
}

struct SseState<S> {
    bytes: Pin<Box<S>>,
    sse: SseProcessor,
    eof: bool,
    done: bool,
}

// バイト列の SSE をテキスト断片のストリームに変換する
pub fn sse_text_stream<S, B, E>(bytes: S) -> TextStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let state = SseState {
        bytes: Box::pin(bytes),
        sse: SseProcessor::new(),
        eof: false,
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }

        loop {
            if let Some(event) = state.sse.next_event() {
                let item = event.and_then(|data| chunk_text(&data));
                if item.is_err() {
                    state.done = true;
                }
                return Some((item, state));
            }

            if state.eof {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => state.sse.push(chunk.as_ref()),
                Some(Err(e)) => {
                    state.done = true;
                    let err = anyhow::Error::from(e).context("ストリームの読み込みに失敗");
                    return Some((Err(err), state));
                }
                None => {
                    state.eof = true;
                    // 末尾に空行が無いイベントも拾う
                    if state.sse.has_remaining() {
                        state.sse.push(b"\n\n");
                    }
                }
            }
        }
    })
    .boxed()
}

// SSE のバッファリングとイベント分割
struct SseProcessor {
    buffer: Vec<u8>,
}

impl SseProcessor {
    fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// 次の完全なイベントの data を返す。まだ揃っていなければ None。
    fn next_event(&mut self) -> Option<Result<String>> {
        // コメントや keepalive は読み飛ばす
        loop {
            let boundary = self.find_event_boundary()?;
            let event_bytes: Vec<u8> = self.buffer.drain(..boundary.end).collect();

            let event_str = match std::str::from_utf8(&event_bytes[..boundary.start]) {
                Ok(s) => s,
                Err(e) => return Some(Err(anyhow!("SSE イベントが UTF-8 ではありません: {}", e))),
            };

            if let Some(data) = Self::parse_data(event_str) {
                return Some(Ok(data));
            }
        }
    }

    /// (start = 本文の終わり, end = 区切りを含む終わり)
    fn find_event_boundary(&self) -> Option<std::ops::Range<usize>> {
        let crlf = self
            .buffer
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .map(|i| i..i + 4);
        let lf = self
            .buffer
            .windows(2)
            .position(|w| w == b"\n\n")
            .map(|i| i..i + 2);

        match (crlf, lf) {
            (Some(a), Some(b)) => Some(if a.start <= b.start { a } else { b }),
            (a, b) => a.or(b),
        }
    }

    /// data: 行を改行で連結する。data 行が無ければ None。
    fn parse_data(event_str: &str) -> Option<String> {
        let data_lines: Vec<&str> = event_str
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
            .collect();

        if data_lines.is_empty() {
            None
        } else {
            Some(data_lines.join("\n"))
        }
    }

    fn has_remaining(&self) -> bool {
        self.buffer.iter().any(|&b| !b.is_ascii_whitespace())
    }
}
