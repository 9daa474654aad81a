//! Fakes and fixtures shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::core::conversation::{Conversation, ConversationMetadata};
use crate::core::message::Message;
use crate::core::persistence::{MemoryGateway, PersistenceError, PersistenceGateway};
use crate::core::providers::ProviderKind;
use crate::core::usage::TokenUsage;
use crate::providers::{Completion, DeltaStream, ProviderAdapter, ProviderError, UsageSlot};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// What one `stream_completion` call should do.
#[derive(Clone, Debug, Default)]
pub struct StreamScript {
    open_error: Option<ProviderError>,
    deltas: Vec<String>,
    delay: Option<Duration>,
    failure: Option<ProviderError>,
    usage: Option<TokenUsage>,
    hold_open: bool,
}

impl StreamScript {
    pub fn deltas<I, S>(deltas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            deltas: deltas.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn open_error(error: ProviderError) -> Self {
        Self {
            open_error: Some(error),
            ..Self::default()
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Sleep before every delta.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn then_fail(mut self, error: ProviderError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Never end after the scripted deltas.
    pub fn held_open(mut self) -> Self {
        self.hold_open = true;
        self
    }
}

/// A [`ProviderAdapter`] that replays scripts and records what it was sent.
pub struct ScriptedAdapter {
    kind: ProviderKind,
    streams: Mutex<VecDeque<StreamScript>>,
    fallback_stream: Option<StreamScript>,
    completions: Mutex<VecDeque<Result<Completion, ProviderError>>>,
    stream_calls: Mutex<Vec<Vec<Message>>>,
    completion_calls: Mutex<Vec<Vec<Message>>>,
    last_usage: UsageSlot,
}

impl ScriptedAdapter {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            streams: Mutex::new(VecDeque::new()),
            fallback_stream: None,
            completions: Mutex::new(VecDeque::new()),
            stream_calls: Mutex::new(Vec::new()),
            completion_calls: Mutex::new(Vec::new()),
            last_usage: UsageSlot::default(),
        }
    }

    pub fn with_stream(self, script: StreamScript) -> Self {
        lock(&self.streams).push_back(script);
        self
    }

    /// Used once the queued scripts run out.
    pub fn with_fallback_stream(mut self, script: StreamScript) -> Self {
        self.fallback_stream = Some(script);
        self
    }

    pub fn with_completion(self, result: Result<Completion, ProviderError>) -> Self {
        lock(&self.completions).push_back(result);
        self
    }

    pub fn with_title(self, title: &str) -> Self {
        self.with_completion(Ok(Completion {
            content: title.to_string(),
            usage: None,
        }))
    }

    pub fn push_stream(&self, script: StreamScript) {
        lock(&self.streams).push_back(script);
    }

    pub fn stream_calls(&self) -> Vec<Vec<Message>> {
        lock(&self.stream_calls).clone()
    }

    pub fn completion_calls(&self) -> Vec<Vec<Message>> {
        lock(&self.completion_calls).clone()
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn stream_completion(
        &self,
        messages: &[Message],
        _model: &str,
    ) -> Result<DeltaStream, ProviderError> {
        self.last_usage.clear();
        lock(&self.stream_calls).push(messages.to_vec());
        let script = lock(&self.streams)
            .pop_front()
            .or_else(|| self.fallback_stream.clone())
            .ok_or_else(|| ProviderError::malformed(self.kind, "no scripted stream"))?;
        let StreamScript {
            open_error,
            deltas,
            delay,
            failure,
            usage,
            hold_open,
        } = script;
        if let Some(err) = open_error {
            return Err(err);
        }

        let slot = self.last_usage.clone();
        let stream = async_stream::stream! {
            for delta in deltas {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(delta);
            }
            if let Some(err) = failure {
                yield Err(err);
                return;
            }
            if hold_open {
                futures_util::future::pending::<()>().await;
            }
            slot.set(usage);
        };
        let stream: DeltaStream = Box::pin(stream);
        Ok(stream)
    }

    async fn get_completion(
        &self,
        messages: &[Message],
        _model: &str,
    ) -> Result<Completion, ProviderError> {
        lock(&self.completion_calls).push(messages.to_vec());
        lock(&self.completions)
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::malformed(self.kind, "no scripted completion")))
    }

    fn last_stream_usage(&self) -> Option<TokenUsage> {
        self.last_usage.get()
    }
}

/// A [`MemoryGateway`] whose writes can be made to fail on demand.
#[derive(Default)]
pub struct FailingGateway {
    pub inner: MemoryGateway,
    pub fail_blob_writes: AtomicBool,
    pub fail_index_writes: AtomicBool,
    pub fail_deletes: AtomicBool,
}

impl FailingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_blob_writes(&self, fail: bool) {
        self.fail_blob_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_index_writes(&self, fail: bool) {
        self.fail_index_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool, what: &str) -> Result<(), PersistenceError> {
        if flag.load(Ordering::SeqCst) {
            Err(PersistenceError::Unavailable(format!("injected {what} failure")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PersistenceGateway for FailingGateway {
    async fn get_metadata_index(&self) -> Result<Option<Vec<ConversationMetadata>>, PersistenceError> {
        self.inner.get_metadata_index().await
    }

    async fn put_metadata_index(&self, entries: &[ConversationMetadata]) -> Result<(), PersistenceError> {
        Self::check(&self.fail_index_writes, "index write")?;
        self.inner.put_metadata_index(entries).await
    }

    async fn get_conversation_blob(&self, id: &str) -> Result<Option<Conversation>, PersistenceError> {
        self.inner.get_conversation_blob(id).await
    }

    async fn put_conversation_blob(&self, conversation: &Conversation) -> Result<(), PersistenceError> {
        Self::check(&self.fail_blob_writes, "blob write")?;
        self.inner.put_conversation_blob(conversation).await
    }

    async fn delete_conversation_blob(&self, id: &str) -> Result<(), PersistenceError> {
        Self::check(&self.fail_deletes, "delete")?;
        self.inner.delete_conversation_blob(id).await
    }

    async fn list_conversation_blobs(&self) -> Result<Vec<String>, PersistenceError> {
        self.inner.list_conversation_blobs().await
    }

    async fn get_active_conversation_id(&self) -> Result<Option<String>, PersistenceError> {
        self.inner.get_active_conversation_id().await
    }

    async fn put_active_conversation_id(&self, id: Option<&str>) -> Result<(), PersistenceError> {
        self.inner.put_active_conversation_id(id).await
    }
}

pub fn fixed_time(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0)
        .single()
        .expect("valid timestamp")
}

/// A conversation with one exchange, last updated at `fixed_time(minute)`.
pub fn create_test_conversation(title: &str, minute: u32) -> Conversation {
    let mut conversation = Conversation::new(ProviderKind::OpenAI, "gpt-4o-mini")
        .with_messages_appended([
            Message::user(format!("question for {title}")),
            Message::assistant(format!("answer for {title}")),
        ])
        .with_title(title);
    conversation.created_at = fixed_time(0);
    conversation.updated_at = fixed_time(minute);
    conversation
}

pub fn test_usage(prompt: u64, completion: u64) -> TokenUsage {
    TokenUsage::new(ProviderKind::OpenAI, "gpt-4o-mini").with_tokens(
        Some(prompt),
        Some(completion),
        Some(prompt + completion),
    )
}

/// How the local server answers one connection.
#[derive(Debug, Clone)]
pub enum CannedResponse {
    /// 200 with an event-stream body.
    Sse(String),
    /// A JSON body with the given status.
    Json(u16, String),
    /// Read the request, then hang up without answering.
    Hangup,
}

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub request_line: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A one-shot HTTP/1.1 server on 127.0.0.1 that answers each accepted
/// connection with the next canned response and records what it was sent.
pub struct CannedServer {
    pub url: String,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
}

impl CannedServer {
    pub async fn start(responses: Vec<CannedResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let addr = listener.local_addr().expect("local addr should resolve");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&requests);

        tokio::spawn(async move {
            for response in responses {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let Ok(request) = read_http_request(&mut stream).await else {
                    return;
                };
                lock(&captured).push(request);
                let raw = match response {
                    CannedResponse::Sse(body) => http_response(200, "text/event-stream", &body),
                    CannedResponse::Json(status, body) => {
                        http_response(status, "application/json", &body)
                    }
                    CannedResponse::Hangup => continue,
                };
                let _ = stream.write_all(raw.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        Self {
            url: format!("http://{addr}"),
            requests,
        }
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        lock(&self.requests).clone()
    }
}

fn http_response(status: u16, content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status} Canned\r\ncontent-type: {content_type}\r\nconnection: close\r\ncontent-length: {}\r\n\r\n{body}",
        body.len()
    )
}

async fn read_http_request(stream: &mut TcpStream) -> Result<CapturedRequest, String> {
    let mut buffer = Vec::new();
    let header_end = loop {
        let mut chunk = [0_u8; 1024];
        let read = stream.read(&mut chunk).await.map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("Unexpected EOF while reading HTTP headers".to_string());
        }
        buffer.extend_from_slice(&chunk[..read]);
        if let Some(pos) = buffer.windows(4).position(|window| window == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let mut lines = head.split("\r\n").filter(|line| !line.is_empty());
    let request_line = lines.next().unwrap_or_default().to_string();
    let mut headers = Vec::new();
    let mut content_length = 0;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse::<usize>().map_err(|err| err.to_string())?;
        }
        headers.push((name.to_string(), value));
    }

    let mut body = buffer[header_end..].to_vec();
    while body.len() < content_length {
        let mut chunk = vec![0_u8; content_length - body.len()];
        let read = stream.read(&mut chunk).await.map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("Unexpected EOF while reading HTTP body".to_string());
        }
        body.extend_from_slice(&chunk[..read]);
    }
    body.truncate(content_length);

    Ok(CapturedRequest {
        request_line,
        headers,
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    })
}
