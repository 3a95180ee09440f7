#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use topic_relay::broker::{AssignmentListener, ConsumerClient};
use topic_relay::consumer::{handler, MessageHandler};
use topic_relay::error::{Error, HandlerError, Result};
use topic_relay::types::{Message, TopicPattern};

/// What a scripted consumer observed
#[derive(Debug, Default)]
pub struct ConsumerProbe {
    pub subscribed: Option<String>,
    pub polls: usize,
    pub close_calls: usize,
}

/// Consumer client that replays a fixed list of poll results
///
/// Once the script runs out every poll comes back empty.
pub struct ScriptedConsumer {
    script: VecDeque<Result<Option<Message>>>,
    probe: Arc<Mutex<ConsumerProbe>>,
    closed: bool,
}

impl ScriptedConsumer {
    pub fn new(script: Vec<Result<Option<Message>>>) -> (Self, Arc<Mutex<ConsumerProbe>>) {
        let probe = Arc::new(Mutex::new(ConsumerProbe::default()));
        let consumer = Self {
            script: script.into(),
            probe: Arc::clone(&probe),
            closed: false,
        };
        (consumer, probe)
    }

    /// Script that yields the given JSON payloads at consecutive offsets
    pub fn with_offsets(topic: &str, offsets: &[i64]) -> (Self, Arc<Mutex<ConsumerProbe>>) {
        let mut script: Vec<Result<Option<Message>>> = offsets
            .iter()
            .map(|offset| Ok(Some(json_message(topic, *offset))))
            .collect();
        script.push(Ok(None));
        Self::new(script)
    }
}

#[async_trait]
impl ConsumerClient for ScriptedConsumer {
    async fn subscribe(
        &mut self,
        pattern: &TopicPattern,
        _listener: Arc<dyn AssignmentListener>,
    ) -> Result<()> {
        self.probe.lock().unwrap().subscribed = Some(pattern.as_str().to_string());
        Ok(())
    }

    async fn poll(&mut self, _timeout: Duration) -> Result<Option<Message>> {
        if self.closed {
            return Err(Error::ClosedError("scripted".to_string()));
        }
        self.probe.lock().unwrap().polls += 1;
        self.script.pop_front().unwrap_or(Ok(None))
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.probe.lock().unwrap().close_calls += 1;
        Ok(())
    }
}

/// A JSON message carrying its own offset
pub fn json_message(topic: &str, offset: i64) -> Message {
    Message::new(topic, 0, offset, format!(r#"{{"seq": {}}}"#, offset))
}

/// Handler that records every offset it sees
///
/// Fails on offsets in `fail_on` and panics on offsets in `panic_on`.
pub fn recording_handler(fail_on: &[i64], panic_on: &[i64]) -> (MessageHandler, Arc<Mutex<Vec<i64>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let fail_on = fail_on.to_vec();
    let panic_on = panic_on.to_vec();

    let recorded = Arc::clone(&seen);
    let h = handler(move |msg: Message| {
        let recorded = Arc::clone(&recorded);
        let fail = fail_on.contains(&msg.offset);
        let panic = panic_on.contains(&msg.offset);
        async move {
            recorded.lock().unwrap().push(msg.offset);
            if panic {
                panic!("handler blew up at offset {}", msg.offset);
            }
            if fail {
                return Err(HandlerError::from(format!("rejected offset {}", msg.offset)));
            }
            Ok::<(), HandlerError>(())
        }
    });

    (h, seen)
}

/// Minimal HTTP responder answering each request with the next scripted status
///
/// Records `METHOD path` plus the content type and body of every request.
pub struct MockHttpServer {
    pub base_url: String,
    pub requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub line: String,
    pub content_type: Option<String>,
    pub body: String,
}

impl MockHttpServer {
    pub async fn start(statuses: Vec<u16>) -> Self {
        Self::start_with_bodies(statuses.into_iter().map(|s| (s, String::new())).collect()).await
    }

    /// Answer with scripted statuses and JSON bodies
    pub async fn start_with_bodies(responses: Vec<(u16, String)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = Arc::clone(&requests);
        tokio::spawn(async move {
            let mut responses: VecDeque<(u16, String)> = responses.into();
            while let Ok((mut stream, _)) = listener.accept().await {
                let request = read_request(&mut stream).await;
                recorded.lock().unwrap().push(request);

                let (status, body) = responses.pop_front().unwrap_or((500, String::new()));
                let response = format!(
                    "HTTP/1.1 {} Scripted\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        Self { base_url, requests }
    }

    pub fn lines(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.line.clone())
            .collect()
    }
}

async fn read_request(stream: &mut tokio::net::TcpStream) -> RecordedRequest {
    let mut data = Vec::new();
    let mut chunk = [0u8; 1024];

    let header_end = loop {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break data.len();
        }
        data.extend_from_slice(&chunk[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&data[..header_end]).to_string();
    let mut lines = head.lines();
    let request_line = lines.next().unwrap_or_default();
    let line = request_line
        .split_whitespace()
        .take(2)
        .collect::<Vec<_>>()
        .join(" ");

    let mut content_length = 0;
    let mut content_type = None;
    for header in lines {
        if let Some((name, value)) = header.split_once(':') {
            match name.trim().to_ascii_lowercase().as_str() {
                "content-length" => content_length = value.trim().parse().unwrap_or(0),
                "content-type" => content_type = Some(value.trim().to_string()),
                _ => {}
            }
        }
    }

    while data.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        data.extend_from_slice(&chunk[..n]);
    }
    let body_end = (header_end + content_length).min(data.len());
    let body = String::from_utf8_lossy(&data[header_end..body_end]).to_string();

    RecordedRequest {
        line,
        content_type,
        body,
    }
}
