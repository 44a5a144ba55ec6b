// Scripted in-memory transport for unit tests

use super::transport::{Frame, ProgressConnection, ProgressTransport};
use super::types::{ChannelError, ABNORMAL_CLOSURE};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Test-side handle for one scripted connection
pub struct ConnectionHandle {
    frames: mpsc::UnboundedSender<Frame>,
    closes: Arc<Mutex<Vec<u16>>>,
}

impl ConnectionHandle {
    pub fn send_text(&self, raw: &str) {
        let _ = self.frames.send(Frame::Text(raw.to_string()));
    }

    pub fn send(&self, frame: Frame) {
        let _ = self.frames.send(frame);
    }

    pub fn close_codes(&self) -> Vec<u16> {
        self.closes.lock().unwrap().clone()
    }
}

struct MockConnection {
    frames: mpsc::UnboundedReceiver<Frame>,
    closes: Arc<Mutex<Vec<u16>>>,
}

#[async_trait]
impl ProgressConnection for MockConnection {
    async fn next_frame(&mut self) -> Frame {
        self.frames.recv().await.unwrap_or(Frame::Closed {
            code: ABNORMAL_CLOSURE,
            reason: String::new(),
        })
    }

    async fn close(&mut self, code: u16, _reason: &str) {
        self.closes.lock().unwrap().push(code);
    }
}

/// Hands out queued connections; refuses to connect once the queue is empty
#[derive(Default)]
pub struct MockTransport {
    queue: Mutex<VecDeque<MockConnection>>,
    urls: Mutex<Vec<String>>,
    connect_calls: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn queue_connection(&self) -> ConnectionHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let closes = Arc::new(Mutex::new(Vec::new()));
        self.queue.lock().unwrap().push_back(MockConnection {
            frames: rx,
            closes: Arc::clone(&closes),
        });
        ConnectionHandle { frames: tx, closes }
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProgressTransport for MockTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn ProgressConnection>, ChannelError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());

        let next = self.queue.lock().unwrap().pop_front();
        match next {
            Some(connection) => Ok(Box::new(connection)),
            None => Err(ChannelError::ConnectFailed("connection refused".to_string())),
        }
    }
}
