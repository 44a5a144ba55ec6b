#![allow(dead_code)]

use async_trait::async_trait;
use file_converter_lib::progress::{
    ChannelError, Frame, ProgressConnection, ProgressTransport,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Replays a fixed list of frames per connection, then idles until closed
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Vec<Frame>>>,
    urls: Mutex<Vec<String>>,
    closes: Arc<Mutex<Vec<u16>>>,
}

impl ScriptedTransport {
    pub fn new(scripts: Vec<Vec<Frame>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            ..Self::default()
        })
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    pub fn close_codes(&self) -> Vec<u16> {
        self.closes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProgressTransport for ScriptedTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn ProgressConnection>, ChannelError> {
        self.urls.lock().unwrap().push(url.to_string());
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(frames) => Ok(Box::new(ScriptedConnection {
                frames: frames.into(),
                closes: Arc::clone(&self.closes),
            })),
            None => Err(ChannelError::ConnectFailed("no scripted connection".to_string())),
        }
    }
}

struct ScriptedConnection {
    frames: VecDeque<Frame>,
    closes: Arc<Mutex<Vec<u16>>>,
}

#[async_trait]
impl ProgressConnection for ScriptedConnection {
    async fn next_frame(&mut self) -> Frame {
        match self.frames.pop_front() {
            Some(frame) => frame,
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self, code: u16, _reason: &str) {
        self.closes.lock().unwrap().push(code);
    }
}

pub fn text(raw: &str) -> Frame {
    Frame::Text(raw.to_string())
}
