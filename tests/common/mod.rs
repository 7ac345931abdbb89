#![allow(dead_code)]

//! Shared helpers for the integration test suite.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

pub mod ws_server;

/// Initialize `env_logger` once per test binary; safe to call from every
/// test.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Poll `condition` every 10ms until it holds or `deadline` elapses.
pub async fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    loop {
        if condition() {
            return true;
        }
        if start.elapsed() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(10)).await;
    }
}

/// Async variant of [`wait_until`] for conditions that need to await.
pub async fn eventually<F, Fut>(deadline: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    loop {
        if condition().await {
            return true;
        }
        if start.elapsed() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(10)).await;
    }
}

/// Collects messages delivered to a subscription handler.
///
/// Clone-cheap; [`Recorder::handler`] returns a closure suitable for
/// `SkiffClient::subscribe`.
#[derive(Clone, Default)]
pub struct Recorder {
    messages: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handler(&self) -> impl Fn(String) + Send + Sync + 'static {
        let messages = self.messages.clone();
        move |text| {
            messages.lock().unwrap().push(text);
        }
    }

    pub fn push(&self, text: String) {
        self.messages.lock().unwrap().push(text);
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
