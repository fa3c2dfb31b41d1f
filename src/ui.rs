//! Operator-facing output
//!
//! Steps report progress with `say` and problems with `error`. The console
//! implementation also mirrors every message into the tracing log.

use std::sync::{Mutex, PoisonError};

pub trait Ui: Send + Sync {
    fn say(&self, message: &str);
    fn error(&self, message: &str);
}

/// Writes to stdout/stderr
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleUi;

impl Ui for ConsoleUi {
    fn say(&self, message: &str) {
        tracing::info!("{}", message);
        println!("==> {}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!("{}", message);
        eprintln!("==> {}", message);
    }
}

/// A message captured by [`RecordingUi`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiMessage {
    Say(String),
    Error(String),
}

/// Keeps every message in memory
#[derive(Debug, Default)]
pub struct RecordingUi {
    messages: Mutex<Vec<UiMessage>>,
}

impl RecordingUi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<UiMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter_map(|m| match m {
                UiMessage::Error(text) => Some(text),
                UiMessage::Say(_) => None,
            })
            .collect()
    }

    fn push(&self, message: UiMessage) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }
}

impl Ui for RecordingUi {
    fn say(&self, message: &str) {
        self.push(UiMessage::Say(message.to_string()));
    }

    fn error(&self, message: &str) {
        self.push(UiMessage::Error(message.to_string()));
    }
}
