//! Terminal typing effect
//!
//! Streamed reply fragments are printed word by word with a small pause.
//! This is purely cosmetic: the driver receives the full reply regardless of
//! how fast (or whether) it is printed.

use std::io::{self, Write};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::llm::FragmentSender;

/// Splits streamed text into whole words
#[derive(Debug, Default)]
pub struct WordBuffer {
    pending: String,
}

impl WordBuffer {
    /// Add a fragment; returns every word completed by it, each with its
    /// trailing space
    pub fn push(&mut self, fragment: &str) -> Vec<String> {
        self.pending.push_str(fragment);

        let mut words = Vec::new();
        while let Some(idx) = self.pending.find(' ') {
            let rest = self.pending.split_off(idx + 1);
            words.push(std::mem::replace(&mut self.pending, rest));
        }
        words
    }

    /// Whatever is left once the stream ends
    pub fn finish(self) -> String {
        self.pending
    }
}

/// Prints fragments to a writer with an optional per-word delay
#[derive(Debug, Clone, Copy)]
pub struct Typewriter {
    delay: Duration,
}

impl Typewriter {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }

    /// Start printing in the background.
    ///
    /// Drop the returned sender (or let the turn drop it) to flush the tail;
    /// the task hands the writer back when done.
    pub fn spawn<W>(self, mut out: W) -> (FragmentSender, JoinHandle<io::Result<W>>)
    where
        W: Write + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        let handle = tokio::spawn(async move {
            let mut words = WordBuffer::default();

            while let Some(fragment) = rx.recv().await {
                if self.delay.is_zero() {
                    out.write_all(fragment.as_bytes())?;
                    out.flush()?;
                    continue;
                }

                for word in words.push(&fragment) {
                    out.write_all(word.as_bytes())?;
                    out.flush()?;
                    tokio::time::sleep(self.delay).await;
                }
            }

            let tail = words.finish();
            if !tail.is_empty() {
                out.write_all(tail.as_bytes())?;
            }
            out.flush()?;
            Ok(out)
        });

        (tx, handle)
    }
}
