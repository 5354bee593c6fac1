//! The sort pipeline: frames → decoded messages → classified buckets.

use std::collections::BTreeMap;
use std::io::BufRead;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::classify::Classifier;
use crate::error::{DecodeError, DecodeErrorKind, Result, SortError};
use crate::model::bucket::Bucket;
use crate::model::frame::RawFrame;
use crate::model::message::Message;
use crate::parser::decoder::{FrameDecoder, MessageDecoder};
use crate::parser::mbox::FrameSplitter;

/// Frames decoded per batch unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 256;

/// Progress is logged every this many attempted messages.
const PROGRESS_INTERVAL: u64 = 1000;

/// What went wrong with one frame, or with the stream as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Junk before the first separator line.
    Format,
    /// A frame that could not be decoded.
    Decode(DecodeErrorKind),
}

impl std::fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Format => f.write_str("format"),
            Self::Decode(kind) => write!(f, "{kind}"),
        }
    }
}

/// One entry of the run's diagnostics list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// Byte offset of the affected frame (0 for stream-level problems).
    pub offset: u64,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl From<DecodeError> for Diagnostic {
    fn from(err: DecodeError) -> Self {
        Self {
            offset: err.offset,
            kind: DiagnosticKind::Decode(err.kind),
            message: err.reason,
        }
    }
}

/// Everything a run produces.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SortOutcome {
    /// Successfully decoded messages, in archive order.
    pub messages: Vec<Message>,
    /// Bucket name → ordered indices into `messages`.
    pub buckets: BTreeMap<String, Bucket>,
    /// Stream and per-frame problems, ordered by offset.
    pub diagnostics: Vec<Diagnostic>,
    /// Frames handed to the decoder.
    pub attempted: u64,
    /// Frames that decoded into a message.
    pub succeeded: u64,
}

impl SortOutcome {
    pub fn failed(&self) -> u64 {
        self.attempted - self.succeeded
    }

    /// The messages of one bucket, in bucket order.
    pub fn bucket_messages(&self, name: &str) -> Option<Vec<&Message>> {
        self.buckets
            .get(name)
            .map(|b| b.members.iter().map(|&i| &self.messages[i]).collect())
    }
}

/// Wires a [`FrameSplitter`], a [`FrameDecoder`] and a [`Classifier`]
/// together.
///
/// A decode failure only drops the affected frame; an I/O error on the
/// stream aborts the run.
pub struct Pipeline<D = MessageDecoder> {
    decoder: D,
    classifier: Classifier,
    workers: usize,
    batch_size: usize,
}

impl<D: FrameDecoder> Pipeline<D> {
    pub fn new(decoder: D, classifier: Classifier) -> Self {
        Self {
            decoder,
            classifier,
            workers: 0,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Decoder threads: 0 uses one per CPU, 1 decodes on the calling thread.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Frames decoded together; at least 1.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Run over an archive stream.
    pub fn run<R: BufRead>(&self, splitter: FrameSplitter<R>) -> Result<SortOutcome> {
        self.run_with_progress(splitter, None)
    }

    /// Run over an archive stream, calling `progress(attempted, bytes_read)`
    /// after every batch.
    pub fn run_with_progress<R: BufRead>(
        &self,
        mut splitter: FrameSplitter<R>,
        progress: Option<&dyn Fn(u64, u64)>,
    ) -> Result<SortOutcome> {
        let pool = self.build_pool();
        let mut outcome = SortOutcome::default();
        let mut batch: Vec<RawFrame> = Vec::with_capacity(self.batch_size);
        let mut next_report = PROGRESS_INTERVAL;

        loop {
            batch.clear();
            for frame in splitter.by_ref().take(self.batch_size) {
                batch.push(frame?);
            }
            if batch.is_empty() {
                break;
            }

            let results = self.decode_batch(&batch, pool.as_ref());
            for (frame, result) in batch.iter().zip(results) {
                outcome.attempted += 1;
                match result {
                    Ok(message) => {
                        outcome.succeeded += 1;
                        outcome.messages.push(message);
                    }
                    Err(err) => {
                        warn!(offset = err.offset, kind = %err.kind, "Skipping message: {}", err.reason);
                        debug!(
                            offset = err.offset,
                            separator = %String::from_utf8_lossy(frame.separator_line()),
                            "Skipped frame"
                        );
                        outcome.diagnostics.push(err.into());
                    }
                }
            }

            if outcome.attempted >= next_report {
                info!(
                    attempted = outcome.attempted,
                    failed = outcome.failed(),
                    "Processed {} messages",
                    outcome.attempted
                );
                next_report = (outcome.attempted / PROGRESS_INTERVAL + 1) * PROGRESS_INTERVAL;
            }
            if let Some(cb) = progress {
                cb(outcome.attempted, splitter.bytes_read());
            }
        }

        if let Some(SortError::Format { offset, reason }) = splitter.format_error() {
            outcome.diagnostics.push(Diagnostic {
                offset,
                kind: DiagnosticKind::Format,
                message: reason,
            });
        }
        outcome.diagnostics.sort_by_key(|d| d.offset);

        outcome.buckets = self.classifier.classify(&outcome.messages);
        info!(
            frames = splitter.frames_yielded(),
            attempted = outcome.attempted,
            succeeded = outcome.succeeded,
            buckets = outcome.buckets.len(),
            "Sort complete"
        );
        Ok(outcome)
    }

    fn build_pool(&self) -> Option<rayon::ThreadPool> {
        if self.workers == 1 {
            return None;
        }
        match rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("mboxsort-decode-{i}"))
            .build()
        {
            Ok(pool) => {
                debug!(threads = pool.current_num_threads(), "Decoder pool ready");
                Some(pool)
            }
            Err(e) => {
                warn!(error = %e, "Could not start decoder threads, decoding sequentially");
                None
            }
        }
    }

    /// Decode a batch, keeping results in frame order.
    fn decode_batch(
        &self,
        batch: &[RawFrame],
        pool: Option<&rayon::ThreadPool>,
    ) -> Vec<std::result::Result<Message, DecodeError>> {
        match pool {
            Some(pool) => pool.install(|| {
                batch
                    .par_iter()
                    .map(|frame| self.decoder.decode(frame))
                    .collect()
            }),
            None => batch.iter().map(|frame| self.decoder.decode(frame)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::RuleSet;
    use crate::config::ClassificationConfig;

    fn archive(n: usize) -> String {
        (0..n)
            .map(|i| {
                format!(
                    "From u{i}@example.org Thu Jan  4 10:00:00 2024\n\
From: u{i}@d{}.org\n\
Subject: message {i}\n\
Date: Thu, {:02} Jan 2024 10:00:00 +0000\n\
Message-ID: <m{i}@example.org>\n\
\n\
body {i}\n\
\n",
                    i % 2,
                    i % 28 + 1
                )
            })
            .collect()
    }

    fn pipeline(workers: usize, batch_size: usize) -> Pipeline {
        Pipeline::new(MessageDecoder::new(), Classifier::default())
            .workers(workers)
            .batch_size(batch_size)
    }

    #[test]
    fn test_sequential_and_parallel_agree() {
        let text = archive(50);
        let seq = pipeline(1, 7).run(FrameSplitter::from_bytes(text.as_bytes())).unwrap();
        let par = pipeline(4, 7).run(FrameSplitter::from_bytes(text.as_bytes())).unwrap();
        assert_eq!(seq.attempted, 50);
        assert_eq!(seq.succeeded, 50);
        assert_eq!(seq.messages, par.messages);
        assert_eq!(seq.buckets, par.buckets);
        let sequences: Vec<u64> = seq.messages.iter().map(|m| m.sequence).collect();
        assert_eq!(sequences, (0..50).collect::<Vec<u64>>());
    }

    #[test]
    fn test_bucket_messages_in_sorted_order() {
        let text = archive(6);
        let outcome = pipeline(1, 256).run(FrameSplitter::from_bytes(text.as_bytes())).unwrap();
        let d0 = outcome.bucket_messages("sender:d0.org").unwrap();
        let subjects: Vec<&str> = d0.iter().map(|m| m.subject.as_str()).collect();
        assert_eq!(subjects, vec!["message 0", "message 2", "message 4"]);
        assert!(outcome.bucket_messages("sender:nowhere").is_none());
    }

    #[test]
    fn test_decode_failure_becomes_diagnostic() {
        let mut text = archive(2);
        let bad_offset = text.len() as u64;
        text.push_str(
            "From x@y.z Thu Jan  4 10:00:00 2024\n\
From: x@y.z\n\
Content-Transfer-Encoding: x-custom\n\
\n\
???\n",
        );
        let outcome = pipeline(2, 2).run(FrameSplitter::from_bytes(text.as_bytes())).unwrap();
        assert_eq!(outcome.attempted, 3);
        assert_eq!(outcome.succeeded, 2);
        assert_eq!(outcome.failed(), 1);
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].offset, bad_offset);
        assert_eq!(
            outcome.diagnostics[0].kind,
            DiagnosticKind::Decode(DecodeErrorKind::UnknownTransferEncoding)
        );
        let bucketed: usize = outcome.buckets.values().map(Bucket::len).sum();
        assert_eq!(bucketed, 2);
    }

    #[test]
    fn test_preamble_is_reported_first() {
        let text = format!("junk line\n\n{}", archive(1));
        let outcome = pipeline(1, 256).run(FrameSplitter::from_bytes(text.as_bytes())).unwrap();
        assert_eq!(outcome.succeeded, 1);
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].kind, DiagnosticKind::Format);
        assert_eq!(outcome.diagnostics[0].offset, 0);
    }

    #[test]
    fn test_empty_stream() {
        let outcome = pipeline(0, 256).run(FrameSplitter::from_bytes(b"")).unwrap();
        assert_eq!(outcome.attempted, 0);
        assert!(outcome.buckets.is_empty());
        assert!(outcome.diagnostics.is_empty());
    }

    #[test]
    fn test_progress_callback_sees_every_batch() {
        let text = archive(10);
        let calls = std::cell::RefCell::new(Vec::new());
        let cb = |attempted: u64, _bytes: u64| calls.borrow_mut().push(attempted);
        pipeline(1, 4)
            .run_with_progress(FrameSplitter::from_bytes(text.as_bytes()), Some(&cb))
            .unwrap();
        assert_eq!(calls.into_inner(), vec![4, 8, 10]);
    }

    #[test]
    fn test_thread_rules_use_full_set() {
        let cfg = ClassificationConfig {
            group_by: vec!["thread".to_string()],
            sort_by: "thread".to_string(),
            ..ClassificationConfig::default()
        };
        let classifier = Classifier::new(RuleSet::from_config(&cfg).unwrap());
        let text = archive(3);
        let outcome = Pipeline::new(MessageDecoder::new(), classifier)
            .run(FrameSplitter::from_bytes(text.as_bytes()))
            .unwrap();
        assert_eq!(outcome.buckets.len(), 3);
        assert!(outcome.buckets.contains_key("thread:m0@example.org"));
    }
}
