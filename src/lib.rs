//! `mboxsort`: split, decode and classify MBOX mail archives.
//!
//! The library reads an archive as a byte stream, cuts it into frames
//! ([`parser::mbox`]), decodes each frame into a [`model::message::Message`]
//! ([`parser::decoder`]) and sorts the decoded set into named buckets
//! ([`classify`]). [`pipeline::Pipeline`] wires the three stages together.
//!
//! ```no_run
//! use mboxsort::classify::Classifier;
//! use mboxsort::parser::{decoder::MessageDecoder, mbox};
//! use mboxsort::pipeline::Pipeline;
//!
//! let splitter = mbox::open("archive.mbox", mbox::DEFAULT_READ_BUFFER_SIZE)?;
//! let outcome = Pipeline::new(MessageDecoder::new(), Classifier::default()).run(splitter)?;
//! for (name, bucket) in &outcome.buckets {
//!     println!("{name}: {}", bucket.len());
//! }
//! # Ok::<(), mboxsort::error::SortError>(())
//! ```

pub mod classify;
pub mod config;
pub mod error;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod report;
