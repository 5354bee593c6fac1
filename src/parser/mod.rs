//! Email parsing: MBOX frame splitting, header decoding, MIME bodies, and
//! the message decoder that ties them together.

pub mod decoder;
pub mod header;
pub mod mbox;
pub mod mime;
