//! Core data model: raw frames, decoded messages, addresses, and buckets.

pub mod address;
pub mod bucket;
pub mod frame;
pub mod message;
