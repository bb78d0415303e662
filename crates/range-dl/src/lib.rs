//! HTTP Range helpers for resumable transfers.
//!
//! `header` builds `Range` requests and reads back what the server agreed to,
//! `reader` turns a response body (or any local reader) into fixed-size chunks.

pub mod header;
pub mod reader;

pub use header::{accepts_ranges, file_name_from_disposition, range_from, with_range, ResponseMeta};
pub use reader::{response_reader, ChunkReader, DEFAULT_CHUNK_SIZE};
