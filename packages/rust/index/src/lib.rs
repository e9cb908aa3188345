//! Index feed access: the line decoder and the paginating reader.
//!
//! The feed serves newline-delimited flat JSON objects, one per published
//! package version, ordered by their `Timestamp` field. A page is requested
//! with `?limit=N&since=<cursor>`; an empty body means the feed has nothing
//! newer than the cursor. The feed rate-limits aggressively, so every request
//! runs under the reader's [`Backoff`](modcrawl_shared::Backoff).

pub mod decoder;
pub mod reader;

pub use decoder::{IndexEntryRef, MIN_RECORD_LEN, Records, decode, decode_line, records};
pub use reader::{IndexReader, Page, ReaderState};
