//! Breakwater archive: the record schema shared by the proxy core and the
//! archivist service.
//!
//! Responsibilities:
//! - the versioned thread-record schema and its binary wire format
//! - length-prefixed, type-tagged framing over the archivist socket
//! - the monotonic merge rule for placeholder-bearing line buffers
//! - the compact article-ID encoding used to name archive files

mod aid;
mod record;
mod wire;

pub use aid::{board_and_filename, compact_id, ArticleId};
pub use record::{ThreadRecord, LINE_PLACEHOLDER};
pub use wire::{
    decode_thread_record, encode_thread_record, read_frame, write_frame, Frame, WireError,
    FRAME_TYPE_THREAD, RECORD_VERSION,
};
