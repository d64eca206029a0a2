//! Reconstruction of thread text from paginated views, floor numbering and
//! ban/unban redaction.

mod thread;

pub use thread::{BanOutcome, ThreadContent, ViewOutcome};
