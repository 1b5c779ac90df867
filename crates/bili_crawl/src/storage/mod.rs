mod merge;
mod record;
mod writer;

pub use merge::{MergeSummary, merge_stores, read_bvids};
pub use record::{BvidRow, VideoRecord};
pub use writer::{AppendOutcome, RecordWriter};
