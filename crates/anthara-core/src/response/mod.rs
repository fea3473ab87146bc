mod aggregator;
pub mod postprocess;

pub use aggregator::{StreamAggregator, StreamState};
pub use postprocess::{extract_related, process, rewrite_citations, Extracted, Processed};
