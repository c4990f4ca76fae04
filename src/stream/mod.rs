//! NDJSON streaming: line splitting, the batched loader and record grouping

mod group;
mod lines;
mod loader;

pub(crate) use group::group_counts;
pub(crate) use loader::{
    FlushContext, LoadObserver, LoadStatus, StreamBatch, StreamLoader, StreamOptions, YieldPolicy,
};
