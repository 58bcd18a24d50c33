//! twin-pipeline — getting celebrity faces into the vector store and
//! finding them again.

pub mod dataset;
pub mod ingest;
pub mod matcher;

pub use dataset::{
    sample, DatasetEntry, DatasetError, DatasetRow, DatasetSource, FolderDataset, HubDataset, DEFAULT_SAMPLE_SIZE,
    DEFAULT_SEED,
};
pub use ingest::{run_ingest, IngestError, IngestOptions, IngestReport};
pub use matcher::{find_matches, MatchError, MatchOptions};
