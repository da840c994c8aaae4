//! Binary statistics archive.
//!
//! An archive is a stream of records: one header, then resource type
//! definitions, instance create and delete records, and samples. Samples are
//! delta encoded against the previous sample of the same file, so a reader
//! must replay a file from its start.
//!
//! - [`format`]: tokens and primitive codecs
//! - [`ArchiveBuffer`]: staging buffer with typed big-endian writes
//! - [`ArchiveHeader`]: process and host metadata
//! - [`ArchiveWriter`]: encodes registry state
//! - [`ArchiveReader`] and [`ArchiveReplay`]: decoding and value reconstruction

pub mod format;
mod header;
mod output;
mod reader;
mod writer;

pub use header::ArchiveHeader;
pub use output::ArchiveBuffer;
pub use reader::{
    ArchiveReader, ArchiveRecord, ArchiveReplay, DescriptorRecord, InstanceSample,
    ReplayedInstance,
};
pub use writer::{ArchiveWriter, ResourceInstance, ResourceType};
