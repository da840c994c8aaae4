//! Process metrics for BOP clients: a registry of typed statistics and a
//! background sampler that archives them to delta-encoded binary files.
//!
//! Applications describe statistics once with a [`MetricSchema`], create
//! [`MetricInstance`]s of it through a [`MetricsRegistry`] and update them
//! from any thread. A [`Sampler`] periodically writes every live instance to
//! an archive file in the `.gfs` statistics archive format, rolling files
//! and trimming old ones to stay within configured limits. [`ArchiveReader`]
//! decodes those files again.
//!
//! Slot storage stays internal; values are only reachable through an instance:
//!
//! ```compile_fail
//! use bop_stats::storage::MetricStorage;
//! ```

pub mod archive;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod instance;
pub mod registry;
pub mod sampler;
pub mod schema;
mod storage;
pub mod test_support;

mod manager;

pub use archive::{ArchiveHeader, ArchiveReader, ArchiveRecord, ArchiveReplay, ArchiveWriter};
pub use config::{FILE_SIZE_LIMIT_MAX, SamplerConfig};
pub use descriptor::{MetricDescriptor, MetricKind};
pub use error::{StatsError, StatsResult};
pub use instance::{MetricInstance, MetricRef};
pub use manager::StatsManager;
pub use registry::{DEFAULT_REGISTRY_NAME, MetricsRegistry};
pub use sampler::{
    ClientHealthStats, HealthPublisher, SampleOutcome, Sampler, SamplerState,
    SamplerStatsSnapshot,
};
pub use schema::{MAX_DESCRIPTORS_PER_SCHEMA, MetricSchema, SchemaId, build_schema};
