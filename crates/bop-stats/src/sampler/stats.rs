use std::sync::Arc;
use std::time::Duration;

use crate::descriptor::MetricDescriptor;
use crate::error::StatsResult;
use crate::instance::MetricInstance;
use crate::registry::MetricsRegistry;

pub const SAMPLER_SCHEMA_NAME: &str = "StatSampler";

const SAMPLE_COUNT: &str = "sampleCount";
const SAMPLE_TIME: &str = "sampleTime";
const ROLLED_FILES: &str = "rolledFiles";
const DELETED_FILES: &str = "deletedFiles";
const SAMPLE_FAILURES: &str = "sampleFailures";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplerStatsSnapshot {
    pub sample_count: i32,
    pub sample_time_ms: i64,
    pub rolled_files: i32,
    pub deleted_files: i32,
    pub sample_failures: i32,
}

/// The sampler's own statistics, archived like any other instance.
///
/// Each slot has one writer at a time: sample, roll and delete counters
/// change under the session lock, and failures are counted only by the
/// sampler thread. The instance therefore uses exclusive storage.
#[derive(Debug)]
pub struct SamplerStats {
    instance: Arc<MetricInstance>,
    sample_count: u32,
    sample_time: u32,
    rolled_files: u32,
    deleted_files: u32,
    sample_failures: u32,
}

impl SamplerStats {
    pub fn register(registry: &MetricsRegistry) -> StatsResult<Self> {
        let schema = registry.find_or_create_schema(
            SAMPLER_SCHEMA_NAME,
            "Stats on the statistic sampler.",
            vec![
                MetricDescriptor::int_counter(
                    SAMPLE_COUNT,
                    "Total number of samples taken by this sampler.",
                    "samples",
                    false,
                ),
                MetricDescriptor::long_counter(
                    SAMPLE_TIME,
                    "Total amount of time spent taking samples.",
                    "milliseconds",
                    false,
                ),
                MetricDescriptor::int_counter(
                    ROLLED_FILES,
                    "Archive files closed because they reached the file size limit.",
                    "files",
                    false,
                ),
                MetricDescriptor::int_counter(
                    DELETED_FILES,
                    "Rolled archive files removed to respect the disk space limit.",
                    "files",
                    false,
                ),
                MetricDescriptor::int_counter(
                    SAMPLE_FAILURES,
                    "Samples that failed to reach the archive.",
                    "samples",
                    false,
                ),
            ],
        )?;
        let instance = registry.create_exclusive_instance(&schema, "statSampler", 0)?;
        Ok(Self {
            sample_count: schema.name_to_id(SAMPLE_COUNT)?,
            sample_time: schema.name_to_id(SAMPLE_TIME)?,
            rolled_files: schema.name_to_id(ROLLED_FILES)?,
            deleted_files: schema.name_to_id(DELETED_FILES)?,
            sample_failures: schema.name_to_id(SAMPLE_FAILURES)?,
            instance,
        })
    }

    #[inline]
    pub fn instance(&self) -> &Arc<MetricInstance> {
        &self.instance
    }

    pub fn record_sample(&self, elapsed: Duration) -> StatsResult<()> {
        self.instance.inc_int(self.sample_count, 1)?;
        self.instance
            .inc_long(self.sample_time, elapsed.as_millis() as i64)?;
        Ok(())
    }

    pub fn record_rolled(&self) -> StatsResult<()> {
        self.instance.inc_int(self.rolled_files, 1).map(drop)
    }

    pub fn record_deleted(&self, count: usize) -> StatsResult<()> {
        self.instance
            .inc_int(self.deleted_files, count as i32)
            .map(drop)
    }

    pub fn record_failure(&self) -> StatsResult<()> {
        self.instance.inc_int(self.sample_failures, 1).map(drop)
    }

    pub fn snapshot(&self) -> SamplerStatsSnapshot {
        SamplerStatsSnapshot {
            sample_count: self.instance.get_int(self.sample_count).unwrap_or(0),
            sample_time_ms: self.instance.get_long(self.sample_time).unwrap_or(0),
            rolled_files: self.instance.get_int(self.rolled_files).unwrap_or(0),
            deleted_files: self.instance.get_int(self.deleted_files).unwrap_or(0),
            sample_failures: self.instance.get_int(self.sample_failures).unwrap_or(0),
        }
    }

    pub fn close(&self) {
        self.instance.close();
    }
}
