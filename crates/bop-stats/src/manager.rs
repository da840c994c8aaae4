use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::config::SamplerConfig;
use crate::error::{StatsError, StatsResult};
use crate::registry::{DEFAULT_REGISTRY_NAME, MetricsRegistry};
use crate::sampler::{SampleOutcome, Sampler, SamplerState};

/// Owns a process's metrics registry and, when sampling is enabled, the
/// sampler archiving it.
///
/// # Example
///
/// ```no_run
/// use bop_stats::{MetricDescriptor, SamplerConfig, StatsManager};
///
/// let manager = StatsManager::new(SamplerConfig::default())?;
/// let schema = manager.registry().create_schema(
///     "CachePerfStats",
///     "Cache operations",
///     vec![MetricDescriptor::int_counter("puts", "Completed puts", "operations", true)],
/// )?;
/// let cache = manager.registry().create_atomic_instance(&schema, "cache", 1)?;
/// cache.inc_int("puts", 1)?;
///
/// // The sampler takes a final sample when the manager is closed or dropped.
/// manager.close()?;
/// # Ok::<(), bop_stats::StatsError>(())
/// ```
pub struct StatsManager {
    registry: Arc<MetricsRegistry>,
    sampler: Mutex<Option<Sampler>>,
}

impl StatsManager {
    /// Creates the registry and starts a sampler when `config.enabled`.
    pub fn new(config: SamplerConfig) -> StatsResult<Self> {
        Self::with_registry(Arc::new(MetricsRegistry::new(DEFAULT_REGISTRY_NAME)), config)
    }

    pub fn with_registry(registry: Arc<MetricsRegistry>, config: SamplerConfig) -> StatsResult<Self> {
        let sampler = if config.enabled {
            let sampler = Sampler::new(Arc::clone(&registry), config)?;
            sampler.start()?;
            Some(sampler)
        } else {
            debug!("statistics sampling disabled; registry only");
            None
        };
        Ok(Self {
            registry,
            sampler: Mutex::new(sampler),
        })
    }

    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }

    /// Samples immediately. Fails when no sampler is running.
    pub fn force_sample(&self) -> StatsResult<SampleOutcome> {
        match self.sampler.lock().as_ref() {
            Some(sampler) => sampler.force_sample(),
            None => Err(StatsError::InvalidState("statistics sampling is disabled".into())),
        }
    }

    pub fn sampler_state(&self) -> Option<SamplerState> {
        self.sampler.lock().as_ref().map(Sampler::state)
    }

    /// Stops the sampler after a final sample. The registry stays usable.
    pub fn close(&self) -> StatsResult<()> {
        let Some(sampler) = self.sampler.lock().take() else {
            return Ok(());
        };
        sampler.stop()
    }
}

impl Drop for StatsManager {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            debug!(error = %err, "statistics manager close during drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::archive::{ArchiveReader, ArchiveRecord};
    use crate::descriptor::MetricDescriptor;

    #[test]
    fn disabled_manager_has_no_sampler() {
        let manager = StatsManager::new(SamplerConfig {
            enabled: false,
            ..SamplerConfig::default()
        })
        .unwrap();
        assert!(manager.sampler_state().is_none());
        assert!(matches!(manager.force_sample(), Err(StatsError::InvalidState(_))));
        manager.close().unwrap();
    }

    #[test]
    fn disabled_manager_does_not_retain_closed_instances() {
        let manager = StatsManager::new(SamplerConfig {
            enabled: false,
            ..SamplerConfig::default()
        })
        .unwrap();
        let registry = manager.registry();
        assert!(!registry.is_archiving());
        let schema = registry
            .create_schema(
                "RegionStats",
                "",
                vec![MetricDescriptor::int_counter("entries", "", "entries", true)],
            )
            .unwrap();
        for id in 0..1000 {
            let inst = registry
                .create_atomic_instance(&schema, &format!("region-{id}"), id)
                .unwrap();
            inst.inc_int("entries", 1).unwrap();
            inst.close();
        }
        assert_eq!(registry.instance_count(), 0);
        let lists = registry.lock_lists();
        assert!(lists.live.is_empty());
        assert!(lists.newly_added.is_empty());
    }

    #[test]
    fn close_leaves_a_readable_archive() {
        let dir = TempDir::new().unwrap();
        let manager = StatsManager::new(SamplerConfig {
            archive_path: dir.path().join("manager.gfs"),
            sample_interval_ms: 60_000,
            ..SamplerConfig::default()
        })
        .unwrap();
        assert_eq!(manager.sampler_state(), Some(SamplerState::Running));
        manager.force_sample().unwrap();
        assert!(manager.registry().is_archiving());
        manager.close().unwrap();
        assert!(manager.sampler_state().is_none());
        assert!(!manager.registry().is_archiving());

        let path = dir
            .path()
            .join(format!("manager-{}.gfs", manager.registry().process_id()));
        let records = ArchiveReader::read_all(&path).unwrap();
        let samples = records
            .iter()
            .filter(|r| matches!(r, ArchiveRecord::Sample { .. }))
            .count();
        assert_eq!(samples, 2);
    }
}
