use std::thread;

use serde::{Deserialize, Serialize};

use crate::error::StatsResult;
use crate::registry::{MetricsRegistry, now_millis};

/// Schema whose first live instance feeds client health snapshots.
pub const CACHE_PERF_SCHEMA_NAME: &str = "CachePerfStats";

/// Receives a health snapshot before every sample.
///
/// An error disables publishing for the rest of the sampler's life; the
/// archive is unaffected.
pub trait HealthPublisher: Send + Sync {
    fn publish(&self, stats: &ClientHealthStats) -> StatsResult<()>;
}

impl<F> HealthPublisher for F
where
    F: Fn(&ClientHealthStats) -> StatsResult<()> + Send + Sync,
{
    fn publish(&self, stats: &ClientHealthStats) -> StatsResult<()> {
        self(stats)
    }
}

/// Operation counters a client reports about itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientHealthStats {
    pub gets: i32,
    /// Puts plus creates.
    pub puts: i32,
    pub misses: i32,
    pub cache_listener_calls_completed: i32,
    pub processors: u32,
    pub collected_at_ms: i64,
}

impl ClientHealthStats {
    /// Reads the first live `CachePerfStats` instance. Counters stay zero when
    /// the schema, the instance or a statistic is missing.
    pub fn collect(registry: &MetricsRegistry) -> Self {
        let mut stats = Self {
            processors: thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(1),
            collected_at_ms: now_millis(),
            ..Self::default()
        };
        let Some(instance) = registry
            .find_schema(CACHE_PERF_SCHEMA_NAME)
            .and_then(|schema| registry.find_first_instance_by_schema(&schema))
        else {
            return stats;
        };
        let read = |name: &str| instance.get_int(name).unwrap_or(0);
        stats.gets = read("gets");
        stats.puts = read("puts").wrapping_add(read("creates"));
        stats.misses = read("misses");
        stats.cache_listener_calls_completed = read("cacheListenerCallsCompleted");
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::MetricDescriptor;

    #[test]
    fn collect_reads_cache_counters() {
        let registry = MetricsRegistry::default();
        let empty = ClientHealthStats::collect(&registry);
        assert_eq!(empty.puts, 0);
        assert!(empty.processors >= 1);

        let schema = registry
            .create_schema(
                CACHE_PERF_SCHEMA_NAME,
                "",
                vec![
                    MetricDescriptor::int_counter("gets", "", "operations", true),
                    MetricDescriptor::int_counter("puts", "", "operations", true),
                    MetricDescriptor::int_counter("creates", "", "operations", true),
                    MetricDescriptor::int_counter("misses", "", "operations", false),
                    MetricDescriptor::int_counter("cacheListenerCallsCompleted", "", "operations", true),
                ],
            )
            .unwrap();
        let inst = registry.create_atomic_instance(&schema, "cache", 1).unwrap();
        inst.inc_int("gets", 10).unwrap();
        inst.inc_int("puts", 4).unwrap();
        inst.inc_int("creates", 2).unwrap();
        inst.inc_int("misses", 1).unwrap();
        inst.inc_int("cacheListenerCallsCompleted", 3).unwrap();

        let stats = ClientHealthStats::collect(&registry);
        assert_eq!(stats.gets, 10);
        assert_eq!(stats.puts, 6);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.cache_listener_calls_completed, 3);
    }

    #[test]
    fn snapshot_serializes_only_collected_fields() {
        let value = serde_json::to_value(ClientHealthStats::default()).unwrap();
        let mut keys: Vec<&str> = value
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "cache_listener_calls_completed",
                "collected_at_ms",
                "gets",
                "misses",
                "processors",
                "puts",
            ]
        );
    }

    #[test]
    fn closures_are_publishers() {
        let publisher = |stats: &ClientHealthStats| -> StatsResult<()> {
            assert_eq!(stats.gets, 0);
            Ok(())
        };
        assert!(publisher.publish(&ClientHealthStats::default()).is_ok());
    }
}
