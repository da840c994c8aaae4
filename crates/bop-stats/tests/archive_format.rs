use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bop_stats::archive::format::{ILLEGAL_STAT_OFFSET, SAMPLE_TOKEN};
use bop_stats::archive::{ArchiveReplay, InstanceSample};
use bop_stats::{
    ArchiveHeader, ArchiveReader, ArchiveRecord, ArchiveWriter, MetricDescriptor, MetricSchema,
    MetricsRegistry,
};

fn cache_schema(registry: &MetricsRegistry) -> Arc<MetricSchema> {
    registry
        .create_schema(
            "CachePerfStats",
            "Statistics about cache operations",
            vec![
                MetricDescriptor::int_counter("puts", "Completed puts", "operations", true),
                MetricDescriptor::long_counter("putTime", "Time spent in puts", "nanoseconds", false),
                MetricDescriptor::double_gauge("hitRatio", "Hits over gets", "ratio", true),
            ],
        )
        .expect("schema")
}

fn archived_registry(name: &str) -> MetricsRegistry {
    let registry = MetricsRegistry::new(name);
    registry.begin_archiving();
    registry
}

fn writer(start: Instant) -> ArchiveWriter {
    let header = ArchiveHeader::capture(42, 1_000, "/var/stats", "archive-format-test");
    ArchiveWriter::new(&header, start).expect("writer")
}

fn decode(bytes: Vec<u8>) -> Vec<ArchiveRecord> {
    ArchiveReader::from_bytes(bytes)
        .collect::<Result<Vec<_>, _>>()
        .expect("decode")
}

fn samples(records: &[ArchiveRecord]) -> Vec<&Vec<InstanceSample>> {
    records
        .iter()
        .filter_map(|r| match r {
            ArchiveRecord::Sample { instances, .. } => Some(instances),
            _ => None,
        })
        .collect()
}

#[test]
fn concurrent_increments_are_all_archived() {
    let registry = archived_registry("concurrent");
    let schema = cache_schema(&registry);
    let cache = registry
        .create_atomic_instance(&schema, "cache", 1)
        .expect("instance");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for _ in 0..10_000 {
                    cache.inc_int("puts", 1).expect("inc puts");
                    cache.inc_long("putTime", 3).expect("inc putTime");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker");
    }
    assert_eq!(cache.get_int("puts").unwrap(), 80_000);

    let start = Instant::now();
    let mut writer = writer(start);
    writer
        .sample_registry(&registry, start + Duration::from_millis(1000))
        .unwrap();
    let records = decode(writer.take_buffer());
    let replay = ArchiveReplay::from_records(&records).unwrap();
    assert_eq!(replay.value("cache", "puts"), Some(80_000.0));
    assert_eq!(replay.value("cache", "putTime"), Some(240_000.0));
    assert_eq!(replay.elapsed_ms, 1000);
}

#[test]
fn header_survives_decoding() {
    let start = Instant::now();
    let mut writer = writer(start);
    let records = decode(writer.take_buffer());
    let [ArchiveRecord::Header(header)] = records.as_slice() else {
        panic!("expected a lone header, got {records:?}");
    };
    assert_eq!(header.process_id, 42);
    assert_eq!(header.process_start_ms, 1_000);
    assert_eq!(header.system_directory, "/var/stats");
    assert_eq!(header.product_description, "archive-format-test");
}

#[test]
fn unchanged_instances_are_absent_from_samples() {
    let registry = archived_registry("absent");
    let schema = cache_schema(&registry);
    let a = registry.create_atomic_instance(&schema, "A", 1).unwrap();
    let b = registry.create_atomic_instance(&schema, "B", 2).unwrap();
    a.inc_int("puts", 10).unwrap();

    let start = Instant::now();
    let mut writer = writer(start);
    writer.sample_registry(&registry, start).unwrap();

    a.inc_int("puts", 5).unwrap();
    writer
        .sample_registry(&registry, start + Duration::from_millis(1000))
        .unwrap();

    b.set_double("hitRatio", 0.25).unwrap();
    writer
        .sample_registry(&registry, start + Duration::from_millis(2000))
        .unwrap();

    let records = decode(writer.take_buffer());
    let samples = samples(&records);
    assert_eq!(samples.len(), 3);

    let a_id = writer.archive_id_of(a.unique_id()).unwrap();
    let b_id = writer.archive_id_of(b.unique_id()).unwrap();

    // First sample carries every descriptor of both instances.
    assert_eq!(samples[0].len(), 2);
    assert!(samples[0].iter().all(|s| s.deltas.len() == 3));

    assert_eq!(
        samples[1].as_slice(),
        &[InstanceSample {
            instance_id: a_id,
            deltas: vec![(0, 5)],
        }]
    );
    assert_eq!(samples[2].len(), 1);
    assert_eq!(samples[2][0].instance_id, b_id);
    assert_eq!(samples[2][0].deltas, vec![(2, 0.25f64.to_bits() as i64)]);

    let replay = ArchiveReplay::from_records(&records).unwrap();
    assert_eq!(replay.value("A", "puts"), Some(15.0));
    assert_eq!(replay.value("B", "hitRatio"), Some(0.25));
}

#[test]
fn closing_an_instance_writes_one_delete_record() {
    let registry = archived_registry("delete");
    let schema = cache_schema(&registry);
    let a = registry.create_atomic_instance(&schema, "A", 1).unwrap();
    let _b = registry.create_atomic_instance(&schema, "B", 2).unwrap();

    let start = Instant::now();
    let mut writer = writer(start);
    writer.sample_registry(&registry, start).unwrap();
    let a_id = writer.archive_id_of(a.unique_id()).unwrap();

    a.inc_int("puts", 1).unwrap();
    a.close();
    assert_eq!(a.get_int("puts").unwrap(), 0);
    for step in 1..=3 {
        writer
            .sample_registry(&registry, start + Duration::from_millis(step * 10))
            .unwrap();
    }

    let records = decode(writer.take_buffer());
    let deletes: Vec<_> = records
        .iter()
        .filter(|r| matches!(r, ArchiveRecord::InstanceDelete { .. }))
        .collect();
    assert_eq!(deletes, vec![&ArchiveRecord::InstanceDelete { instance_id: a_id }]);
    assert_eq!(registry.instance_count(), 1);
    assert!(registry.find_by_text_id("A").is_none());

    let replay = ArchiveReplay::from_records(&records).unwrap();
    assert!(replay.value("A", "puts").is_none());
    assert_eq!(replay.instances.len(), 1);
}

#[test]
fn quiet_period_writes_an_empty_sample() {
    let registry = archived_registry("quiet");
    let schema = cache_schema(&registry);
    registry.create_atomic_instance(&schema, "A", 1).unwrap();

    let start = Instant::now();
    let mut writer = writer(start);
    writer.sample_registry(&registry, start).unwrap();
    writer.take_buffer();

    writer
        .sample_registry(&registry, start + Duration::from_millis(250))
        .unwrap();
    let bytes = writer.take_buffer();
    assert_eq!(bytes, vec![SAMPLE_TOKEN, 0, 250, 255]);
    assert_eq!(writer.last_sample_size(), 4);
}

#[test]
fn long_gaps_and_negative_deltas_round_trip() {
    let registry = archived_registry("gaps");
    let schema = cache_schema(&registry);
    let a = registry.create_atomic_instance(&schema, "A", 1).unwrap();
    a.set_long("putTime", i64::MAX - 1).unwrap();

    let start = Instant::now();
    let mut writer = writer(start);
    writer.sample_registry(&registry, start).unwrap();

    a.set_long("putTime", -7).unwrap();
    a.set_int("puts", -130).unwrap();
    writer
        .sample_registry(&registry, start + Duration::from_secs(120))
        .unwrap();

    let records = decode(writer.take_buffer());
    let gaps: Vec<i64> = records
        .iter()
        .filter_map(|r| match r {
            ArchiveRecord::Sample {
                timestamp_delta_ms, ..
            } => Some(*timestamp_delta_ms),
            _ => None,
        })
        .collect();
    assert_eq!(gaps, vec![0, 120_000]);

    let replay = ArchiveReplay::from_records(&records).unwrap();
    assert_eq!(replay.value("A", "putTime"), Some(-7.0));
    assert_eq!(replay.value("A", "puts"), Some(-130.0));
}

#[test]
fn type_records_describe_every_statistic() {
    let registry = archived_registry("types");
    let schema = cache_schema(&registry);
    registry.create_atomic_instance(&schema, "A", 1).unwrap();
    registry.create_exclusive_instance(&schema, "B", 2).unwrap();

    let start = Instant::now();
    let mut writer = writer(start);
    writer.sample_registry(&registry, start).unwrap();
    let records = decode(writer.take_buffer());

    let types: Vec<_> = records
        .iter()
        .filter_map(|r| match r {
            ArchiveRecord::ResourceType {
                name, descriptors, ..
            } => Some((name.as_str(), descriptors)),
            _ => None,
        })
        .collect();
    assert_eq!(types.len(), 1, "one type record per schema per file");
    let (name, descriptors) = types[0];
    assert_eq!(name, "CachePerfStats");
    let names: Vec<&str> = descriptors.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["puts", "putTime", "hitRatio"]);
    assert!(descriptors[0].is_counter && !descriptors[2].is_counter);
    assert_eq!(descriptors[1].unit, "nanoseconds");
}

#[test]
fn truncated_archive_reports_corruption() {
    let registry = archived_registry("truncated");
    let schema = cache_schema(&registry);
    registry.create_atomic_instance(&schema, "A", 1).unwrap();

    let start = Instant::now();
    let mut writer = writer(start);
    writer.sample_registry(&registry, start).unwrap();
    let mut bytes = writer.take_buffer();
    assert_eq!(bytes.last(), Some(&255));
    bytes.truncate(bytes.len() - 2);
    assert_ne!(bytes.last(), Some(&ILLEGAL_STAT_OFFSET));

    let results: Vec<_> = ArchiveReader::from_bytes(bytes).collect();
    assert!(results.last().unwrap().is_err());
    assert!(results[..results.len() - 1].iter().all(|r| r.is_ok()));
}
