use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::descriptor::{MetricDescriptor, MetricKind};
use crate::error::{StatsError, StatsResult};
use crate::schema::MetricSchema;
use crate::storage::{MetricStorage, StorageOps};

/// Ways of addressing a statistic on an instance.
#[derive(Debug, Clone, Copy)]
pub enum MetricRef<'a> {
    Name(&'a str),
    Descriptor(&'a MetricDescriptor),
    /// Raw per-kind storage offset, as returned by `name_to_id`.
    Offset(u32),
}

impl<'a> From<&'a str> for MetricRef<'a> {
    fn from(name: &'a str) -> Self {
        MetricRef::Name(name)
    }
}

impl<'a> From<&'a String> for MetricRef<'a> {
    fn from(name: &'a String) -> Self {
        MetricRef::Name(name.as_str())
    }
}

impl<'a> From<&'a MetricDescriptor> for MetricRef<'a> {
    fn from(descriptor: &'a MetricDescriptor) -> Self {
        MetricRef::Descriptor(descriptor)
    }
}

impl From<u32> for MetricRef<'_> {
    fn from(offset: u32) -> Self {
        MetricRef::Offset(offset)
    }
}

/// A live set of values for one schema.
///
/// Instances are created through
/// [`MetricsRegistry`](crate::registry::MetricsRegistry) and shared as `Arc`.
/// Once closed, writes are dropped and reads return zero; the archive pass
/// writes a delete record and the registry forgets the instance.
pub struct MetricInstance {
    schema: Arc<MetricSchema>,
    text_id: String,
    numeric_id: i64,
    unique_id: i64,
    closed: AtomicBool,
    storage: MetricStorage,
}

impl fmt::Debug for MetricInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricInstance")
            .field("schema", &self.schema.name())
            .field("text_id", &self.text_id)
            .field("numeric_id", &self.numeric_id)
            .field("unique_id", &self.unique_id)
            .field("closed", &self.is_closed())
            .field("atomic", &self.is_atomic())
            .finish()
    }
}

impl MetricInstance {
    pub(crate) fn new(
        schema: Arc<MetricSchema>,
        text_id: String,
        numeric_id: i64,
        unique_id: i64,
        atomic: bool,
    ) -> Self {
        let storage = MetricStorage::new(&schema, atomic);
        Self {
            schema,
            text_id,
            numeric_id,
            unique_id,
            closed: AtomicBool::new(false),
            storage,
        }
    }

    #[inline]
    pub fn schema(&self) -> &Arc<MetricSchema> {
        &self.schema
    }

    #[inline]
    pub fn text_id(&self) -> &str {
        &self.text_id
    }

    #[inline]
    pub fn numeric_id(&self) -> i64 {
        self.numeric_id
    }

    #[inline]
    pub fn unique_id(&self) -> i64 {
        self.unique_id
    }

    #[inline]
    pub fn is_atomic(&self) -> bool {
        self.storage.is_atomic()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Marks the instance closed. Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn name_to_descriptor(&self, name: &str) -> StatsResult<&MetricDescriptor> {
        self.schema.name_to_descriptor(name)
    }

    pub fn name_to_id(&self, name: &str) -> StatsResult<u32> {
        self.schema.name_to_id(name)
    }

    fn resolve(&self, metric: MetricRef<'_>, kind: MetricKind) -> StatsResult<usize> {
        let offset = match metric {
            MetricRef::Name(name) => self.schema.name_to_descriptor(name)?.check_kind(kind)?,
            MetricRef::Descriptor(descriptor) => self
                .schema
                .descriptor(descriptor.index() as usize)
                .filter(|own| *own == descriptor)
                .ok_or_else(|| StatsError::UnknownStatistic(descriptor.name().to_string()))?
                .check_kind(kind)?,
            MetricRef::Offset(offset) => offset,
        };
        if offset >= self.schema.count_of(kind) {
            return Err(StatsError::InvalidOffset { kind, offset });
        }
        Ok(offset as usize)
    }

    pub fn set_int<'a>(&self, metric: impl Into<MetricRef<'a>>, value: i32) -> StatsResult<()> {
        if self.is_closed() {
            return Ok(());
        }
        let offset = self.resolve(metric.into(), MetricKind::Int32)?;
        self.storage.set_int(offset, value);
        Ok(())
    }

    pub fn set_long<'a>(&self, metric: impl Into<MetricRef<'a>>, value: i64) -> StatsResult<()> {
        if self.is_closed() {
            return Ok(());
        }
        let offset = self.resolve(metric.into(), MetricKind::Int64)?;
        self.storage.set_long(offset, value);
        Ok(())
    }

    pub fn set_double<'a>(&self, metric: impl Into<MetricRef<'a>>, value: f64) -> StatsResult<()> {
        if self.is_closed() {
            return Ok(());
        }
        let offset = self.resolve(metric.into(), MetricKind::Float64)?;
        self.storage.set_double(offset, value);
        Ok(())
    }

    pub fn get_int<'a>(&self, metric: impl Into<MetricRef<'a>>) -> StatsResult<i32> {
        if self.is_closed() {
            return Ok(0);
        }
        let offset = self.resolve(metric.into(), MetricKind::Int32)?;
        Ok(self.storage.get_int(offset))
    }

    pub fn get_long<'a>(&self, metric: impl Into<MetricRef<'a>>) -> StatsResult<i64> {
        if self.is_closed() {
            return Ok(0);
        }
        let offset = self.resolve(metric.into(), MetricKind::Int64)?;
        Ok(self.storage.get_long(offset))
    }

    pub fn get_double<'a>(&self, metric: impl Into<MetricRef<'a>>) -> StatsResult<f64> {
        if self.is_closed() {
            return Ok(0.0);
        }
        let offset = self.resolve(metric.into(), MetricKind::Float64)?;
        Ok(self.storage.get_double(offset))
    }

    /// Adds `delta` and returns the new value, or 0 when closed.
    pub fn inc_int<'a>(&self, metric: impl Into<MetricRef<'a>>, delta: i32) -> StatsResult<i32> {
        if self.is_closed() {
            return Ok(0);
        }
        let offset = self.resolve(metric.into(), MetricKind::Int32)?;
        Ok(self.storage.inc_int(offset, delta))
    }

    pub fn inc_long<'a>(&self, metric: impl Into<MetricRef<'a>>, delta: i64) -> StatsResult<i64> {
        if self.is_closed() {
            return Ok(0);
        }
        let offset = self.resolve(metric.into(), MetricKind::Int64)?;
        Ok(self.storage.inc_long(offset, delta))
    }

    pub fn inc_double<'a>(
        &self,
        metric: impl Into<MetricRef<'a>>,
        delta: f64,
    ) -> StatsResult<f64> {
        if self.is_closed() {
            return Ok(0.0);
        }
        let offset = self.resolve(metric.into(), MetricKind::Float64)?;
        Ok(self.storage.inc_double(offset, delta))
    }

    /// Current value of `descriptor` as a 64-bit pattern, 0 when closed.
    ///
    /// Ints are sign-extended and doubles are bit-cast, which is the form the
    /// archive computes deltas over.
    pub fn get_raw_bits(&self, descriptor: &MetricDescriptor) -> i64 {
        if self.is_closed() {
            return 0;
        }
        let kind = descriptor.kind();
        let offset = descriptor.offset() as usize;
        if offset >= self.storage.len(kind) {
            return 0;
        }
        self.storage.raw_bits(kind, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::build_schema;

    fn instance(atomic: bool) -> MetricInstance {
        let schema = build_schema(
            "CachePerfStats",
            "",
            vec![
                MetricDescriptor::int_counter("puts", "", "operations", true),
                MetricDescriptor::long_counter("putTime", "", "nanoseconds", false),
                MetricDescriptor::double_gauge("hitRatio", "", "ratio", true),
            ],
        )
        .expect("schema");
        MetricInstance::new(Arc::new(schema), "region-a".into(), 7, 1, atomic)
    }

    #[test]
    fn name_descriptor_and_offset_address_the_same_slot() {
        let inst = instance(true);
        inst.inc_int("puts", 2).unwrap();
        let descriptor = inst.name_to_descriptor("puts").unwrap().clone();
        inst.inc_int(&descriptor, 3).unwrap();
        let offset = inst.name_to_id("puts").unwrap();
        assert_eq!(inst.inc_int(offset, 1).unwrap(), 6);
        assert_eq!(inst.get_int("puts").unwrap(), 6);
    }

    #[test]
    fn wrong_kind_is_rejected() {
        let inst = instance(false);
        let err = inst.inc_int("putTime", 1).unwrap_err();
        assert!(matches!(
            err,
            StatsError::WrongKind {
                actual: MetricKind::Int64,
                expected: MetricKind::Int32,
                ..
            }
        ));
        assert!(matches!(
            inst.get_long("nope"),
            Err(StatsError::UnknownStatistic(_))
        ));
        assert!(matches!(
            inst.set_double(5u32, 1.0),
            Err(StatsError::InvalidOffset { offset: 5, .. })
        ));
    }

    #[test]
    fn descriptors_of_another_schema_are_rejected() {
        let inst = instance(true);
        let other = build_schema(
            "RegionStats",
            "",
            vec![MetricDescriptor::int_counter("entries", "", "entries", true)],
        )
        .expect("schema");
        let foreign = &other.descriptors()[0];
        assert!(matches!(
            inst.inc_int(foreign, 7),
            Err(StatsError::UnknownStatistic(name)) if name == "entries"
        ));
        assert!(matches!(
            inst.get_int(foreign),
            Err(StatsError::UnknownStatistic(_))
        ));
        assert_eq!(inst.get_int("puts").unwrap(), 0);
    }

    #[test]
    fn closed_instance_ignores_writes_and_reads_zero() {
        let inst = instance(true);
        inst.set_long("putTime", 100).unwrap();
        inst.close();
        inst.close();
        assert!(inst.is_closed());
        inst.set_long("putTime", 5).unwrap();
        assert_eq!(inst.get_long("putTime").unwrap(), 0);
        assert_eq!(inst.inc_int("puts", 1).unwrap(), 0);
        // Unresolvable names are not checked once closed.
        assert_eq!(inst.get_int("missing").unwrap(), 0);
        let descriptor = inst.schema().descriptor(1).unwrap().clone();
        assert_eq!(inst.get_raw_bits(&descriptor), 0);
    }

    #[test]
    fn raw_bits_follow_kind() {
        let inst = instance(false);
        inst.set_int("puts", -3).unwrap();
        inst.set_double("hitRatio", 0.5).unwrap();
        let schema = inst.schema().clone();
        assert_eq!(inst.get_raw_bits(&schema.descriptors()[0]), -3);
        assert_eq!(
            inst.get_raw_bits(&schema.descriptors()[2]),
            0.5f64.to_bits() as i64
        );
    }
}
