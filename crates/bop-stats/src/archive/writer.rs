//! Encodes registry state into archive records.
//!
//! One [`ArchiveWriter`] exists per archive file. It assigns file-local type
//! and instance ids, remembers the last archived raw value of every
//! descriptor, and emits only what changed since the previous sample.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::warn;

use super::format::{
    ILLEGAL_RESOURCE_INST_ID, ILLEGAL_STAT_OFFSET, RESOURCE_INSTANCE_CREATE_TOKEN,
    RESOURCE_INSTANCE_DELETE_TOKEN, RESOURCE_TYPE_TOKEN, SAMPLE_TOKEN, write_compact_value,
    write_resource_inst_id, write_timestamp_delta,
};
use super::header::ArchiveHeader;
use super::output::ArchiveBuffer;
use crate::error::StatsResult;
use crate::instance::MetricInstance;
use crate::registry::MetricsRegistry;
use crate::schema::{MetricSchema, SchemaId};

/// A schema that has been described in the current file.
#[derive(Debug)]
pub struct ResourceType {
    id: i32,
    schema: Arc<MetricSchema>,
}

impl ResourceType {
    #[inline]
    pub fn id(&self) -> i32 {
        self.id
    }

    #[inline]
    pub fn schema(&self) -> &Arc<MetricSchema> {
        &self.schema
    }
}

/// Per-file archive state of one instance.
#[derive(Debug)]
pub struct ResourceInstance {
    id: i32,
    type_id: i32,
    instance: Arc<MetricInstance>,
    last_values: Vec<i64>,
    first_sample: bool,
}

impl ResourceInstance {
    #[inline]
    pub fn id(&self) -> i32 {
        self.id
    }

    #[inline]
    pub fn type_id(&self) -> i32 {
        self.type_id
    }

    #[inline]
    pub fn instance(&self) -> &Arc<MetricInstance> {
        &self.instance
    }

    /// Appends this instance's changed values; writes nothing when no value
    /// moved. The first sample after creation writes every descriptor.
    fn write_sample(&mut self, out: &mut ArchiveBuffer) -> StatsResult<()> {
        if self.instance.is_closed() {
            return Ok(());
        }
        let check_for_change = !self.first_sample;
        self.first_sample = false;

        let mut wrote_id = false;
        for descriptor in self.instance.schema().descriptors() {
            let slot = descriptor.index() as usize;
            let value = self.instance.get_raw_bits(descriptor);
            let previous = self.last_values[slot];
            if check_for_change && value == previous {
                continue;
            }
            self.last_values[slot] = value;
            if !wrote_id {
                wrote_id = true;
                write_resource_inst_id(out, self.id)?;
            }
            out.write_byte(descriptor.index());
            write_compact_value(out, value.wrapping_sub(previous))?;
        }
        if wrote_id {
            out.write_byte(ILLEGAL_STAT_OFFSET);
        }
        Ok(())
    }
}

pub struct ArchiveWriter {
    out: ArchiveBuffer,
    types: BTreeMap<SchemaId, ResourceType>,
    instances: BTreeMap<i64, ResourceInstance>,
    next_type_id: i32,
    next_instance_id: i32,
    previous_sample: Instant,
    last_sample_size: usize,
}

impl ArchiveWriter {
    /// Starts a new file: encodes `header` and takes `now` as the timestamp
    /// base of the first sample.
    pub fn new(header: &ArchiveHeader, now: Instant) -> StatsResult<Self> {
        let mut out = ArchiveBuffer::new();
        header.encode(&mut out)?;
        Ok(Self {
            out,
            types: BTreeMap::new(),
            instances: BTreeMap::new(),
            next_type_id: 0,
            next_instance_id: 0,
            previous_sample: now,
            last_sample_size: 0,
        })
    }

    /// Bytes encoded since the last [`take_buffer`](Self::take_buffer).
    #[inline]
    pub fn buffered_len(&self) -> usize {
        self.out.len()
    }

    /// Drains the encoded bytes for writing to the file.
    pub fn take_buffer(&mut self) -> Vec<u8> {
        self.out.take()
    }

    /// Bytes produced by the most recent sample pass, including the create
    /// and delete records it emitted.
    #[inline]
    pub fn last_sample_size(&self) -> usize {
        self.last_sample_size
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Archive id assigned to the instance with `unique_id` in this file.
    pub fn archive_id_of(&self, unique_id: i64) -> Option<i32> {
        self.instances.get(&unique_id).map(ResourceInstance::id)
    }

    pub fn resource_types(&self) -> impl Iterator<Item = &ResourceType> {
        self.types.values()
    }

    pub fn resource_instances(&self) -> impl Iterator<Item = &ResourceInstance> {
        self.instances.values()
    }

    fn ensure_type(&mut self, schema: &Arc<MetricSchema>) -> StatsResult<i32> {
        if let Some(existing) = self.types.get(&schema.id()) {
            return Ok(existing.id);
        }
        let mark = self.out.len();
        if let Err(err) = self.encode_type(self.next_type_id, schema) {
            self.out.truncate(mark);
            return Err(err);
        }
        let id = self.next_type_id;
        self.next_type_id += 1;
        self.types.insert(
            schema.id(),
            ResourceType {
                id,
                schema: schema.clone(),
            },
        );
        Ok(id)
    }

    fn encode_type(&mut self, id: i32, schema: &MetricSchema) -> StatsResult<()> {
        let out = &mut self.out;
        out.write_byte(RESOURCE_TYPE_TOKEN);
        out.write_i32(id);
        out.write_utf(schema.name())?;
        out.write_utf(schema.description())?;
        out.write_i16(schema.descriptor_count() as i16);
        for descriptor in schema.descriptors() {
            out.write_utf(descriptor.name())?;
            out.write_byte(descriptor.kind().type_code());
            out.write_bool(descriptor.is_counter());
            out.write_bool(descriptor.is_larger_better());
            out.write_utf(descriptor.unit())?;
            out.write_utf(descriptor.description())?;
        }
        Ok(())
    }

    /// Adds `instance` to this file, describing its schema first if needed.
    ///
    /// Returns `Ok(false)` for closed or already registered instances. On
    /// error nothing about the instance is left in the buffer.
    pub fn register_instance(&mut self, instance: &Arc<MetricInstance>) -> StatsResult<bool> {
        if instance.is_closed() || self.instances.contains_key(&instance.unique_id()) {
            return Ok(false);
        }
        let type_id = self.ensure_type(instance.schema())?;
        let id = self.next_instance_id;

        let mark = self.out.len();
        self.out.write_byte(RESOURCE_INSTANCE_CREATE_TOKEN);
        self.out.write_i32(id);
        if let Err(err) = self.out.write_utf(instance.text_id()) {
            self.out.truncate(mark);
            return Err(err.into());
        }
        self.out.write_i64(instance.numeric_id());
        self.out.write_i32(type_id);

        self.next_instance_id += 1;
        self.instances.insert(
            instance.unique_id(),
            ResourceInstance {
                id,
                type_id,
                instance: instance.clone(),
                last_values: vec![0; instance.schema().descriptor_count()],
                first_sample: true,
            },
        );
        Ok(true)
    }

    /// Writes a delete record for `instance` if this file knows it.
    pub fn retire_instance(&mut self, instance: &MetricInstance) -> bool {
        match self.instances.remove(&instance.unique_id()) {
            Some(resource) => {
                self.out.write_byte(RESOURCE_INSTANCE_DELETE_TOKEN);
                self.out.write_i32(resource.id);
                true
            }
            None => false,
        }
    }

    fn register_or_skip(&mut self, instance: &Arc<MetricInstance>) {
        if let Err(err) = self.register_instance(instance) {
            warn!(
                schema = instance.schema().name(),
                text_id = instance.text_id(),
                error = %err,
                "statistics instance cannot be archived"
            );
        }
    }

    /// Describes every live instance of `registry`, used when a new file is
    /// started while instances already exist.
    pub fn describe_live(&mut self, registry: &MetricsRegistry) {
        let lists = registry.lock_lists();
        for instance in &lists.live {
            self.register_or_skip(instance);
        }
    }

    /// One archive pass over `registry`.
    ///
    /// Under the registry's list lock: newly added instances get create
    /// records, closed instances get delete records and leave both the
    /// registry and this writer, then a sample record carries the values
    /// that changed since the previous pass.
    ///
    /// Instances only reach the newly-added queue while an archiver is
    /// attached with [`MetricsRegistry::begin_archiving`]; instances that
    /// predate it are picked up by [`describe_live`](Self::describe_live).
    pub fn sample_registry(&mut self, registry: &MetricsRegistry, now: Instant) -> StatsResult<()> {
        let mut lists = registry.lock_lists();
        let start = self.out.len();

        let added = std::mem::take(&mut lists.newly_added);
        for instance in &added {
            self.register_or_skip(instance);
        }
        lists.live.retain(|instance| {
            if instance.is_closed() {
                self.retire_instance(instance);
                false
            } else {
                true
            }
        });

        self.out.write_byte(SAMPLE_TOKEN);
        let delta_ms = now.saturating_duration_since(self.previous_sample).as_millis();
        write_timestamp_delta(&mut self.out, i64::try_from(delta_ms).unwrap_or(i64::MAX))?;
        self.previous_sample = now;
        for resource in self.instances.values_mut() {
            resource.write_sample(&mut self.out)?;
        }
        write_resource_inst_id(&mut self.out, ILLEGAL_RESOURCE_INST_ID)?;

        self.last_sample_size = self.out.len() - start;
        Ok(())
    }
}
