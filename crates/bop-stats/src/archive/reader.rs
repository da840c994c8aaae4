//! Decoder for archive files.
//!
//! Used to verify what the sampler wrote and to inspect archives by hand; it
//! reconstructs records and running values, nothing more.

use std::collections::BTreeMap;
use std::fs;
use std::io::Cursor;
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt};

use super::format::{
    HEADER_TOKEN, ILLEGAL_RESOURCE_INST_ID, ILLEGAL_STAT_OFFSET, RESOURCE_INSTANCE_CREATE_TOKEN,
    RESOURCE_INSTANCE_DELETE_TOKEN, RESOURCE_TYPE_TOKEN, SAMPLE_TOKEN, read_compact_value,
    read_resource_inst_id, read_timestamp_delta, read_utf,
};
use super::header::ArchiveHeader;
use crate::descriptor::MetricKind;
use crate::error::{StatsError, StatsResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorRecord {
    pub name: String,
    pub kind: MetricKind,
    pub is_counter: bool,
    pub is_larger_better: bool,
    pub unit: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSample {
    pub instance_id: i32,
    /// `(descriptor index, delta)` pairs in the order written.
    pub deltas: Vec<(u8, i64)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveRecord {
    Header(ArchiveHeader),
    ResourceType {
        type_id: i32,
        name: String,
        description: String,
        descriptors: Vec<DescriptorRecord>,
    },
    InstanceCreate {
        instance_id: i32,
        text_id: String,
        numeric_id: i64,
        type_id: i32,
    },
    InstanceDelete {
        instance_id: i32,
    },
    Sample {
        timestamp_delta_ms: i64,
        instances: Vec<InstanceSample>,
    },
}

/// Iterates the records of an archive held in memory.
///
/// Iteration stops after the first decoding error.
pub struct ArchiveReader {
    cursor: Cursor<Vec<u8>>,
    failed: bool,
}

impl ArchiveReader {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            cursor: Cursor::new(bytes),
            failed: false,
        }
    }

    pub fn open(path: impl AsRef<Path>) -> StatsResult<Self> {
        Ok(Self::from_bytes(fs::read(path)?))
    }

    /// Decodes every record of the file at `path`.
    pub fn read_all(path: impl AsRef<Path>) -> StatsResult<Vec<ArchiveRecord>> {
        Self::open(path)?.collect()
    }

    fn remaining(&self) -> usize {
        let len = self.cursor.get_ref().len() as u64;
        len.saturating_sub(self.cursor.position()) as usize
    }

    fn read_record(&mut self) -> StatsResult<ArchiveRecord> {
        let input = &mut self.cursor;
        let token = input.read_u8()?;
        match token {
            HEADER_TOKEN => Ok(ArchiveRecord::Header(ArchiveHeader::decode_body(input)?)),
            RESOURCE_TYPE_TOKEN => {
                let type_id = input.read_i32::<BigEndian>()?;
                let name = read_utf(input)?;
                let description = read_utf(input)?;
                let count = input.read_i16::<BigEndian>()?;
                if count < 0 {
                    return Err(StatsError::corruption(format!(
                        "type {name:?} declares {count} statistics"
                    )));
                }
                let mut descriptors = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    descriptors.push(DescriptorRecord {
                        name: read_utf(input)?,
                        kind: MetricKind::from_type_code(input.read_u8()?)?,
                        is_counter: input.read_u8()? != 0,
                        is_larger_better: input.read_u8()? != 0,
                        unit: read_utf(input)?,
                        description: read_utf(input)?,
                    });
                }
                Ok(ArchiveRecord::ResourceType {
                    type_id,
                    name,
                    description,
                    descriptors,
                })
            }
            RESOURCE_INSTANCE_CREATE_TOKEN => Ok(ArchiveRecord::InstanceCreate {
                instance_id: input.read_i32::<BigEndian>()?,
                text_id: read_utf(input)?,
                numeric_id: input.read_i64::<BigEndian>()?,
                type_id: input.read_i32::<BigEndian>()?,
            }),
            RESOURCE_INSTANCE_DELETE_TOKEN => Ok(ArchiveRecord::InstanceDelete {
                instance_id: input.read_i32::<BigEndian>()?,
            }),
            SAMPLE_TOKEN => {
                let timestamp_delta_ms = read_timestamp_delta(input)?;
                let mut instances = Vec::new();
                loop {
                    let instance_id = read_resource_inst_id(input)?;
                    if instance_id == ILLEGAL_RESOURCE_INST_ID {
                        break;
                    }
                    let mut deltas = Vec::new();
                    loop {
                        let index = input.read_u8()?;
                        if index == ILLEGAL_STAT_OFFSET {
                            break;
                        }
                        deltas.push((index, read_compact_value(input)?));
                    }
                    instances.push(InstanceSample {
                        instance_id,
                        deltas,
                    });
                }
                Ok(ArchiveRecord::Sample {
                    timestamp_delta_ms,
                    instances,
                })
            }
            other => Err(StatsError::corruption(format!(
                "unknown record token {other} at offset {}",
                input.position() - 1
            ))),
        }
    }
}

impl Iterator for ArchiveReader {
    type Item = StatsResult<ArchiveRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining() == 0 {
            return None;
        }
        let record = self.read_record();
        if record.is_err() {
            self.failed = true;
        }
        Some(record)
    }
}

#[derive(Debug, Clone)]
pub struct ReplayedInstance {
    pub text_id: String,
    pub numeric_id: i64,
    pub type_id: i32,
    /// Raw bit patterns by descriptor index.
    pub values: Vec<i64>,
}

/// Running state rebuilt by applying records in order.
#[derive(Debug, Default)]
pub struct ArchiveReplay {
    pub header: Option<ArchiveHeader>,
    pub types: BTreeMap<i32, (String, Vec<DescriptorRecord>)>,
    pub instances: BTreeMap<i32, ReplayedInstance>,
    pub elapsed_ms: i64,
    pub samples: usize,
}

impl ArchiveReplay {
    pub fn from_records<'a>(
        records: impl IntoIterator<Item = &'a ArchiveRecord>,
    ) -> StatsResult<Self> {
        let mut replay = Self::default();
        for record in records {
            replay.apply(record)?;
        }
        Ok(replay)
    }

    pub fn apply(&mut self, record: &ArchiveRecord) -> StatsResult<()> {
        match record {
            ArchiveRecord::Header(header) => self.header = Some(header.clone()),
            ArchiveRecord::ResourceType {
                type_id,
                name,
                descriptors,
                ..
            } => {
                self.types
                    .insert(*type_id, (name.clone(), descriptors.clone()));
            }
            ArchiveRecord::InstanceCreate {
                instance_id,
                text_id,
                numeric_id,
                type_id,
            } => {
                let (_, descriptors) = self.types.get(type_id).ok_or_else(|| {
                    StatsError::corruption(format!("instance {instance_id} of unknown type {type_id}"))
                })?;
                self.instances.insert(
                    *instance_id,
                    ReplayedInstance {
                        text_id: text_id.clone(),
                        numeric_id: *numeric_id,
                        type_id: *type_id,
                        values: vec![0; descriptors.len()],
                    },
                );
            }
            ArchiveRecord::InstanceDelete { instance_id } => {
                self.instances.remove(instance_id);
            }
            ArchiveRecord::Sample {
                timestamp_delta_ms,
                instances,
            } => {
                self.elapsed_ms += timestamp_delta_ms;
                self.samples += 1;
                for sample in instances {
                    let instance = self.instances.get_mut(&sample.instance_id).ok_or_else(|| {
                        StatsError::corruption(format!(
                            "sample for unknown instance {}",
                            sample.instance_id
                        ))
                    })?;
                    for &(index, delta) in &sample.deltas {
                        let slot = instance.values.get_mut(index as usize).ok_or_else(|| {
                            StatsError::corruption(format!(
                                "descriptor index {index} out of range for instance {}",
                                sample.instance_id
                            ))
                        })?;
                        *slot = slot.wrapping_add(delta);
                    }
                }
            }
        }
        Ok(())
    }

    /// Current raw value of the named statistic of the instance with
    /// `text_id`, interpreted according to its kind.
    pub fn value(&self, text_id: &str, stat: &str) -> Option<f64> {
        let instance = self.instances.values().find(|i| i.text_id == text_id)?;
        let (_, descriptors) = self.types.get(&instance.type_id)?;
        let index = descriptors.iter().position(|d| d.name == stat)?;
        let raw = instance.values[index];
        Some(match descriptors[index].kind {
            MetricKind::Int32 | MetricKind::Int64 => raw as f64,
            MetricKind::Float64 => f64::from_bits(raw as u64),
        })
    }
}
