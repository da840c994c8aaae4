use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt::{self, Display};

use crate::descriptor::{MetricDescriptor, MetricKind};
use crate::error::{StatsError, StatsResult};

/// Largest number of descriptors a schema may hold.
///
/// Sample records address descriptors with a single byte and reserve 255 as
/// the end-of-instance marker.
pub const MAX_DESCRIPTORS_PER_SCHEMA: usize = 254;

/// Index of a schema inside its registry's schema table.
///
/// Ids are dense and assigned in registration order; a schema built with
/// [`build_schema`] and never registered carries [`SchemaId::DETACHED`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchemaId(u32);

impl SchemaId {
    pub const DETACHED: SchemaId = SchemaId(u32::MAX);

    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn as_index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub const fn is_detached(self) -> bool {
        self.0 == u32::MAX
    }
}

impl Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_detached() {
            write!(f, "detached")
        } else {
            Display::fmt(&self.0, f)
        }
    }
}

/// Named, ordered, immutable set of descriptors shared by every instance of
/// the type.
#[derive(Debug)]
pub struct MetricSchema {
    id: SchemaId,
    name: String,
    description: String,
    descriptors: Vec<MetricDescriptor>,
    by_name: HashMap<String, usize>,
    int_count: u32,
    long_count: u32,
    double_count: u32,
}

/// Builds a schema, assigning every descriptor its per-kind storage offset and
/// its list index in a single pass.
pub fn build_schema(
    name: impl Into<String>,
    description: impl Into<String>,
    descriptors: Vec<MetricDescriptor>,
) -> StatsResult<MetricSchema> {
    let name = name.into();
    if name.is_empty() {
        return Err(StatsError::invalid_schema("schema name must not be empty"));
    }
    if descriptors.is_empty() {
        return Err(StatsError::invalid_schema(format!(
            "schema {name:?} has no statistics"
        )));
    }
    if descriptors.len() > MAX_DESCRIPTORS_PER_SCHEMA {
        return Err(StatsError::invalid_schema(format!(
            "schema {name:?} has {} statistics, the maximum is {MAX_DESCRIPTORS_PER_SCHEMA}",
            descriptors.len()
        )));
    }

    let mut descriptors = descriptors;
    let mut by_name = HashMap::with_capacity(descriptors.len());
    let (mut ints, mut longs, mut doubles) = (0u32, 0u32, 0u32);
    for (index, descriptor) in descriptors.iter_mut().enumerate() {
        match by_name.entry(descriptor.name().to_string()) {
            Entry::Occupied(_) => {
                return Err(StatsError::DuplicateDescriptor {
                    schema: name,
                    name: descriptor.name().to_string(),
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(index);
            }
        }
        let counter = match descriptor.kind() {
            MetricKind::Int32 => &mut ints,
            MetricKind::Int64 => &mut longs,
            MetricKind::Float64 => &mut doubles,
        };
        descriptor.assign_layout(*counter, index as u8);
        *counter += 1;
    }

    Ok(MetricSchema {
        id: SchemaId::DETACHED,
        name,
        description: description.into(),
        descriptors,
        by_name,
        int_count: ints,
        long_count: longs,
        double_count: doubles,
    })
}

impl MetricSchema {
    #[inline]
    pub fn id(&self) -> SchemaId {
        self.id
    }

    pub(crate) fn attach(mut self, id: SchemaId) -> Self {
        self.id = id;
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[inline]
    pub fn descriptors(&self) -> &[MetricDescriptor] {
        &self.descriptors
    }

    #[inline]
    pub fn descriptor_count(&self) -> usize {
        self.descriptors.len()
    }

    #[inline]
    pub fn int_count(&self) -> u32 {
        self.int_count
    }

    #[inline]
    pub fn long_count(&self) -> u32 {
        self.long_count
    }

    #[inline]
    pub fn double_count(&self) -> u32 {
        self.double_count
    }

    /// Number of storage slots for `kind`.
    pub fn count_of(&self, kind: MetricKind) -> u32 {
        match kind {
            MetricKind::Int32 => self.int_count,
            MetricKind::Int64 => self.long_count,
            MetricKind::Float64 => self.double_count,
        }
    }

    pub fn descriptor(&self, index: usize) -> Option<&MetricDescriptor> {
        self.descriptors.get(index)
    }

    pub fn name_to_descriptor(&self, name: &str) -> StatsResult<&MetricDescriptor> {
        self.by_name
            .get(name)
            .map(|&index| &self.descriptors[index])
            .ok_or_else(|| StatsError::UnknownStatistic(name.to_string()))
    }

    /// Per-kind storage offset of the named statistic.
    pub fn name_to_id(&self, name: &str) -> StatsResult<u32> {
        self.name_to_descriptor(name).map(MetricDescriptor::offset)
    }
}
