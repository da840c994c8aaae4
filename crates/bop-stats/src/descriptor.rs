use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::error::{StatsError, StatsResult};

/// Storage kind of a single statistic.
///
/// Every kind has its own dense offset space inside a schema, so an instance
/// keeps three independent slot arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Int32,
    Int64,
    Float64,
}

impl MetricKind {
    pub const ALL: [MetricKind; 3] = [MetricKind::Int32, MetricKind::Int64, MetricKind::Float64];

    /// Type code written into archive type records.
    #[inline]
    pub const fn type_code(self) -> u8 {
        match self {
            MetricKind::Int32 => 5,
            MetricKind::Int64 => 6,
            MetricKind::Float64 => 8,
        }
    }

    pub fn from_type_code(code: u8) -> StatsResult<Self> {
        match code {
            5 => Ok(MetricKind::Int32),
            6 => Ok(MetricKind::Int64),
            8 => Ok(MetricKind::Float64),
            other => Err(StatsError::corruption(format!(
                "unknown statistic type code {other}"
            ))),
        }
    }

    /// Width of a stored value in bits.
    #[inline]
    pub const fn storage_bits(self) -> u32 {
        match self {
            MetricKind::Int32 => 32,
            MetricKind::Int64 | MetricKind::Float64 => 64,
        }
    }
}

impl Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Int32 => write!(f, "int"),
            MetricKind::Int64 => write!(f, "long"),
            MetricKind::Float64 => write!(f, "double"),
        }
    }
}

/// Immutable metadata for one named value of a schema.
///
/// `offset` and `index` are placeholders until the descriptor is handed to
/// [`build_schema`](crate::schema::build_schema), which assigns both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDescriptor {
    name: String,
    description: String,
    unit: String,
    kind: MetricKind,
    is_counter: bool,
    is_larger_better: bool,
    offset: u32,
    index: u8,
}

impl MetricDescriptor {
    fn new(
        name: impl Into<String>,
        kind: MetricKind,
        description: impl Into<String>,
        unit: impl Into<String>,
        is_counter: bool,
        is_larger_better: bool,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            unit: unit.into(),
            kind,
            is_counter,
            is_larger_better,
            offset: 0,
            index: 0,
        }
    }

    /// Monotonic statistic of the given kind.
    pub fn create_counter(
        kind: MetricKind,
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
        larger_better: bool,
    ) -> Self {
        Self::new(name, kind, description, unit, true, larger_better)
    }

    /// Statistic of the given kind that may go up and down.
    pub fn create_gauge(
        kind: MetricKind,
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
        larger_better: bool,
    ) -> Self {
        Self::new(name, kind, description, unit, false, larger_better)
    }

    pub fn int_counter(
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
        larger_better: bool,
    ) -> Self {
        Self::create_counter(MetricKind::Int32, name, description, unit, larger_better)
    }

    pub fn long_counter(
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
        larger_better: bool,
    ) -> Self {
        Self::create_counter(MetricKind::Int64, name, description, unit, larger_better)
    }

    pub fn double_counter(
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
        larger_better: bool,
    ) -> Self {
        Self::create_counter(MetricKind::Float64, name, description, unit, larger_better)
    }

    pub fn int_gauge(
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
        larger_better: bool,
    ) -> Self {
        Self::create_gauge(MetricKind::Int32, name, description, unit, larger_better)
    }

    pub fn long_gauge(
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
        larger_better: bool,
    ) -> Self {
        Self::create_gauge(MetricKind::Int64, name, description, unit, larger_better)
    }

    pub fn double_gauge(
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
        larger_better: bool,
    ) -> Self {
        Self::create_gauge(MetricKind::Float64, name, description, unit, larger_better)
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
    pub fn unit(&self) -> &str {
        &self.unit
    }

    #[inline]
    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    #[inline]
    pub fn is_counter(&self) -> bool {
        self.is_counter
    }

    #[inline]
    pub fn is_larger_better(&self) -> bool {
        self.is_larger_better
    }

    /// Slot inside the storage array of this descriptor's kind.
    #[inline]
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Position in the owning schema's descriptor list.
    #[inline]
    pub fn index(&self) -> u8 {
        self.index
    }

    pub(crate) fn assign_layout(&mut self, offset: u32, index: u8) {
        self.offset = offset;
        self.index = index;
    }

    /// Returns the offset if the descriptor holds `expected` values.
    pub(crate) fn check_kind(&self, expected: MetricKind) -> StatsResult<u32> {
        if self.kind != expected {
            return Err(StatsError::WrongKind {
                name: self.name.clone(),
                actual: self.kind,
                expected,
            });
        }
        Ok(self.offset)
    }
}
