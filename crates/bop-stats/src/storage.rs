//! Slot storage backing a metric instance.
//!
//! Both strategies keep three parallel arrays (ints, longs, doubles) sized
//! from the schema's per-kind counts. Doubles are stored as their IEEE-754 bit
//! pattern inside 64-bit cells.
//!
//! ## Strategies
//!
//! - **Concurrent**: every update is an atomic read-modify-write, so any
//!   number of threads may mutate the same slot without losing updates.
//! - **Exclusive**: updates are a relaxed load followed by a relaxed store.
//!   Reads from other threads (the sampler) stay sound, but concurrent writers
//!   may lose increments; the owner must serialize its writes.
//!
//! Callers validate offsets; the storage layer indexes directly.

use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU64, Ordering};

use crate::descriptor::MetricKind;
use crate::schema::MetricSchema;

/// Operations shared by both storage strategies.
pub(crate) trait StorageOps {
    fn set_int(&self, offset: usize, value: i32);
    fn set_long(&self, offset: usize, value: i64);
    fn set_double(&self, offset: usize, value: f64);

    fn get_int(&self, offset: usize) -> i32;
    fn get_long(&self, offset: usize) -> i64;
    fn get_double(&self, offset: usize) -> f64;

    fn inc_int(&self, offset: usize, delta: i32) -> i32;
    fn inc_long(&self, offset: usize, delta: i64) -> i64;
    fn inc_double(&self, offset: usize, delta: f64) -> f64;

    /// Current value as a 64-bit pattern: ints sign-extended, doubles bit-cast.
    fn raw_bits(&self, kind: MetricKind, offset: usize) -> i64 {
        match kind {
            MetricKind::Int32 => self.get_int(offset) as i64,
            MetricKind::Int64 => self.get_long(offset),
            MetricKind::Float64 => self.get_double(offset).to_bits() as i64,
        }
    }
}

#[derive(Debug)]
struct Slots {
    ints: Box<[AtomicI32]>,
    longs: Box<[AtomicI64]>,
    doubles: Box<[AtomicU64]>,
}

impl Slots {
    fn for_schema(schema: &MetricSchema) -> Self {
        Self {
            ints: (0..schema.int_count()).map(|_| AtomicI32::new(0)).collect(),
            longs: (0..schema.long_count()).map(|_| AtomicI64::new(0)).collect(),
            doubles: (0..schema.double_count())
                .map(|_| AtomicU64::new(0f64.to_bits()))
                .collect(),
        }
    }

    fn len(&self, kind: MetricKind) -> usize {
        match kind {
            MetricKind::Int32 => self.ints.len(),
            MetricKind::Int64 => self.longs.len(),
            MetricKind::Float64 => self.doubles.len(),
        }
    }
}

/// Lock-free storage safe for any number of concurrent writers.
#[derive(Debug)]
pub(crate) struct ConcurrentStorage {
    slots: Slots,
}

impl ConcurrentStorage {
    pub(crate) fn new(schema: &MetricSchema) -> Self {
        Self {
            slots: Slots::for_schema(schema),
        }
    }
}

impl StorageOps for ConcurrentStorage {
    #[inline]
    fn set_int(&self, offset: usize, value: i32) {
        self.slots.ints[offset].store(value, Ordering::Release);
    }

    #[inline]
    fn set_long(&self, offset: usize, value: i64) {
        self.slots.longs[offset].store(value, Ordering::Release);
    }

    #[inline]
    fn set_double(&self, offset: usize, value: f64) {
        self.slots.doubles[offset].store(value.to_bits(), Ordering::Release);
    }

    #[inline]
    fn get_int(&self, offset: usize) -> i32 {
        self.slots.ints[offset].load(Ordering::Acquire)
    }

    #[inline]
    fn get_long(&self, offset: usize) -> i64 {
        self.slots.longs[offset].load(Ordering::Acquire)
    }

    #[inline]
    fn get_double(&self, offset: usize) -> f64 {
        f64::from_bits(self.slots.doubles[offset].load(Ordering::Acquire))
    }

    #[inline]
    fn inc_int(&self, offset: usize, delta: i32) -> i32 {
        self.slots.ints[offset]
            .fetch_add(delta, Ordering::AcqRel)
            .wrapping_add(delta)
    }

    #[inline]
    fn inc_long(&self, offset: usize, delta: i64) -> i64 {
        self.slots.longs[offset]
            .fetch_add(delta, Ordering::AcqRel)
            .wrapping_add(delta)
    }

    fn inc_double(&self, offset: usize, delta: f64) -> f64 {
        let cell = &self.slots.doubles[offset];
        let mut current = cell.load(Ordering::Acquire);
        loop {
            let next = f64::from_bits(current) + delta;
            match cell.compare_exchange_weak(
                current,
                next.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }
}

/// Cheaper storage for instances with a single writer thread.
#[derive(Debug)]
pub(crate) struct ExclusiveStorage {
    slots: Slots,
}

impl ExclusiveStorage {
    pub(crate) fn new(schema: &MetricSchema) -> Self {
        Self {
            slots: Slots::for_schema(schema),
        }
    }
}

impl StorageOps for ExclusiveStorage {
    #[inline]
    fn set_int(&self, offset: usize, value: i32) {
        self.slots.ints[offset].store(value, Ordering::Relaxed);
    }

    #[inline]
    fn set_long(&self, offset: usize, value: i64) {
        self.slots.longs[offset].store(value, Ordering::Relaxed);
    }

    #[inline]
    fn set_double(&self, offset: usize, value: f64) {
        self.slots.doubles[offset].store(value.to_bits(), Ordering::Relaxed);
    }

    #[inline]
    fn get_int(&self, offset: usize) -> i32 {
        self.slots.ints[offset].load(Ordering::Relaxed)
    }

    #[inline]
    fn get_long(&self, offset: usize) -> i64 {
        self.slots.longs[offset].load(Ordering::Relaxed)
    }

    #[inline]
    fn get_double(&self, offset: usize) -> f64 {
        f64::from_bits(self.slots.doubles[offset].load(Ordering::Relaxed))
    }

    #[inline]
    fn inc_int(&self, offset: usize, delta: i32) -> i32 {
        let cell = &self.slots.ints[offset];
        let next = cell.load(Ordering::Relaxed).wrapping_add(delta);
        cell.store(next, Ordering::Relaxed);
        next
    }

    #[inline]
    fn inc_long(&self, offset: usize, delta: i64) -> i64 {
        let cell = &self.slots.longs[offset];
        let next = cell.load(Ordering::Relaxed).wrapping_add(delta);
        cell.store(next, Ordering::Relaxed);
        next
    }

    #[inline]
    fn inc_double(&self, offset: usize, delta: f64) -> f64 {
        let cell = &self.slots.doubles[offset];
        let next = f64::from_bits(cell.load(Ordering::Relaxed)) + delta;
        cell.store(next.to_bits(), Ordering::Relaxed);
        next
    }
}

/// Storage strategy chosen when the instance is created.
#[derive(Debug)]
pub(crate) enum MetricStorage {
    Concurrent(ConcurrentStorage),
    Exclusive(ExclusiveStorage),
}

impl MetricStorage {
    pub(crate) fn new(schema: &MetricSchema, atomic: bool) -> Self {
        if atomic {
            MetricStorage::Concurrent(ConcurrentStorage::new(schema))
        } else {
            MetricStorage::Exclusive(ExclusiveStorage::new(schema))
        }
    }

    #[inline]
    pub(crate) fn is_atomic(&self) -> bool {
        matches!(self, MetricStorage::Concurrent(_))
    }

    /// Number of slots held for `kind`.
    pub(crate) fn len(&self, kind: MetricKind) -> usize {
        match self {
            MetricStorage::Concurrent(s) => s.slots.len(kind),
            MetricStorage::Exclusive(s) => s.slots.len(kind),
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $method:ident($($arg:expr),*)) => {
        match $self {
            MetricStorage::Concurrent(s) => s.$method($($arg),*),
            MetricStorage::Exclusive(s) => s.$method($($arg),*),
        }
    };
}

impl StorageOps for MetricStorage {
    #[inline]
    fn set_int(&self, offset: usize, value: i32) {
        dispatch!(self, set_int(offset, value))
    }

    #[inline]
    fn set_long(&self, offset: usize, value: i64) {
        dispatch!(self, set_long(offset, value))
    }

    #[inline]
    fn set_double(&self, offset: usize, value: f64) {
        dispatch!(self, set_double(offset, value))
    }

    #[inline]
    fn get_int(&self, offset: usize) -> i32 {
        dispatch!(self, get_int(offset))
    }

    #[inline]
    fn get_long(&self, offset: usize) -> i64 {
        dispatch!(self, get_long(offset))
    }

    #[inline]
    fn get_double(&self, offset: usize) -> f64 {
        dispatch!(self, get_double(offset))
    }

    #[inline]
    fn inc_int(&self, offset: usize, delta: i32) -> i32 {
        dispatch!(self, inc_int(offset, delta))
    }

    #[inline]
    fn inc_long(&self, offset: usize, delta: i64) -> i64 {
        dispatch!(self, inc_long(offset, delta))
    }

    #[inline]
    fn inc_double(&self, offset: usize, delta: f64) -> f64 {
        dispatch!(self, inc_double(offset, delta))
    }
}
