//! Process-wide table of schemas and live instances.
//!
//! The registry is an explicit object shared as `Arc<MetricsRegistry>`
//! rather than a global. Three locks guard independent state:
//!
//! - the schema table (`RwLock`): an arena of `Arc<MetricSchema>` indexed by
//!   [`SchemaId`] plus a name index,
//! - the instance lists (`Mutex`): every live instance, the subset added
//!   since the last archive pass and the number of attached archivers,
//! - the unique-id counter (`Mutex`), so id assignment never waits on a
//!   sampler holding the list lock.
//!
//! Closed instances leave the live list during an archive pass. With no
//! archiver attached, nothing tracks new instances and closed ones are
//! pruned whenever the lists are touched, so the lists stay bounded.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::debug;

use crate::descriptor::MetricDescriptor;
use crate::error::{StatsError, StatsResult};
use crate::instance::MetricInstance;
use crate::schema::{MetricSchema, SchemaId, build_schema};

/// Default registry name, used as the text id of instances created without
/// one.
pub const DEFAULT_REGISTRY_NAME: &str = "bop-stats";

#[derive(Debug, Default)]
struct SchemaTable {
    arena: Vec<Arc<MetricSchema>>,
    by_name: HashMap<String, SchemaId>,
}

#[derive(Debug, Default)]
pub(crate) struct InstanceLists {
    pub(crate) live: Vec<Arc<MetricInstance>>,
    pub(crate) newly_added: Vec<Arc<MetricInstance>>,
    archivers: usize,
}

impl InstanceLists {
    fn prune_closed(&mut self) {
        self.live.retain(|inst| !inst.is_closed());
    }
}

#[derive(Debug)]
pub struct MetricsRegistry {
    name: String,
    process_id: i64,
    start_time_ms: i64,
    schemas: RwLock<SchemaTable>,
    instances: Mutex<InstanceLists>,
    next_unique_id: Mutex<i64>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_REGISTRY_NAME)
    }
}

impl MetricsRegistry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            process_id: i64::from(std::process::id()),
            start_time_ms: now_millis(),
            schemas: RwLock::new(SchemaTable::default()),
            instances: Mutex::new(InstanceLists::default()),
            next_unique_id: Mutex::new(1),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn process_id(&self) -> i64 {
        self.process_id
    }

    /// Wall-clock milliseconds at which the registry was created.
    #[inline]
    pub fn start_time(&self) -> i64 {
        self.start_time_ms
    }

    /// Builds and registers a schema. Fails if the name is already taken.
    pub fn create_schema(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        descriptors: Vec<MetricDescriptor>,
    ) -> StatsResult<Arc<MetricSchema>> {
        let schema = build_schema(name, description, descriptors)?;
        let mut table = self.schemas.write();
        if table.by_name.contains_key(schema.name()) {
            return Err(StatsError::DuplicateSchema(schema.name().to_string()));
        }
        Ok(Self::insert_schema(&mut table, schema))
    }

    /// Returns the registered schema with this name, registering it first if
    /// absent. An existing schema is returned as is, even when its
    /// descriptors differ from `descriptors`.
    pub fn find_or_create_schema(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        descriptors: Vec<MetricDescriptor>,
    ) -> StatsResult<Arc<MetricSchema>> {
        let name = name.into();
        if let Some(existing) = self.find_schema(&name) {
            return Ok(existing);
        }
        let schema = build_schema(name, description, descriptors)?;
        let mut table = self.schemas.write();
        if let Some(&id) = table.by_name.get(schema.name()) {
            return Ok(table.arena[id.as_index()].clone());
        }
        Ok(Self::insert_schema(&mut table, schema))
    }

    fn insert_schema(table: &mut SchemaTable, schema: MetricSchema) -> Arc<MetricSchema> {
        let id = SchemaId::new(table.arena.len() as u32);
        let schema = Arc::new(schema.attach(id));
        table.by_name.insert(schema.name().to_string(), id);
        table.arena.push(schema.clone());
        debug!(schema = schema.name(), id = %id, "registered schema");
        schema
    }

    pub fn find_schema(&self, name: &str) -> Option<Arc<MetricSchema>> {
        let table = self.schemas.read();
        table
            .by_name
            .get(name)
            .map(|id| table.arena[id.as_index()].clone())
    }

    pub fn schema(&self, id: SchemaId) -> Option<Arc<MetricSchema>> {
        self.schemas.read().arena.get(id.as_index()).cloned()
    }

    /// Every registered schema in registration order.
    pub fn schemas(&self) -> Vec<Arc<MetricSchema>> {
        self.schemas.read().arena.clone()
    }

    fn check_registered(&self, schema: &Arc<MetricSchema>) -> StatsResult<()> {
        let table = self.schemas.read();
        let registered = !schema.id().is_detached()
            && table
                .arena
                .get(schema.id().as_index())
                .is_some_and(|entry| Arc::ptr_eq(entry, schema));
        if registered {
            Ok(())
        } else {
            Err(StatsError::UnknownSchema(schema.name().to_string()))
        }
    }

    fn next_unique_id(&self) -> i64 {
        let mut next = self.next_unique_id.lock();
        let id = *next;
        *next += 1;
        id
    }

    /// Creates a live instance of a registered schema.
    ///
    /// An empty `text_id` defaults to the registry name and a zero
    /// `numeric_id` to the process id.
    pub fn create_instance(
        &self,
        schema: &Arc<MetricSchema>,
        text_id: &str,
        numeric_id: i64,
        atomic: bool,
    ) -> StatsResult<Arc<MetricInstance>> {
        self.check_registered(schema)?;
        let text_id = if text_id.is_empty() {
            self.name.clone()
        } else {
            text_id.to_string()
        };
        let numeric_id = if numeric_id == 0 {
            self.process_id
        } else {
            numeric_id
        };
        let unique_id = self.next_unique_id();
        let instance = Arc::new(MetricInstance::new(
            schema.clone(),
            text_id,
            numeric_id,
            unique_id,
            atomic,
        ));

        let mut lists = self.instances.lock();
        if lists.archivers > 0 {
            lists.newly_added.push(instance.clone());
        } else {
            lists.prune_closed();
        }
        lists.live.push(instance.clone());
        Ok(instance)
    }

    pub fn create_atomic_instance(
        &self,
        schema: &Arc<MetricSchema>,
        text_id: &str,
        numeric_id: i64,
    ) -> StatsResult<Arc<MetricInstance>> {
        self.create_instance(schema, text_id, numeric_id, true)
    }

    pub fn create_exclusive_instance(
        &self,
        schema: &Arc<MetricSchema>,
        text_id: &str,
        numeric_id: i64,
    ) -> StatsResult<Arc<MetricInstance>> {
        self.create_instance(schema, text_id, numeric_id, false)
    }

    fn find_live<F>(&self, mut pred: F) -> Option<Arc<MetricInstance>>
    where
        F: FnMut(&MetricInstance) -> bool,
    {
        self.instances
            .lock()
            .live
            .iter()
            .find(|inst| !inst.is_closed() && pred(inst.as_ref()))
            .cloned()
    }

    pub fn find_first_instance_by_schema(
        &self,
        schema: &MetricSchema,
    ) -> Option<Arc<MetricInstance>> {
        let id = schema.id();
        self.find_live(|inst| inst.schema().id() == id)
    }

    pub fn find_instances_by_schema(&self, schema: &MetricSchema) -> Vec<Arc<MetricInstance>> {
        let id = schema.id();
        self.instances
            .lock()
            .live
            .iter()
            .filter(|inst| !inst.is_closed() && inst.schema().id() == id)
            .cloned()
            .collect()
    }

    pub fn find_by_unique_id(&self, unique_id: i64) -> Option<Arc<MetricInstance>> {
        self.find_live(|inst| inst.unique_id() == unique_id)
    }

    pub fn find_by_text_id(&self, text_id: &str) -> Option<Arc<MetricInstance>> {
        self.find_live(|inst| inst.text_id() == text_id)
    }

    pub fn find_by_numeric_id(&self, numeric_id: i64) -> Option<Arc<MetricInstance>> {
        self.find_live(|inst| inst.numeric_id() == numeric_id)
    }

    /// Instances held in the live list. While archiving, closed ones stay
    /// until the next archive pass writes their delete record.
    pub fn instance_count(&self) -> usize {
        let mut lists = self.instances.lock();
        if lists.archivers == 0 {
            lists.prune_closed();
        }
        lists.live.len()
    }

    /// Attaches an archive writer. From now on new instances are queued for
    /// it and closed instances wait for its next pass.
    ///
    /// Calls nest; every call needs a matching
    /// [`end_archiving`](Self::end_archiving).
    pub fn begin_archiving(&self) {
        self.instances.lock().archivers += 1;
    }

    /// Detaches an archive writer. When the last one leaves, the queue of new
    /// instances is dropped and closed instances are released.
    pub fn end_archiving(&self) {
        let mut lists = self.instances.lock();
        lists.archivers = lists.archivers.saturating_sub(1);
        if lists.archivers == 0 {
            lists.newly_added.clear();
            lists.prune_closed();
        }
    }

    pub fn is_archiving(&self) -> bool {
        self.instances.lock().archivers > 0
    }

    pub(crate) fn lock_lists(&self) -> MutexGuard<'_, InstanceLists> {
        self.instances.lock()
    }
}

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
