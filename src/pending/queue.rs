use crate::connection::{Connection, OptionsError};
use crate::pending::container::PendingItems;
use crate::pending::item::{
    ConfigItem, DependencyEdgeItem, DependencyGroupStateItem, DirtyBits, PendingItem, PendingItemKey,
    RelationsDeletionItem, RelationsKeyMap, StoreKeyClass,
};
use crate::pending::model::{ProcessItemError, QuerySink, SyncModel};
use crate::pending::options::{PendingQueueOptions, PendingQueueOptionsValidated};
use crate::protocol::{transaction, Queries, QueryAffects};
use crate::time::{Clock, RealClock};
use std::collections::HashSet;
use std::convert::TryFrom;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

pub(super) type ItemsGuard<'a, M> =
    MutexGuard<'a, PendingItems<<M as SyncModel>::Object, <M as SyncModel>::Group>>;

/// Outcome of one scan over the queue.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(super) struct Pass {
    pub(super) progressed: bool,
    pub(super) retry_after: Duration,
}

/// Coalescing queue of change intents, drained into the store by a background worker.
///
/// Enqueues are dropped while the queue is inactive or the sink is disconnected. The next full
/// resync repairs whatever was missed.
pub struct PendingItemQueue<M: SyncModel, S = Connection, C = RealClock> {
    pub(super) logger: slog::Logger,
    pub(super) options: PendingQueueOptionsValidated,
    model: M,
    sink: S,
    clock: C,
    pub(super) items: Mutex<PendingItems<M::Object, M::Group>>,
    pub(super) wakeup: Condvar,
    pub(super) active: AtomicBool,
    pub(super) worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl<M: SyncModel, S: QuerySink> PendingItemQueue<M, S, RealClock> {
    pub fn new(options: PendingQueueOptions, model: M, sink: S) -> Result<Self, OptionsError> {
        Self::with_clock(options, model, sink, RealClock)
    }
}

impl<M: SyncModel, S: QuerySink, C: Clock> PendingItemQueue<M, S, C> {
    pub fn with_clock(options: PendingQueueOptions, model: M, sink: S, clock: C) -> Result<Self, OptionsError> {
        let options = PendingQueueOptionsValidated::try_from(options)?;

        Ok(PendingItemQueue {
            logger: options.logger.clone(),
            options,
            model,
            sink,
            clock,
            items: Mutex::new(PendingItems::new()),
            wakeup: Condvar::new(),
            active: AtomicBool::new(false),
            worker: Mutex::new(None),
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn len(&self) -> usize {
        self.lock_items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_items().is_empty()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub(super) fn lock_items(&self) -> ItemsGuard<'_, M> {
        self.items.lock().expect("PendingItemQueue.items mutex guard poison")
    }

    fn accepting(&self) -> bool {
        self.is_active() && self.sink.is_connected()
    }

    /// Queues `bits` of work for `object`, merging with what is already queued for it.
    pub fn enqueue_config_object(&self, object: M::Object, bits: DirtyBits) {
        if !self.accepting() {
            return;
        }

        {
            let mut items = self.lock_items();
            let key = PendingItemKey::Object {
                object: Some(object.clone()),
                group: None,
            };
            match items.get_mut(&key) {
                Some(PendingItem::Config(existing)) => existing.dirty_bits.merge(bits),
                Some(_) => {}
                None => {
                    items.insert(PendingItem::Config(ConfigItem {
                        object,
                        dirty_bits: bits & DirtyBits::ALL,
                        enqueue_time: self.clock.now(),
                    }));
                }
            }
        }
        self.wakeup.notify_one();
    }

    pub fn enqueue_dependency_group_state_update(&self, group: M::Group) {
        if !self.accepting() {
            return;
        }

        self.lock_items()
            .insert(PendingItem::DependencyGroupState(DependencyGroupStateItem {
                group,
                enqueue_time: self.clock.now(),
            }));
        self.wakeup.notify_one();
    }

    pub fn enqueue_dependency_child_registered(&self, group: M::Group, child: M::Object) {
        if !self.accepting() {
            return;
        }

        self.lock_items().insert(PendingItem::DependencyEdge(DependencyEdgeItem {
            group,
            child,
            enqueue_time: self.clock.now(),
        }));
        self.wakeup.notify_one();
    }

    /// Unregisters the child of `dependencies` (all share one child) from `group`. A registration
    /// still waiting in the queue is simply cancelled; otherwise deletions are queued for every
    /// node and edge that is orphaned by the removal.
    pub fn enqueue_dependency_child_removed(
        &self,
        group: &M::Group,
        dependencies: &[M::Dependency],
        remove_group: bool,
    ) {
        let first = match dependencies.first() {
            Some(first) if self.accepting() => first,
            _ => return,
        };

        let child = self.model.dependency_child(first);
        let had_pending_registration = {
            let mut items = self.lock_items();
            let registration = PendingItemKey::Object {
                object: Some(child.clone()),
                group: Some(group.clone()),
            };
            let cancelled = items.remove(&registration).is_some();
            if cancelled && remove_group {
                // No children left to compute the group state from.
                items.remove(&PendingItemKey::Object {
                    object: None,
                    group: Some(group.clone()),
                });
            }
            cancelled
        };

        let child_id = self.model.object_identifier(&child);
        if !self.model.has_any_dependencies(&child) {
            self.enqueue_relations_deletion(child_id.clone(), relations(&[StoreKeyClass::DependencyNode]));
        }

        if had_pending_registration && self.model.group_identifier(group).is_none() {
            // The group never made it into the store.
            return;
        }

        let redundant = self.model.is_redundancy_group(group);
        let redundancy_group_id = if redundant {
            // The worker may have dequeued the first registration without having serialized it yet.
            Some(
                self.model
                    .group_identifier(group)
                    .unwrap_or_else(|| self.model.assign_group_identifier(group)),
            )
        } else {
            None
        };

        let mut detached_parents = HashSet::new();
        for dependency in dependencies {
            let parent = self.model.dependency_parent(dependency);
            if !detached_parents.insert(parent.clone()) {
                continue;
            }

            let edge_id = match &redundancy_group_id {
                Some(group_id) => {
                    if remove_group {
                        let edge_state_id = self.model.dependency_edge_state_id(group, dependency);
                        self.enqueue_relations_deletion(
                            edge_state_id,
                            relations(&[StoreKeyClass::DependencyEdge, StoreKeyClass::DependencyEdgeState]),
                        );
                    }
                    self.model.edge_id(&child_id, group_id)
                }
                None => {
                    if self.model.group_identifier(group).is_none() {
                        // Assigns the shared edge state id to the group.
                        let _ = self.model.dependency_edge_state_id(group, dependency);
                    }
                    self.model.edge_id(&child_id, &self.model.object_identifier(&parent))
                }
            };
            self.enqueue_relations_deletion(edge_id, relations(&[StoreKeyClass::DependencyEdge]));

            // The parent's child counters changed.
            self.enqueue_config_object(parent.clone(), DirtyBits::CONFIG_UPDATE);

            if !self.model.has_any_dependencies(&parent) {
                let parent_id = self.model.object_identifier(&parent);
                self.enqueue_relations_deletion(parent_id, relations(&[StoreKeyClass::DependencyNode]));
            }
        }

        if !remove_group {
            return;
        }
        match (redundancy_group_id, self.model.group_identifier(group)) {
            (Some(group_id), _) => self.enqueue_relations_deletion(
                group_id,
                relations(&[
                    StoreKeyClass::DependencyNode,
                    StoreKeyClass::RedundancyGroup,
                    StoreKeyClass::RedundancyGroupState,
                    StoreKeyClass::DependencyEdgeState,
                ]),
            ),
            // A non-redundant group's identifier doubles as the edge state id of all its edges.
            (None, Some(group_id)) => {
                self.enqueue_relations_deletion(group_id, relations(&[StoreKeyClass::DependencyEdgeState]))
            }
            (None, None) => slog::debug!(self.logger, "Removed group {:?} was never written", group),
        }
    }

    /// Queues deletion of `id` from every key class in `relations`. Classes already queued for
    /// `id` keep their checksum flag.
    pub fn enqueue_relations_deletion(&self, id: String, relations: RelationsKeyMap) {
        if !self.accepting() {
            return;
        }

        {
            let mut items = self.lock_items();
            match items.get_mut(&PendingItemKey::Relation(id.clone())) {
                Some(PendingItem::RelationsDeletion(existing)) => {
                    for (key, has_checksum) in relations {
                        existing.relations.entry(key).or_insert(has_checksum);
                    }
                }
                Some(_) => {}
                None => {
                    items.insert(PendingItem::RelationsDeletion(RelationsDeletionItem {
                        id,
                        relations,
                        enqueue_time: self.clock.now(),
                    }));
                }
            }
        }
        self.wakeup.notify_one();
    }

    /// Processes at most one eligible item and returns how long to wait before the next call.
    pub fn dequeue_and_process_one(&self) -> Duration {
        let (_items, pass) = self.dequeue_locked(self.lock_items());
        pass.retry_after
    }

    /// Scans in insertion order for the first item that may be processed now. The items lock is
    /// released while the item is processed and held again on return.
    pub(super) fn dequeue_locked<'a>(&'a self, mut items: ItemsGuard<'a, M>) -> (ItemsGuard<'a, M>, Pass) {
        let active = self.is_active();
        let debounce = self.options.debounce_window;

        let mut retry_after = Duration::from_secs(0);
        let mut selected = None;
        for (position, (seq, item)) in items.iter().enumerate() {
            if position > 0 && item.is_relations_deletion() {
                // An older item might recreate what this one deletes.
                break;
            }

            let age = self.clock.elapsed_since(item.enqueue_time());
            if active && age < debounce {
                if position == 0 {
                    retry_after = debounce - age;
                }
                break;
            }

            let guard = match item {
                PendingItem::Config(config) => match self.model.try_lock_object(&config.object) {
                    Some(guard) => Some(guard),
                    None => continue,
                },
                _ => None,
            };
            selected = Some((seq, guard));
            break;
        }

        let mut progressed = false;
        if let Some((seq, guard)) = selected {
            if let Some(item) = items.remove_at(seq) {
                progressed = true;
                drop(items);

                if let Err(e) = self.process(&item) {
                    slog::error!(self.logger, "Failed to process pending item: {}", e; "Item" => item.kind());
                }
                drop(guard);

                items = self.lock_items();
            }
        }

        if !progressed && retry_after == Duration::from_secs(0) {
            retry_after = self.options.idle_retry;
        }
        (items, Pass { progressed, retry_after })
    }

    fn process(&self, item: &PendingItem<M::Object, M::Group>) -> Result<(), ProcessItemError> {
        match item {
            PendingItem::Config(item) => self.process_config(item),
            PendingItem::DependencyGroupState(item) => {
                if let Some(child) = self.model.any_child(&item.group) {
                    let queries = self
                        .model
                        .dependencies_state_queries(&child, &item.group)
                        .map_err(ProcessItemError::model)?;
                    self.send(queries, QueryAffects::state(1))?;
                }
                Ok(())
            }
            PendingItem::DependencyEdge(item) => {
                let queries = self
                    .model
                    .dependency_edge_queries(&item.child, &item.group)
                    .map_err(ProcessItemError::model)?;
                self.send(transaction(queries), QueryAffects::config(1))
            }
            PendingItem::RelationsDeletion(item) => {
                for (key, has_checksum) in &item.relations {
                    if key.is_state_key() {
                        let queries = self
                            .model
                            .state_deletion_queries(&item.id, key, *has_checksum)
                            .map_err(ProcessItemError::model)?;
                        self.send(queries, QueryAffects::state(1))?;
                    } else {
                        let queries = self
                            .model
                            .relationship_deletion_queries(&item.id, key, *has_checksum)
                            .map_err(ProcessItemError::model)?;
                        self.send(queries, QueryAffects::config(1))?;
                    }
                }
                Ok(())
            }
        }
    }

    fn process_config(&self, item: &ConfigItem<M::Object>) -> Result<(), ProcessItemError> {
        let bits = item.dirty_bits;

        if bits.intersects(DirtyBits::CONFIG_DELETE) {
            let queries = self
                .model
                .config_delete_queries(&item.object)
                .map_err(ProcessItemError::model)?;
            self.send(queries, QueryAffects::config(1))?;
        }

        if bits.intersects(DirtyBits::CONFIG_UPDATE) {
            let queries = self
                .model
                .config_update_queries(&item.object)
                .map_err(ProcessItemError::model)?;
            self.send(transaction(queries), QueryAffects::config(1))?;
        }

        if self.model.is_checkable(&item.object) {
            if bits.intersects(DirtyBits::FULL_STATE) {
                let queries = self
                    .model
                    .state_update_queries(&item.object, bits)
                    .map_err(ProcessItemError::model)?;
                self.send(queries, QueryAffects::state(1))?;
            }
            if bits.intersects(DirtyBits::NEXT_UPDATE) {
                let queries = self
                    .model
                    .next_update_queries(&item.object)
                    .map_err(ProcessItemError::model)?;
                self.send(queries, QueryAffects::state(1))?;
            }
        }

        Ok(())
    }

    fn send(&self, queries: Queries, affects: QueryAffects) -> Result<(), ProcessItemError> {
        if queries.is_empty() {
            return Ok(());
        }
        self.sink.fire_and_forget_queries(queries, affects)?;
        Ok(())
    }
}

fn relations(classes: &[StoreKeyClass]) -> RelationsKeyMap {
    classes.iter().map(|class| (class.clone(), false)).collect()
}
