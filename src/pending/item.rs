use std::collections::BTreeMap;
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};
use tokio::time::Instant;

/// Kinds of outstanding work for one config object.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct DirtyBits(u32);

impl DirtyBits {
    pub const NONE: DirtyBits = DirtyBits(0);
    /// Regenerate and write the object's full serialized form.
    pub const CONFIG_UPDATE: DirtyBits = DirtyBits(1 << 0);
    /// Remove the object's keys.
    pub const CONFIG_DELETE: DirtyBits = DirtyBits(1 << 1);
    pub const VOLATILE_STATE: DirtyBits = DirtyBits(1 << 2);
    pub const RUNTIME_STATE: DirtyBits = DirtyBits(1 << 3);
    pub const NEXT_UPDATE: DirtyBits = DirtyBits(1 << 4);
    pub const FULL_STATE: DirtyBits = DirtyBits(Self::VOLATILE_STATE.0 | Self::RUNTIME_STATE.0);
    pub const ALL: DirtyBits =
        DirtyBits(Self::CONFIG_UPDATE.0 | Self::CONFIG_DELETE.0 | Self::FULL_STATE.0 | Self::NEXT_UPDATE.0);

    /// Unknown bits are dropped.
    pub const fn from_bits_truncate(bits: u32) -> Self {
        DirtyBits(bits & Self::ALL.0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: DirtyBits) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: DirtyBits) -> bool {
        self.0 & other.0 != 0
    }

    pub fn remove(&mut self, other: DirtyBits) {
        self.0 &= !other.0;
    }

    /// Folds a newer request into the outstanding bits. A delete cancels pending update and state
    /// work (and must not add any itself); an update cancels a pending delete.
    pub fn merge(&mut self, mut incoming: DirtyBits) {
        incoming = incoming & DirtyBits::ALL;

        if incoming.intersects(DirtyBits::CONFIG_DELETE) {
            self.remove(DirtyBits::CONFIG_UPDATE | DirtyBits::FULL_STATE);
            incoming.remove(DirtyBits::CONFIG_UPDATE | DirtyBits::FULL_STATE);
        } else if incoming.intersects(DirtyBits::CONFIG_UPDATE) {
            self.remove(DirtyBits::CONFIG_DELETE);
            incoming.remove(DirtyBits::CONFIG_DELETE);
        }

        *self |= incoming;
    }
}

impl BitOr for DirtyBits {
    type Output = DirtyBits;

    fn bitor(self, rhs: DirtyBits) -> DirtyBits {
        DirtyBits(self.0 | rhs.0)
    }
}

impl BitOrAssign for DirtyBits {
    fn bitor_assign(&mut self, rhs: DirtyBits) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for DirtyBits {
    type Output = DirtyBits;

    fn bitand(self, rhs: DirtyBits) -> DirtyBits {
        DirtyBits(self.0 & rhs.0)
    }
}

impl Not for DirtyBits {
    type Output = DirtyBits;

    fn not(self) -> DirtyBits {
        DirtyBits(!self.0 & Self::ALL.0)
    }
}

impl fmt::Debug for DirtyBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(DirtyBits, &str); 5] = [
            (DirtyBits::CONFIG_UPDATE, "ConfigUpdate"),
            (DirtyBits::CONFIG_DELETE, "ConfigDelete"),
            (DirtyBits::VOLATILE_STATE, "VolatileState"),
            (DirtyBits::RUNTIME_STATE, "RuntimeState"),
            (DirtyBits::NEXT_UPDATE, "NextUpdate"),
        ];

        let set: Vec<_> = NAMES
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "DirtyBits({})", set.join(" | "))
    }
}

/// Store key classes a relation can be deleted from. The model maps each to concrete keys.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StoreKeyClass {
    DependencyNode,
    DependencyEdge,
    RedundancyGroup,
    RedundancyGroupState,
    DependencyEdgeState,
    HostState,
    ServiceState,
    /// Any other relationship key, named by the model.
    Other(String),
}

impl StoreKeyClass {
    /// State keys are deleted differently from plain relationship keys.
    pub fn is_state_key(&self) -> bool {
        matches!(
            self,
            StoreKeyClass::HostState
                | StoreKeyClass::ServiceState
                | StoreKeyClass::RedundancyGroupState
                | StoreKeyClass::DependencyEdgeState
        )
    }
}

/// Key class -> whether the matching checksum key is deleted too.
pub type RelationsKeyMap = BTreeMap<StoreKeyClass, bool>;

/// Identity used to coalesce pending items.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PendingItemKey<O, G> {
    /// A store hash key, for relation deletions.
    Relation(String),
    Object { object: Option<O>, group: Option<G> },
}

#[derive(Clone, Debug)]
pub struct ConfigItem<O> {
    pub object: O,
    pub dirty_bits: DirtyBits,
    pub enqueue_time: Instant,
}

#[derive(Clone, Debug)]
pub struct DependencyGroupStateItem<G> {
    pub group: G,
    pub enqueue_time: Instant,
}

#[derive(Clone, Debug)]
pub struct DependencyEdgeItem<O, G> {
    pub group: G,
    pub child: O,
    pub enqueue_time: Instant,
}

#[derive(Clone, Debug)]
pub struct RelationsDeletionItem {
    pub id: String,
    pub relations: RelationsKeyMap,
    pub enqueue_time: Instant,
}

#[derive(Clone, Debug)]
pub enum PendingItem<O, G> {
    Config(ConfigItem<O>),
    DependencyGroupState(DependencyGroupStateItem<G>),
    DependencyEdge(DependencyEdgeItem<O, G>),
    RelationsDeletion(RelationsDeletionItem),
}

impl<O: Clone, G: Clone> PendingItem<O, G> {
    pub fn key(&self) -> PendingItemKey<O, G> {
        match self {
            PendingItem::Config(item) => PendingItemKey::Object {
                object: Some(item.object.clone()),
                group: None,
            },
            PendingItem::DependencyGroupState(item) => PendingItemKey::Object {
                object: None,
                group: Some(item.group.clone()),
            },
            PendingItem::DependencyEdge(item) => PendingItemKey::Object {
                object: Some(item.child.clone()),
                group: Some(item.group.clone()),
            },
            PendingItem::RelationsDeletion(item) => PendingItemKey::Relation(item.id.clone()),
        }
    }
}

impl<O, G> PendingItem<O, G> {
    pub fn enqueue_time(&self) -> Instant {
        match self {
            PendingItem::Config(item) => item.enqueue_time,
            PendingItem::DependencyGroupState(item) => item.enqueue_time,
            PendingItem::DependencyEdge(item) => item.enqueue_time,
            PendingItem::RelationsDeletion(item) => item.enqueue_time,
        }
    }

    /// Short variant name for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            PendingItem::Config(_) => "ConfigItem",
            PendingItem::DependencyGroupState(_) => "DependencyGroupStateItem",
            PendingItem::DependencyEdge(_) => "DependencyEdgeItem",
            PendingItem::RelationsDeletion(_) => "RelationsDeletionItem",
        }
    }

    pub fn is_relations_deletion(&self) -> bool {
        matches!(self, PendingItem::RelationsDeletion(_))
    }
}
