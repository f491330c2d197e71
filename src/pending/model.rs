use crate::connection::{Connection, QueryError};
use crate::pending::item::{DirtyBits, StoreKeyClass};
use crate::protocol::{Queries, QueryAffects};
use std::error::Error;
use std::fmt::Debug;
use std::hash::Hash;

/// The object graph being mirrored into the store. The queue only decides *when* something is
/// written; the model decides *what* the queries are and owns object identities and locks.
pub trait SyncModel: Send + Sync + 'static {
    /// A config object. Checkables (the children and parents of dependencies) are objects too.
    type Object: Clone + Eq + Hash + Debug + Send + Sync;
    type Group: Clone + Eq + Hash + Debug + Send + Sync;
    type Dependency;
    /// Held while a config item is processed. Acquired without blocking.
    type ObjectGuard<'a>
    where
        Self: 'a;
    type Error: Error + Send + Sync + 'static;

    fn try_lock_object<'a>(&'a self, object: &Self::Object) -> Option<Self::ObjectGuard<'a>>;

    fn config_delete_queries(&self, object: &Self::Object) -> Result<Queries, Self::Error>;

    /// The object's full serialized form. Sent as one transaction.
    fn config_update_queries(&self, object: &Self::Object) -> Result<Queries, Self::Error>;

    fn is_checkable(&self, object: &Self::Object) -> bool;

    /// `bits` tells which parts of the state are dirty.
    fn state_update_queries(&self, checkable: &Self::Object, bits: DirtyBits) -> Result<Queries, Self::Error>;

    fn next_update_queries(&self, checkable: &Self::Object) -> Result<Queries, Self::Error>;

    /// Any current child of the group. All children share the group's state.
    fn any_child(&self, group: &Self::Group) -> Option<Self::Object>;

    fn dependencies_state_queries(&self, child: &Self::Object, group: &Self::Group) -> Result<Queries, Self::Error>;

    /// The edges registering `child` with `group`. Assigns the group its identifier the first
    /// time it is materialised. Sent as one transaction.
    fn dependency_edge_queries(&self, child: &Self::Object, group: &Self::Group) -> Result<Queries, Self::Error>;

    fn state_deletion_queries(&self, id: &str, key: &StoreKeyClass, has_checksum: bool) -> Result<Queries, Self::Error>;

    fn relationship_deletion_queries(
        &self,
        id: &str,
        key: &StoreKeyClass,
        has_checksum: bool,
    ) -> Result<Queries, Self::Error>;

    fn object_identifier(&self, object: &Self::Object) -> String;

    /// Whether the checkable still takes part in any dependency, as child or as parent.
    fn has_any_dependencies(&self, checkable: &Self::Object) -> bool;

    fn dependency_child(&self, dependency: &Self::Dependency) -> Self::Object;

    fn dependency_parent(&self, dependency: &Self::Dependency) -> Self::Object;

    fn is_redundancy_group(&self, group: &Self::Group) -> bool;

    /// `None` until the group was first written to the store.
    fn group_identifier(&self, group: &Self::Group) -> Option<String>;

    /// Derives the group's stable identifier, stores it on the group and returns it.
    fn assign_group_identifier(&self, group: &Self::Group) -> String;

    /// Id of the edge state shared by `dependency`'s edge. For a non-redundant group this assigns
    /// the group identifier as a side effect.
    fn dependency_edge_state_id(&self, group: &Self::Group, dependency: &Self::Dependency) -> String;

    /// Id of the edge between the two nodes with the given identifiers.
    fn edge_id(&self, from: &str, to: &str) -> String;
}

/// Where processed items go. Implemented by `Connection`; tests record instead.
pub trait QuerySink: Send + Sync + 'static {
    fn is_connected(&self) -> bool;

    fn pending_query_count(&self) -> i64;

    fn fire_and_forget_queries(&self, queries: Queries, affects: QueryAffects) -> Result<(), QueryError>;
}

impl QuerySink for Connection {
    fn is_connected(&self) -> bool {
        Connection::is_connected(self)
    }

    fn pending_query_count(&self) -> i64 {
        Connection::pending_query_count(self)
    }

    fn fire_and_forget_queries(&self, queries: Queries, affects: QueryAffects) -> Result<(), QueryError> {
        Connection::fire_and_forget_queries(self, queries, affects)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessItemError {
    #[error("Model error: {0}")]
    Model(Box<dyn Error + Send + Sync>),
    #[error("Query error: {0}")]
    Query(#[from] QueryError),
}

impl ProcessItemError {
    pub(crate) fn model<E: Error + Send + Sync + 'static>(e: E) -> Self {
        ProcessItemError::Model(Box::new(e))
    }
}
