//! In-memory model and recording sink for exercising the queue without a store.

use crate::connection::QueryError;
use crate::pending::item::{DirtyBits, StoreKeyClass};
use crate::pending::model::{QuerySink, SyncModel};
use crate::protocol::{Queries, Query, QueryAffects};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct TestGroup {
    pub name: String,
    pub redundant: bool,
}

impl TestGroup {
    pub fn redundant(name: &str) -> Self {
        TestGroup {
            name: name.to_string(),
            redundant: true,
        }
    }

    pub fn plain(name: &str) -> Self {
        TestGroup {
            name: name.to_string(),
            redundant: false,
        }
    }
}

pub(crate) struct TestDependency {
    child: String,
    parent: String,
}

impl TestDependency {
    pub fn new(child: &str, parent: &str) -> Self {
        TestDependency {
            child: child.to_string(),
            parent: parent.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Cannot serialize {0}")]
pub(crate) struct TestError(String);

#[derive(Default)]
pub(crate) struct TestModel {
    held: Mutex<HashSet<String>>,
    checkables: Mutex<HashSet<String>>,
    with_dependencies: Mutex<HashSet<String>>,
    failing: Mutex<HashSet<String>>,
    identifiers: Mutex<HashMap<String, String>>,
    children: Mutex<HashMap<String, Vec<String>>>,
}

pub(crate) struct HeldObject<'a> {
    model: &'a TestModel,
    object: String,
}

impl Drop for HeldObject<'_> {
    fn drop(&mut self) {
        self.model.release(&self.object);
    }
}

impl TestModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `object` locked, as if another thread were mutating it.
    pub fn hold(&self, object: &str) -> bool {
        self.held.lock().unwrap().insert(object.to_string())
    }

    pub fn release(&self, object: &str) {
        self.held.lock().unwrap().remove(object);
    }

    pub fn set_checkable(&self, object: &str) {
        self.checkables.lock().unwrap().insert(object.to_string());
    }

    pub fn set_has_dependencies(&self, object: &str) {
        self.with_dependencies.lock().unwrap().insert(object.to_string());
    }

    pub fn fail_on(&self, object: &str) {
        self.failing.lock().unwrap().insert(object.to_string());
    }

    pub fn set_identifier(&self, group: &TestGroup, id: &str) {
        self.identifiers
            .lock()
            .unwrap()
            .insert(group.name.clone(), id.to_string());
    }

    pub fn add_child(&self, group: &TestGroup, child: &str) {
        self.children
            .lock()
            .unwrap()
            .entry(group.name.clone())
            .or_default()
            .push(child.to_string());
    }

    fn key_name(key: &StoreKeyClass) -> String {
        match key {
            StoreKeyClass::DependencyNode => "dependency_node".into(),
            StoreKeyClass::DependencyEdge => "dependency_edge".into(),
            StoreKeyClass::RedundancyGroup => "redundancy_group".into(),
            StoreKeyClass::RedundancyGroupState => "redundancy_group_state".into(),
            StoreKeyClass::DependencyEdgeState => "dependency_edge_state".into(),
            StoreKeyClass::HostState => "host_state".into(),
            StoreKeyClass::ServiceState => "service_state".into(),
            StoreKeyClass::Other(name) => name.clone(),
        }
    }

    fn deletion(command: &str, id: &str, key: &StoreKeyClass, has_checksum: bool) -> Queries {
        let mut args = vec![command.to_string(), Self::key_name(key), id.to_string()];
        if has_checksum {
            args.push("checksum".to_string());
        }
        vec![Query::new(args)]
    }
}

impl SyncModel for TestModel {
    type Object = String;
    type Group = TestGroup;
    type Dependency = TestDependency;
    type ObjectGuard<'a> = HeldObject<'a>;
    type Error = TestError;

    fn try_lock_object<'a>(&'a self, object: &String) -> Option<HeldObject<'a>> {
        if !self.hold(object) {
            return None;
        }
        Some(HeldObject {
            model: self,
            object: object.clone(),
        })
    }

    fn config_delete_queries(&self, object: &String) -> Result<Queries, TestError> {
        Ok(vec![Query::new(vec!["HDEL".to_string(), "config".to_string(), object.clone()])])
    }

    fn config_update_queries(&self, object: &String) -> Result<Queries, TestError> {
        if self.failing.lock().unwrap().contains(object) {
            return Err(TestError(object.clone()));
        }
        Ok(vec![Query::new(vec!["HSET".to_string(), "config".to_string(), object.clone()])])
    }

    fn is_checkable(&self, object: &String) -> bool {
        self.checkables.lock().unwrap().contains(object)
    }

    fn state_update_queries(&self, checkable: &String, _bits: DirtyBits) -> Result<Queries, TestError> {
        Ok(vec![Query::new(vec!["STATE".to_string(), checkable.clone()])])
    }

    fn next_update_queries(&self, checkable: &String) -> Result<Queries, TestError> {
        Ok(vec![Query::new(vec!["NEXTUPDATE".to_string(), checkable.clone()])])
    }

    fn any_child(&self, group: &TestGroup) -> Option<String> {
        self.children
            .lock()
            .unwrap()
            .get(&group.name)
            .and_then(|children| children.first().cloned())
    }

    fn dependencies_state_queries(&self, child: &String, group: &TestGroup) -> Result<Queries, TestError> {
        Ok(vec![Query::new(vec!["DEPSTATE".to_string(), child.clone(), group.name.clone()])])
    }

    fn dependency_edge_queries(&self, child: &String, group: &TestGroup) -> Result<Queries, TestError> {
        if self.group_identifier(group).is_none() {
            self.assign_group_identifier(group);
        }
        Ok(vec![Query::new(vec!["EDGE".to_string(), child.clone(), group.name.clone()])])
    }

    fn state_deletion_queries(&self, id: &str, key: &StoreKeyClass, has_checksum: bool) -> Result<Queries, TestError> {
        Ok(Self::deletion("DELSTATE", id, key, has_checksum))
    }

    fn relationship_deletion_queries(
        &self,
        id: &str,
        key: &StoreKeyClass,
        has_checksum: bool,
    ) -> Result<Queries, TestError> {
        Ok(Self::deletion("DEL", id, key, has_checksum))
    }

    fn object_identifier(&self, object: &String) -> String {
        object.clone()
    }

    fn has_any_dependencies(&self, checkable: &String) -> bool {
        self.with_dependencies.lock().unwrap().contains(checkable)
    }

    fn dependency_child(&self, dependency: &TestDependency) -> String {
        dependency.child.clone()
    }

    fn dependency_parent(&self, dependency: &TestDependency) -> String {
        dependency.parent.clone()
    }

    fn is_redundancy_group(&self, group: &TestGroup) -> bool {
        group.redundant
    }

    fn group_identifier(&self, group: &TestGroup) -> Option<String> {
        self.identifiers.lock().unwrap().get(&group.name).cloned()
    }

    fn assign_group_identifier(&self, group: &TestGroup) -> String {
        let id = format!("id:{}", group.name);
        self.set_identifier(group, &id);
        id
    }

    fn dependency_edge_state_id(&self, group: &TestGroup, dependency: &TestDependency) -> String {
        if group.redundant {
            let group_id = self
                .group_identifier(group)
                .unwrap_or_else(|| self.assign_group_identifier(group));
            self.edge_id(&group_id, &dependency.parent)
        } else {
            self.group_identifier(group)
                .unwrap_or_else(|| self.assign_group_identifier(group))
        }
    }

    fn edge_id(&self, from: &str, to: &str) -> String {
        format!("{}->{}", from, to)
    }
}

pub(crate) struct RecordingSink {
    connected: AtomicBool,
    pending: AtomicI64,
    sent: Mutex<Vec<(Queries, QueryAffects)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        RecordingSink {
            connected: AtomicBool::new(true),
            pending: AtomicI64::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn set_pending(&self, pending: i64) {
        self.pending.store(pending, Ordering::SeqCst);
    }

    /// Every query sent so far, args joined by spaces.
    pub fn sent_lines(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .flat_map(|(queries, _)| queries.iter())
            .map(|query| {
                query
                    .args()
                    .iter()
                    .map(|arg| String::from_utf8_lossy(arg).into_owned())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect()
    }

    pub fn affects(&self) -> Vec<QueryAffects> {
        self.sent.lock().unwrap().iter().map(|(_, affects)| *affects).collect()
    }
}

impl QuerySink for RecordingSink {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn pending_query_count(&self) -> i64 {
        self.pending.load(Ordering::SeqCst)
    }

    fn fire_and_forget_queries(&self, queries: Queries, affects: QueryAffects) -> Result<(), QueryError> {
        self.sent.lock().unwrap().push((queries, affects));
        Ok(())
    }
}
