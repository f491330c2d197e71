mod common;

use common::{eventually, FakeStore};
use std::collections::HashMap;
use std::convert::Infallible;
use std::error::Error;
use std::sync::{Arc, Mutex, MutexGuard};
use store_sync::{
    Connection, ConnectionOptions, DirtyBits, Endpoint, PendingItemQueue, PendingQueueOptions, Queries, Query,
    StoreKeyClass, SyncModel,
};
use tokio::time::{timeout, Duration};

/// Hosts with a single string attribute, written to the `config:host` hash. No dependencies.
#[derive(Default)]
struct HostInventory {
    hosts: Mutex<HashMap<String, String>>,
    write_lock: Mutex<()>,
}

impl HostInventory {
    fn set(&self, host: &str, address: &str) {
        self.hosts.lock().unwrap().insert(host.to_string(), address.to_string());
    }
}

fn query(args: Vec<String>) -> Query {
    Query::new(args)
}

impl SyncModel for HostInventory {
    type Object = String;
    type Group = String;
    type Dependency = (String, String);
    type ObjectGuard<'a> = MutexGuard<'a, ()>;
    type Error = Infallible;

    fn try_lock_object<'a>(&'a self, _object: &String) -> Option<MutexGuard<'a, ()>> {
        self.write_lock.try_lock().ok()
    }

    fn config_delete_queries(&self, host: &String) -> Result<Queries, Infallible> {
        Ok(vec![query(vec!["HDEL".into(), "config:host".into(), host.clone()])])
    }

    fn config_update_queries(&self, host: &String) -> Result<Queries, Infallible> {
        let address = self.hosts.lock().unwrap().get(host).cloned().unwrap_or_default();
        Ok(vec![query(vec!["HSET".into(), "config:host".into(), host.clone(), address])])
    }

    fn is_checkable(&self, _object: &String) -> bool {
        true
    }

    fn state_update_queries(&self, host: &String, _bits: DirtyBits) -> Result<Queries, Infallible> {
        Ok(vec![query(vec!["HSET".into(), "state:host".into(), host.clone(), "up".into()])])
    }

    fn next_update_queries(&self, _host: &String) -> Result<Queries, Infallible> {
        Ok(Vec::new())
    }

    fn any_child(&self, _group: &String) -> Option<String> {
        None
    }

    fn dependencies_state_queries(&self, _child: &String, _group: &String) -> Result<Queries, Infallible> {
        Ok(Vec::new())
    }

    fn dependency_edge_queries(&self, _child: &String, _group: &String) -> Result<Queries, Infallible> {
        Ok(Vec::new())
    }

    fn state_deletion_queries(&self, id: &str, _key: &StoreKeyClass, _checksum: bool) -> Result<Queries, Infallible> {
        Ok(vec![query(vec!["HDEL".into(), "state:host".into(), id.to_string()])])
    }

    fn relationship_deletion_queries(
        &self,
        id: &str,
        _key: &StoreKeyClass,
        _checksum: bool,
    ) -> Result<Queries, Infallible> {
        Ok(vec![query(vec!["HDEL".into(), "relation".into(), id.to_string()])])
    }

    fn object_identifier(&self, host: &String) -> String {
        host.clone()
    }

    fn has_any_dependencies(&self, _host: &String) -> bool {
        false
    }

    fn dependency_child(&self, dependency: &(String, String)) -> String {
        dependency.0.clone()
    }

    fn dependency_parent(&self, dependency: &(String, String)) -> String {
        dependency.1.clone()
    }

    fn is_redundancy_group(&self, _group: &String) -> bool {
        false
    }

    fn group_identifier(&self, group: &String) -> Option<String> {
        Some(group.clone())
    }

    fn assign_group_identifier(&self, group: &String) -> String {
        group.clone()
    }

    fn dependency_edge_state_id(&self, group: &String, _dependency: &(String, String)) -> String {
        group.clone()
    }

    fn edge_id(&self, from: &str, to: &str) -> String {
        format!("{}:{}", from, to)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn changes_reach_the_store_coalesced() -> Result<(), Box<dyn Error>> {
    let store = FakeStore::start().await;
    let connection = Connection::new(ConnectionOptions {
        endpoint: Some(Endpoint::tcp("127.0.0.1", store.port())),
        ..Default::default()
    })?;
    assert!(timeout(Duration::from_secs(5), connection.wait_until_connected()).await?);

    let queue_options = PendingQueueOptions {
        debounce_window: Some(Duration::from_millis(100)),
        ..Default::default()
    };
    let queue = Arc::new(PendingItemQueue::new(
        queue_options,
        HostInventory::default(),
        connection.clone(),
    )?);
    queue.start()?;

    queue.model().set("web1", "10.0.0.1");
    queue.enqueue_config_object("web1".into(), DirtyBits::CONFIG_UPDATE);
    queue.model().set("web1", "10.0.0.2");
    queue.enqueue_config_object("web1".into(), DirtyBits::CONFIG_UPDATE | DirtyBits::VOLATILE_STATE);

    eventually(Duration::from_secs(5), || store.hash_field("state:host", "web1").is_some()).await;
    assert_eq!(store.hash_field("config:host", "web1"), Some("10.0.0.2".to_string()));
    let writes: Vec<_> = store
        .command_lines()
        .into_iter()
        .filter(|line| line.starts_with("HSET config:host"))
        .collect();
    assert_eq!(writes, vec!["HSET config:host web1 10.0.0.2"]);

    queue.enqueue_config_object("web1".into(), DirtyBits::CONFIG_DELETE);
    eventually(Duration::from_secs(5), || store.hash_field("config:host", "web1").is_none()).await;

    let stopper = queue.clone();
    tokio::task::spawn_blocking(move || stopper.stop()).await?;
    connection.disconnect().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn nothing_is_queued_while_disconnected() -> Result<(), Box<dyn Error>> {
    let store = FakeStore::start().await;
    let connection = Connection::new(ConnectionOptions {
        endpoint: Some(Endpoint::tcp("127.0.0.1", store.port())),
        ..Default::default()
    })?;
    assert!(timeout(Duration::from_secs(5), connection.wait_until_connected()).await?);
    connection.disconnect().await;

    let queue = Arc::new(PendingItemQueue::new(
        PendingQueueOptions::default(),
        HostInventory::default(),
        connection.clone(),
    )?);
    queue.start()?;
    queue.enqueue_config_object("web1".into(), DirtyBits::CONFIG_UPDATE);
    assert!(queue.is_empty());

    let stopper = queue.clone();
    tokio::task::spawn_blocking(move || stopper.stop()).await?;
    Ok(())
}
