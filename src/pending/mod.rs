mod container;
mod item;
mod model;
mod options;
mod queue;
#[cfg(test)]
mod testing;
mod worker;

pub use container::PendingItems;
pub use item::ConfigItem;
pub use item::DependencyEdgeItem;
pub use item::DependencyGroupStateItem;
pub use item::DirtyBits;
pub use item::PendingItem;
pub use item::PendingItemKey;
pub use item::RelationsDeletionItem;
pub use item::RelationsKeyMap;
pub use item::StoreKeyClass;
pub use model::ProcessItemError;
pub use model::QuerySink;
pub use model::SyncModel;
pub use options::PendingQueueOptions;
pub use queue::PendingItemQueue;
