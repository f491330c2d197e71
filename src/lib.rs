mod connection;
mod pending;
mod protocol;
mod stats;
mod time;

pub use connection::ConnectError;
pub use connection::ConnectedCallback;
pub use connection::Connection;
pub use connection::ConnectionOptions;
pub use connection::ConnectionState;
pub use connection::ConnectionStateListener;
pub use connection::Endpoint;
pub use connection::OptionsError;
pub use connection::QueryError;
pub use connection::Session;
pub use connection::TlsOptions;
pub use pending::ConfigItem;
pub use pending::DependencyEdgeItem;
pub use pending::DependencyGroupStateItem;
pub use pending::DirtyBits;
pub use pending::PendingItem;
pub use pending::PendingItemKey;
pub use pending::PendingItemQueue;
pub use pending::PendingItems;
pub use pending::PendingQueueOptions;
pub use pending::ProcessItemError;
pub use pending::QuerySink;
pub use pending::RelationsDeletionItem;
pub use pending::RelationsKeyMap;
pub use pending::StoreKeyClass;
pub use pending::SyncModel;
pub use protocol::transaction;
pub use protocol::Queries;
pub use protocol::Query;
pub use protocol::QueryAffects;
pub use protocol::QueryPriority;
pub use protocol::Replies;
pub use protocol::Reply;
pub use protocol::RespCodec;
pub use protocol::RespError;
pub use stats::QueryStats;
pub use stats::RingBuffer;
pub use time::Clock;
pub use time::MockClock;
pub use time::MockClockController;
pub use time::RealClock;
