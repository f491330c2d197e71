mod codec;
mod query;
mod reply;

pub use codec::RespCodec;
pub use codec::RespError;
pub use query::transaction;
pub use query::Queries;
pub use query::Query;
pub use query::QueryAffects;
pub use query::QueryPriority;
pub use reply::Replies;
pub use reply::Reply;
