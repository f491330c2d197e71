use crate::connection::{ConnectError, QueryError, Transport};
use crate::protocol::{Queries, Query, Replies, Reply, RespCodec};
use futures::{SinkExt, StreamExt};
use tokio::io::{ReadHalf, WriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite};

pub(crate) type ReplyReader = FramedRead<ReadHalf<Transport>, RespCodec>;
pub(crate) type QueryWriter = FramedWrite<WriteHalf<Transport>, RespCodec>;

/// Runs right after a (re)connect, before any queued work is released onto the new session.
/// Returning an error abandons the session and the connect loop tries again after its backoff.
#[async_trait::async_trait]
pub trait ConnectedCallback: Send + Sync {
    async fn on_connected(&self, session: &mut Session) -> Result<(), QueryError>;
}

/// A freshly opened transport that isn't yet owned by the connection's event loop. Queries sent
/// through it bypass the write queue, so it's only handed out during the handshake and to the
/// connected callback.
pub struct Session {
    id: u64,
    logger: slog::Logger,
    reader: ReplyReader,
    writer: QueryWriter,
}

impl Session {
    pub(crate) fn new(id: u64, logger: slog::Logger, transport: Transport) -> Self {
        let (read_half, write_half) = tokio::io::split(transport);

        Session {
            id,
            logger: logger.new(slog::o!("Session" => id)),
            reader: FramedRead::new(read_half, RespCodec),
            writer: FramedWrite::new(write_half, RespCodec),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn query(&mut self, query: &Query) -> Result<Reply, QueryError> {
        self.writer.send(query).await?;
        self.read_reply().await
    }

    /// Pipelines `queries` and collects their replies in order.
    pub async fn queries(&mut self, queries: &[Query]) -> Result<Replies, QueryError> {
        for query in queries {
            self.writer.feed(query).await?;
        }
        SinkExt::<&Query>::flush(&mut self.writer).await?;

        let mut replies = Vec::with_capacity(queries.len());
        for _ in queries {
            replies.push(self.read_reply().await?);
        }

        Ok(replies)
    }

    async fn read_reply(&mut self) -> Result<Reply, QueryError> {
        match self.reader.next().await {
            Some(reply) => Ok(reply?),
            None => Err(QueryError::Transport(String::from("Connection closed by peer"))),
        }
    }

    /// Authenticates and selects the database. With neither configured, a `PING` still makes sure
    /// the store accepts commands from us (e.g. it doesn't answer NOAUTH).
    pub(crate) async fn handshake(&mut self, password: Option<&str>, db_index: u32) -> Result<(), ConnectError> {
        if password.is_none() && db_index == 0 {
            let pong = self.query(&Query::new(vec!["PING"])).await.map_err(handshake_error)?;
            if let Reply::Error(message) = pong {
                return Err(ConnectError::Handshake(message));
            }

            return Ok(());
        }

        let mut queries: Queries = Vec::with_capacity(2);
        if let Some(password) = password {
            queries.push(Query::new(vec![String::from("AUTH"), password.to_string()]));
        }
        if db_index != 0 {
            queries.push(Query::new(vec![String::from("SELECT"), db_index.to_string()]));
        }

        let mut replies = self.queries(&queries).await.map_err(handshake_error)?.into_iter();

        if password.is_some() {
            if let Some(Reply::Error(message)) = replies.next() {
                // Store has no password configured; talking to it works anyway.
                if message.starts_with("ERR AUTH ") {
                    slog::warn!(self.logger, "{}", message);
                } else {
                    return Err(ConnectError::Handshake(message));
                }
            }
        }

        if db_index != 0 {
            if let Some(Reply::Error(message)) = replies.next() {
                return Err(ConnectError::Handshake(message));
            }
        }

        Ok(())
    }

    pub(crate) fn into_parts(self) -> (ReplyReader, QueryWriter) {
        (self.reader, self.writer)
    }
}

fn handshake_error(e: QueryError) -> ConnectError {
    ConnectError::Handshake(e.to_string())
}
