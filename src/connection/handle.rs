use crate::connection::actor::{now_secs, ActorParts, Command, ConnectionActor};
use crate::connection::options::{ConnectionOptions, ConnectionOptionsValidated};
use crate::connection::write_queue::{WriteKind, WriteQueueItem};
use crate::connection::{state, ConnectedCallback, ConnectionState, ConnectionStateListener, OptionsError, QueryError};
use crate::protocol::{Queries, Query, QueryAffects, QueryPriority, Replies, Reply};
use crate::stats::{QueryStats, StatsReporter};
use crate::time::RealClock;
use chrono::{DateTime, Utc};
use std::convert::TryFrom;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

/// Handle to one pipelined store connection. Cheap to clone; every clone talks to the same event
/// loop. The loop keeps running until `disconnect()` is called or every handle is dropped.
///
/// Must be created from within a tokio runtime.
#[derive(Clone)]
pub struct Connection {
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
}

struct Shared {
    logger: slog::Logger,
    stats: Arc<QueryStats>,
    state: ConnectionStateListener,
    callback: watch::Sender<Option<Arc<dyn ConnectedCallback>>>,
    stop: CancellationToken,
    terminated: CancellationToken,
}

impl Connection {
    pub fn new(options: ConnectionOptions) -> Result<Self, OptionsError> {
        Self::spawn(options, None)
    }

    /// A connection with its own transport that draws from `parent`'s pending-query budget and
    /// counters, so several of them can be flow-controlled as one.
    pub fn new_child(parent: &Connection, options: ConnectionOptions) -> Result<Self, OptionsError> {
        Self::spawn(options, Some(parent.shared.stats.clone()))
    }

    fn spawn(options: ConnectionOptions, parent_stats: Option<Arc<QueryStats>>) -> Result<Self, OptionsError> {
        let options = Arc::new(ConnectionOptionsValidated::try_from(options)?);
        let is_child = parent_stats.is_some();
        let stats = parent_stats.unwrap_or_else(|| Arc::new(QueryStats::new()));

        let (commands, commands_rcv) = mpsc::unbounded_channel();
        let (notifier, listener) = state::new(ConnectionState::Disconnected);
        let (callback, callback_rcv) = watch::channel(None);
        let stop = CancellationToken::new();
        let terminated = CancellationToken::new();

        if !is_child {
            let reporter = StatsReporter {
                logger: options.logger.clone(),
                stats: stats.clone(),
                state: listener.receiver(),
                clock: RealClock,
                interval: options.stats_interval,
                log_timeout: options.stats_log_timeout,
                stop: stop.clone(),
            };
            tokio::spawn(reporter.run());
        }

        let actor = ConnectionActor::new(ActorParts {
            options: options.clone(),
            is_child,
            clock: RealClock,
            commands: commands_rcv,
            callback: callback_rcv,
            notifier,
            stats: stats.clone(),
            stop: stop.clone(),
            terminated: terminated.clone(),
        });
        tokio::spawn(actor.run());

        Ok(Connection {
            commands,
            shared: Arc::new(Shared {
                logger: options.logger.clone(),
                stats,
                state: listener,
                callback,
                stop,
                terminated,
            }),
        })
    }

    /// Queues `query` without waiting for its reply. Failures after this point are only logged.
    pub fn fire_and_forget_query(
        &self,
        query: Query,
        affects: QueryAffects,
        priority: QueryPriority,
    ) -> Result<(), QueryError> {
        slog::debug!(self.shared.logger, "Firing and forgetting query: {}", query);
        self.submit(priority, WriteQueueItem::new(WriteKind::FireAndForgetOne(query), affects))
    }

    pub fn fire_and_forget_queries(&self, queries: Queries, affects: QueryAffects) -> Result<(), QueryError> {
        for query in &queries {
            slog::debug!(self.shared.logger, "Firing and forgetting query: {}", query);
        }
        self.submit(
            QueryPriority::Normal,
            WriteQueueItem::new(WriteKind::FireAndForgetMany(queries), affects),
        )
    }

    /// Queues `query` and waits for its reply. An error reply from the store is still `Ok`.
    pub async fn get_result_of_query(&self, query: Query, affects: QueryAffects) -> Result<Reply, QueryError> {
        slog::debug!(self.shared.logger, "Executing query: {}", query);

        let (tx, rx) = oneshot::channel();
        self.submit(
            QueryPriority::Normal,
            WriteQueueItem::new(WriteKind::OneWithPromise(query, tx), affects),
        )?;

        rx.await.unwrap_or(Err(QueryError::Disconnected))
    }

    /// Queues `queries` as one unit and waits for all their replies, in order.
    pub async fn get_results_of_queries(
        &self,
        queries: Queries,
        affects: QueryAffects,
        priority: QueryPriority,
    ) -> Result<Replies, QueryError> {
        for query in &queries {
            slog::debug!(self.shared.logger, "Executing query: {}", query);
        }

        let (tx, rx) = oneshot::channel();
        self.submit(
            priority,
            WriteQueueItem::new(WriteKind::ManyWithPromise(queries, tx), affects),
        )?;

        rx.await.unwrap_or(Err(QueryError::Disconnected))
    }

    /// Runs `callback` on the event loop once everything queued before it has been written.
    pub fn enqueue_callback<F>(&self, callback: F, priority: QueryPriority) -> Result<(), QueryError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(
            priority,
            WriteQueueItem::new(WriteKind::Callback(Box::new(callback)), QueryAffects::default()),
        )
    }

    /// Waits until the store has answered everything queued so far.
    pub async fn sync(&self) -> Result<(), QueryError> {
        match self
            .get_result_of_query(Query::new(vec!["PING"]), QueryAffects::default())
            .await?
        {
            Reply::Error(message) => Err(QueryError::Protocol(message)),
            _ => Ok(()),
        }
    }

    /// Stops the connection. Idempotent; every call returns once the event loop has exited.
    pub async fn disconnect(&self) {
        self.shared.stop.cancel();
        self.shared.terminated.cancelled().await;
    }

    pub fn set_connected_callback(&self, callback: Option<Arc<dyn ConnectedCallback>>) {
        self.shared.callback.send_replace(callback);
    }

    /// Holds back queued items of `priority` until `unsuppress_query_kind` is called.
    pub fn suppress_query_kind(&self, priority: QueryPriority) {
        let _ = self.commands.send(Command::Suppress(priority));
    }

    pub fn unsuppress_query_kind(&self, priority: QueryPriority) {
        let _ = self.commands.send(Command::Unsuppress(priority));
    }

    /// Enqueue time of the oldest item still waiting to be written, ignoring suppressed kinds.
    pub async fn oldest_pending_query_time(&self) -> Option<DateTime<Utc>> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::OldestPendingQueryTime(tx)).ok()?;
        rx.await.ok().flatten()
    }

    pub fn is_connected(&self) -> bool {
        !self.shared.stop.is_cancelled() && self.shared.state.current() == ConnectionState::Connected
    }

    pub fn state_listener(&self) -> ConnectionStateListener {
        self.shared.state.clone()
    }

    /// Returns `false` if the connection was stopped before it ever got connected.
    pub async fn wait_until_connected(&self) -> bool {
        let mut listener = self.state_listener();
        tokio::select! {
            connected = listener.wait_until_connected() => connected,
            _ = self.shared.stop.cancelled() => false,
        }
    }

    /// Queries queued but not yet written, across this connection's whole parent/child tree.
    pub fn pending_query_count(&self) -> i64 {
        self.shared.stats.pending()
    }

    /// Queries written within the last `span_secs` seconds.
    pub fn query_count(&self, span_secs: usize) -> u64 {
        self.shared.stats.query_count(now_secs(), span_secs)
    }

    pub fn written_config_for(&self, span_secs: usize) -> u64 {
        self.shared.stats.written_config_for(now_secs(), span_secs)
    }

    pub fn written_state_for(&self, span_secs: usize) -> u64 {
        self.shared.stats.written_state_for(now_secs(), span_secs)
    }

    pub fn written_history_for(&self, span_secs: usize) -> u64 {
        self.shared.stats.written_history_for(now_secs(), span_secs)
    }

    fn submit(&self, priority: QueryPriority, item: WriteQueueItem) -> Result<(), QueryError> {
        if self.shared.stop.is_cancelled() {
            return Err(QueryError::Disconnected);
        }

        let count = item.query_count();
        if count > 0 {
            self.shared.stats.increase_pending(now_secs(), count);
        }

        if self.commands.send(Command::Write(priority, item)).is_err() {
            self.shared.stats.drop_pending(count);
            return Err(QueryError::Disconnected);
        }
        Ok(())
    }
}
