use crate::connection::connector::{CallbackCell, Connector};
use crate::connection::options::ConnectionOptionsValidated;
use crate::connection::response_reader::ResponseReader;
use crate::connection::session::QueryWriter;
use crate::connection::state::ConnectionStateNotifier;
use crate::connection::write_queue::{Disposition, FutureResponseAction, WriteKind, WriteQueue, WriteQueueItem};
use crate::connection::{ConnectionState, QueryError, Session};
use crate::protocol::{Query, QueryPriority};
use crate::stats::QueryStats;
use crate::time::Clock;
use chrono::{DateTime, Utc};
use futures::SinkExt;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

// Merged ignore actions are handed to the reader at least this often, so replies to a long run
// of fire-and-forget writes don't pile up unread.
const IGNORE_FLUSH_MAX: usize = 1024;

/// Work posted to the event loop by `Connection` handles.
pub(super) enum Command {
    Write(QueryPriority, WriteQueueItem),
    Suppress(QueryPriority),
    Unsuppress(QueryPriority),
    OldestPendingQueryTime(oneshot::Sender<Option<DateTime<Utc>>>),
}

/// Reported to the event loop by the tasks it spawned.
pub(super) enum Event {
    Connected { session_id: u64, session: Session },
    TransportLost { session_id: u64, error: QueryError },
}

struct LiveSession {
    id: u64,
    writer: QueryWriter,
    actions: mpsc::UnboundedSender<FutureResponseAction>,
    reader: JoinHandle<()>,
}

/// The single owner of a connection's write queue, live session and connect loop. Everything
/// else talks to it through `Command`s (from handles) and `Event`s (from its own tasks), so none of
/// this state is shared.
pub(super) struct ConnectionActor<C: Clock> {
    logger: slog::Logger,
    options: Arc<ConnectionOptionsValidated>,
    is_child: bool,
    clock: C,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedReceiver<Event>,
    events_sender: mpsc::UnboundedSender<Event>,
    callback: CallbackCell,
    notifier: ConnectionStateNotifier,
    stats: Arc<QueryStats>,
    stop: CancellationToken,
    terminated: CancellationToken,
    write_queue: WriteQueue,
    session: Option<LiveSession>,
    connector: Option<(u64, JoinHandle<()>)>,
    next_session_id: u64,
    pending_ignores: usize,
}

pub(super) struct ActorParts<C: Clock> {
    pub(super) options: Arc<ConnectionOptionsValidated>,
    pub(super) is_child: bool,
    pub(super) clock: C,
    pub(super) commands: mpsc::UnboundedReceiver<Command>,
    pub(super) callback: CallbackCell,
    pub(super) notifier: ConnectionStateNotifier,
    pub(super) stats: Arc<QueryStats>,
    pub(super) stop: CancellationToken,
    pub(super) terminated: CancellationToken,
}

impl<C: Clock> ConnectionActor<C> {
    pub(super) fn new(parts: ActorParts<C>) -> Self {
        let (events_sender, events) = mpsc::unbounded_channel();

        ConnectionActor {
            logger: parts.options.logger.clone(),
            options: parts.options,
            is_child: parts.is_child,
            clock: parts.clock,
            commands: parts.commands,
            events,
            events_sender,
            callback: parts.callback,
            notifier: parts.notifier,
            stats: parts.stats,
            stop: parts.stop,
            terminated: parts.terminated,
            write_queue: WriteQueue::default(),
            session: None,
            connector: None,
            next_session_id: 1,
            pending_ignores: 0,
        }
    }

    pub(super) async fn run(mut self) {
        self.spawn_connector();

        loop {
            if !self.drain_commands() {
                break;
            }
            while let Ok(event) = self.events.try_recv() {
                self.handle_event(event);
            }
            if self.stop.is_cancelled() {
                break;
            }

            if self.session.is_some() {
                if let Some(item) = self.write_queue.pop_next() {
                    self.write_item(item).await;
                    continue;
                }
            }

            // Nothing writable right now. Let the reader have everything it needs before idling.
            self.flush_ignored();

            tokio::select! {
                _ = self.stop.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    // Every handle is gone.
                    None => break,
                },
                Some(event) = self.events.recv() => self.handle_event(event),
            }
        }

        self.shutdown().await;
    }

    /// Returns `false` once no handle is left to send commands.
    fn drain_commands(&mut self) -> bool {
        loop {
            match self.commands.try_recv() {
                Ok(command) => self.handle_command(command),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Write(priority, item) => {
                // Nobody would be around to answer a promise until the next connect, so callers
                // learn about the outage right away instead.
                if item.has_promise() && self.session.is_none() {
                    self.stats.drop_pending(item.query_count());
                    item.fail(QueryError::Disconnected);
                    return;
                }
                self.write_queue.push(priority, item);
            }
            Command::Suppress(priority) => self.write_queue.suppress(priority),
            Command::Unsuppress(priority) => self.write_queue.unsuppress(priority),
            Command::OldestPendingQueryTime(reply) => {
                let _ = reply.send(self.write_queue.oldest_enqueue_time());
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Connected { session_id, session } => {
                let expected = matches!(&self.connector, Some((id, _)) if *id == session_id);
                if !expected || self.stop.is_cancelled() {
                    slog::debug!(self.logger, "Discarding stale session {}", session_id);
                    return;
                }
                self.connector = None;
                self.install_session(session);
            }
            Event::TransportLost { session_id, error } => {
                if self.session.as_ref().map(|s| s.id) == Some(session_id) {
                    self.transport_lost(error);
                }
            }
        }
    }

    fn install_session(&mut self, session: Session) {
        let session_id = session.id();
        let (reader, writer) = session.into_parts();
        let (actions, actions_rcv) = mpsc::unbounded_channel();

        let logger = self.logger.new(slog::o!("Session" => session_id));
        let response_reader =
            ResponseReader::new(session_id, logger, reader, actions_rcv, self.events_sender.clone());
        let reader = tokio::spawn(response_reader.run());

        self.session = Some(LiveSession {
            id: session_id,
            writer,
            actions,
            reader,
        });

        if self.is_child {
            slog::debug!(self.logger, "Connected to {}", self.options.endpoint);
        } else {
            slog::info!(self.logger, "Connected to {}", self.options.endpoint);
        }
        self.notifier.notify_new_state(ConnectionState::Connected);
    }

    fn transport_lost(&mut self, error: QueryError) {
        let session = match self.session.take() {
            Some(session) => session,
            None => return,
        };

        // Dropping the reader drops the promises it still held; their callers see Disconnected.
        session.reader.abort();
        slog::warn!(self.logger, "Lost connection to {}: {}", self.options.endpoint, error);
        self.pending_ignores = 0;

        for item in self.write_queue.take_promise_items() {
            self.stats.drop_pending(item.query_count());
            item.fail(QueryError::Disconnected);
        }

        self.spawn_connector();
    }

    fn spawn_connector(&mut self) {
        if self.stop.is_cancelled() {
            return;
        }

        let session_id = self.next_session_id;
        self.next_session_id += 1;

        let connector = Connector {
            session_id,
            logger: self.logger.clone(),
            options: self.options.clone(),
            is_child: self.is_child,
            callback: self.callback.clone(),
            events: self.events_sender.clone(),
            stop: self.stop.child_token(),
            clock: self.clock.clone(),
        };
        self.connector = Some((session_id, tokio::spawn(connector.run())));
        self.notifier.notify_new_state(ConnectionState::Connecting);
    }

    async fn write_item(&mut self, item: WriteQueueItem) {
        let count = item.query_count();
        let WriteQueueItem { kind, affects, .. } = item;
        if count > 0 {
            self.stats.decrease_pending(now_secs(), count);
        }

        let written = match kind {
            WriteKind::FireAndForgetOne(query) => self.write_fire_and_forget(std::slice::from_ref(&query)).await,
            WriteKind::FireAndForgetMany(queries) => self.write_fire_and_forget(&queries).await,
            WriteKind::OneWithPromise(query, promise) => match self.write_queries(std::slice::from_ref(&query)).await {
                Ok(()) => self.push_action(FutureResponseAction {
                    count: 1,
                    disposition: Disposition::FulfillOne(promise),
                }),
                Err(e) => {
                    let _ = promise.send(Err(e));
                    false
                }
            },
            WriteKind::ManyWithPromise(queries, promise) => match self.write_queries(&queries).await {
                Ok(()) => self.push_action(FutureResponseAction {
                    count: queries.len(),
                    disposition: Disposition::FulfillBatch(promise),
                }),
                Err(e) => {
                    let _ = promise.send(Err(e));
                    false
                }
            },
            WriteKind::Callback(callback) => {
                callback();
                true
            }
        };

        if written {
            self.stats.record_affected(now_secs(), affects);
        }
    }

    async fn write_fire_and_forget(&mut self, queries: &[Query]) -> bool {
        if let Err((index, e)) = self.write_queries_at(queries).await {
            if let Some(query) = queries.get(index) {
                slog::error!(
                    self.logger,
                    "Error during sending query {} which has been fired and forgotten: {}",
                    query,
                    e
                );
            }
            return false;
        }

        self.pending_ignores += queries.len();
        if self.pending_ignores >= IGNORE_FLUSH_MAX {
            self.flush_ignored();
        }
        true
    }

    async fn write_queries(&mut self, queries: &[Query]) -> Result<(), QueryError> {
        self.write_queries_at(queries).await.map_err(|(_, e)| e)
    }

    /// Writes and flushes `queries`. On failure, returns the index of the query that failed and
    /// drops the session. Once stopped, a write stuck on a full socket gets `disconnect_grace`
    /// to finish.
    async fn write_queries_at(&mut self, queries: &[Query]) -> Result<(), (usize, QueryError)> {
        let grace = self.options.disconnect_grace;
        let result = match self.session.as_mut() {
            Some(session) => {
                let write = write_all(&mut session.writer, queries);
                tokio::pin!(write);

                tokio::select! {
                    result = &mut write => result,
                    _ = self.stop.cancelled() => match tokio::time::timeout(grace, &mut write).await {
                        Ok(result) => result,
                        Err(_) => Err((0, QueryError::Transport(String::from("Write timed out during disconnect")))),
                    },
                }
            }
            None => Err((0, QueryError::Disconnected)),
        };

        if let Err((_, e)) = &result {
            self.transport_lost(e.clone());
        }
        result
    }

    /// Returns `false` if the reader is gone, in which case the action's promise has been failed.
    fn push_action(&mut self, action: FutureResponseAction) -> bool {
        self.flush_ignored();

        let session = match &self.session {
            Some(session) => session,
            None => {
                action.fail(QueryError::Disconnected);
                return false;
            }
        };

        if let Err(mpsc::error::SendError(action)) = session.actions.send(action) {
            action.fail(QueryError::Disconnected);
            return false;
        }
        true
    }

    fn flush_ignored(&mut self) {
        if self.pending_ignores == 0 {
            return;
        }

        let count = std::mem::replace(&mut self.pending_ignores, 0);
        if let Some(session) = &self.session {
            // A gone reader means the transport is being replaced; those replies are lost anyway.
            let _ = session.actions.send(FutureResponseAction::ignore(count));
        }
    }

    async fn shutdown(mut self) {
        if let Some((_, connector)) = self.connector.take() {
            connector.abort();
        }

        let mut dropped = 0;
        for item in self.write_queue.drain() {
            let count = item.query_count();
            self.stats.drop_pending(count);
            if !item.has_promise() {
                dropped += count;
            }
            item.fail(QueryError::Disconnected);
        }
        if dropped > 0 {
            slog::error!(self.logger, "Dropping {} queries which have not been written yet", dropped);
        }

        self.flush_ignored();
        self.notifier.notify_new_state(ConnectionState::Disconnected);

        if let Some(session) = self.session.take() {
            let LiveSession {
                writer,
                actions,
                mut reader,
                ..
            } = session;

            // Reader drains what's already been written, then exits once it sees the closed channel.
            drop(actions);
            if tokio::time::timeout(self.options.disconnect_grace, &mut reader).await.is_err() {
                slog::warn!(self.logger, "Replies still outstanding after grace period, closing anyway");
                reader.abort();
            }

            let mut write_half = writer.into_inner();
            if let Err(e) = write_half.shutdown().await {
                slog::debug!(self.logger, "Error while closing transport: {}", e);
            }
        }

        slog::info!(self.logger, "Disconnected from {}", self.options.endpoint);
        self.terminated.cancel();
    }
}

async fn write_all(writer: &mut QueryWriter, queries: &[Query]) -> Result<(), (usize, QueryError)> {
    for (index, query) in queries.iter().enumerate() {
        writer.feed(query).await.map_err(|e| (index, e.into()))?;
    }
    SinkExt::<&Query>::flush(writer)
        .await
        .map_err(|e| (queries.len().saturating_sub(1), e.into()))
}

pub(super) fn now_secs() -> i64 {
    Utc::now().timestamp()
}
