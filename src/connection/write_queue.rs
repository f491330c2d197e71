use crate::connection::QueryError;
use crate::protocol::{Queries, Query, QueryAffects, QueryPriority, Replies, Reply};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;
use tokio::sync::oneshot;

pub(crate) type ReplyPromise = oneshot::Sender<Result<Reply, QueryError>>;
pub(crate) type RepliesPromise = oneshot::Sender<Result<Replies, QueryError>>;
pub(crate) type Callback = Box<dyn FnOnce() + Send>;

pub(crate) struct WriteQueueItem {
    pub(crate) kind: WriteKind,
    pub(crate) enqueued_at: DateTime<Utc>,
    pub(crate) affects: QueryAffects,
}

pub(crate) enum WriteKind {
    FireAndForgetOne(Query),
    FireAndForgetMany(Queries),
    OneWithPromise(Query, ReplyPromise),
    ManyWithPromise(Queries, RepliesPromise),
    Callback(Callback),
}

impl WriteQueueItem {
    pub(crate) fn new(kind: WriteKind, affects: QueryAffects) -> Self {
        WriteQueueItem {
            kind,
            enqueued_at: Utc::now(),
            affects,
        }
    }

    /// How many queries this item contributes to the pending-query count.
    pub(crate) fn query_count(&self) -> usize {
        match &self.kind {
            WriteKind::FireAndForgetOne(_) | WriteKind::OneWithPromise(..) => 1,
            WriteKind::FireAndForgetMany(queries) | WriteKind::ManyWithPromise(queries, _) => queries.len(),
            WriteKind::Callback(_) => 0,
        }
    }

    pub(crate) fn has_promise(&self) -> bool {
        matches!(self.kind, WriteKind::OneWithPromise(..) | WriteKind::ManyWithPromise(..))
    }

    /// Completes the item without writing it. Promises get `error`, anything else is dropped.
    pub(crate) fn fail(self, error: QueryError) {
        match self.kind {
            WriteKind::OneWithPromise(_, promise) => {
                let _ = promise.send(Err(error));
            }
            WriteKind::ManyWithPromise(_, promise) => {
                let _ = promise.send(Err(error));
            }
            WriteKind::FireAndForgetOne(_) | WriteKind::FireAndForgetMany(_) | WriteKind::Callback(_) => {}
        }
    }
}

impl fmt::Debug for WriteQueueItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            WriteKind::FireAndForgetOne(_) => "FireAndForgetOne",
            WriteKind::FireAndForgetMany(_) => "FireAndForgetMany",
            WriteKind::OneWithPromise(..) => "OneWithPromise",
            WriteKind::ManyWithPromise(..) => "ManyWithPromise",
            WriteKind::Callback(_) => "Callback",
        };
        f.debug_struct("WriteQueueItem")
            .field("kind", &kind)
            .field("queries", &self.query_count())
            .field("enqueued_at", &self.enqueued_at)
            .finish()
    }
}

/// Tells the response reader how many upcoming replies belong to one written item and what to do
/// with them. Produced and consumed in write order; that order alone correlates replies.
pub(crate) struct FutureResponseAction {
    pub(crate) count: usize,
    pub(crate) disposition: Disposition,
}

pub(crate) enum Disposition {
    Ignore,
    FulfillOne(ReplyPromise),
    FulfillBatch(RepliesPromise),
}

impl FutureResponseAction {
    pub(crate) fn ignore(count: usize) -> Self {
        FutureResponseAction {
            count,
            disposition: Disposition::Ignore,
        }
    }

    pub(crate) fn fail(self, error: QueryError) {
        match self.disposition {
            Disposition::Ignore => {}
            Disposition::FulfillOne(promise) => {
                let _ = promise.send(Err(error));
            }
            Disposition::FulfillBatch(promise) => {
                let _ = promise.send(Err(error));
            }
        }
    }
}

/// Items waiting to be written, one FIFO per priority class. Suppressed classes keep their items
/// but are skipped by `pop_next`.
#[derive(Default)]
pub(crate) struct WriteQueue {
    queues: BTreeMap<QueryPriority, VecDeque<WriteQueueItem>>,
    suppressed: HashSet<QueryPriority>,
}

impl WriteQueue {
    pub(crate) fn push(&mut self, priority: QueryPriority, item: WriteQueueItem) {
        self.queues.entry(priority).or_default().push_back(item);
    }

    pub(crate) fn pop_next(&mut self) -> Option<WriteQueueItem> {
        let suppressed = &self.suppressed;
        self.queues
            .iter_mut()
            .filter(|(priority, _)| !suppressed.contains(*priority))
            .find_map(|(_, queue)| queue.pop_front())
    }

    pub(crate) fn suppress(&mut self, priority: QueryPriority) {
        self.suppressed.insert(priority);
    }

    pub(crate) fn unsuppress(&mut self, priority: QueryPriority) {
        self.suppressed.remove(&priority);
    }

    pub(crate) fn oldest_enqueue_time(&self) -> Option<DateTime<Utc>> {
        self.queues
            .iter()
            .filter(|(priority, _)| !self.suppressed.contains(*priority))
            .filter_map(|(_, queue)| queue.front().map(|item| item.enqueued_at))
            .min()
    }

    /// Removes every promise-bearing item, keeping the relative order of the rest.
    pub(crate) fn take_promise_items(&mut self) -> Vec<WriteQueueItem> {
        let mut taken = Vec::new();
        for queue in self.queues.values_mut() {
            let (promises, rest): (VecDeque<_>, VecDeque<_>) = queue.drain(..).partition(|item| item.has_promise());
            *queue = rest;
            taken.extend(promises);
        }

        taken
    }

    pub(crate) fn drain(&mut self) -> Vec<WriteQueueItem> {
        self.queues.values_mut().flat_map(|queue| queue.drain(..)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fire_and_forget(arg: &'static str) -> WriteQueueItem {
        WriteQueueItem::new(WriteKind::FireAndForgetOne(Query::new(vec!["SET", arg, "1"])), QueryAffects::default())
    }

    fn key_of(item: &WriteQueueItem) -> Vec<u8> {
        match &item.kind {
            WriteKind::FireAndForgetOne(query) => query.args()[1].to_vec(),
            _ => panic!("Unexpected item {:?}", item),
        }
    }

    #[test]
    fn high_priority_first_then_fifo() {
        let mut queue = WriteQueue::default();
        queue.push(QueryPriority::Normal, fire_and_forget("n1"));
        queue.push(QueryPriority::High, fire_and_forget("h1"));
        queue.push(QueryPriority::Normal, fire_and_forget("n2"));
        queue.push(QueryPriority::High, fire_and_forget("h2"));

        let order: Vec<_> = std::iter::from_fn(|| queue.pop_next()).map(|i| key_of(&i)).collect();
        assert_eq!(order, vec![b"h1".to_vec(), b"h2".to_vec(), b"n1".to_vec(), b"n2".to_vec()]);
    }

    #[test]
    fn suppressed_class_is_held_back() {
        let mut queue = WriteQueue::default();
        queue.push(QueryPriority::High, fire_and_forget("h1"));
        queue.push(QueryPriority::Normal, fire_and_forget("n1"));

        queue.suppress(QueryPriority::High);
        assert_eq!(key_of(&queue.pop_next().unwrap()), b"n1".to_vec());
        assert!(queue.pop_next().is_none());
        assert_eq!(queue.oldest_enqueue_time(), None);

        queue.unsuppress(QueryPriority::High);
        assert!(queue.oldest_enqueue_time().is_some());
        assert_eq!(key_of(&queue.pop_next().unwrap()), b"h1".to_vec());
    }

    #[tokio::test]
    async fn promise_items_are_taken_out() {
        let mut queue = WriteQueue::default();
        let (tx, rx) = oneshot::channel();
        queue.push(QueryPriority::Normal, fire_and_forget("n1"));
        queue.push(
            QueryPriority::Normal,
            WriteQueueItem::new(WriteKind::OneWithPromise(Query::new(vec!["GET", "a"]), tx), QueryAffects::default()),
        );
        queue.push(QueryPriority::Normal, fire_and_forget("n2"));

        let taken = queue.take_promise_items();
        assert_eq!(taken.len(), 1);
        taken.into_iter().for_each(|item| item.fail(QueryError::Disconnected));
        assert_eq!(rx.await.unwrap(), Err(QueryError::Disconnected));

        let rest: Vec<_> = queue.drain().iter().map(key_of).collect();
        assert_eq!(rest, vec![b"n1".to_vec(), b"n2".to_vec()]);
    }
}
