use crate::connection::actor::Event;
use crate::connection::session::ReplyReader;
use crate::connection::write_queue::{Disposition, FutureResponseAction};
use crate::connection::QueryError;
use crate::protocol::{Reply, RespError};
use futures::StreamExt;
use std::collections::VecDeque;
use tokio::sync::mpsc;

/// Read side of one session. Consumes `FutureResponseAction`s in the order the event loop wrote
/// their items and matches each with the next `count` replies off the wire.
///
/// Replies can arrive before the action describing them (the writer sends the action only after
/// the write completed). Those are parked in `early` and handed out first.
pub(super) struct ResponseReader {
    session_id: u64,
    logger: slog::Logger,
    reader: ReplyReader,
    actions: mpsc::UnboundedReceiver<FutureResponseAction>,
    events: mpsc::UnboundedSender<Event>,
    early: VecDeque<Reply>,
    closed: Option<QueryError>,
}

impl ResponseReader {
    pub(super) fn new(
        session_id: u64,
        logger: slog::Logger,
        reader: ReplyReader,
        actions: mpsc::UnboundedReceiver<FutureResponseAction>,
        events: mpsc::UnboundedSender<Event>,
    ) -> Self {
        ResponseReader {
            session_id,
            logger,
            reader,
            actions,
            events,
            early: VecDeque::new(),
            closed: None,
        }
    }

    pub(super) async fn run(mut self) {
        let error = loop {
            tokio::select! {
                biased;
                action = self.actions.recv() => match action {
                    Some(action) => {
                        if let Err(e) = self.apply(action).await {
                            break e;
                        }
                    }
                    // Event loop dropped its sender, i.e. it's shutting down or moved on.
                    None => return,
                },
                frame = self.reader.next() => match frame_result(frame) {
                    Ok(reply) => self.early.push_back(reply),
                    Err(e) => break e,
                },
            }
        };

        slog::warn!(self.logger, "Lost connection while reading replies: {}", error);
        self.closed = Some(error.clone());

        // Whatever was already written still gets the replies that made it here.
        self.actions.close();
        while let Some(action) = self.actions.recv().await {
            let _ = self.apply(action).await;
        }

        let _ = self.events.send(Event::TransportLost {
            session_id: self.session_id,
            error,
        });
    }

    async fn apply(&mut self, action: FutureResponseAction) -> Result<(), QueryError> {
        match action.disposition {
            Disposition::Ignore => {
                for _ in 0..action.count {
                    match self.read_one().await {
                        Ok(Reply::Error(message)) => {
                            slog::error!(self.logger, "Query which has been fired and forgotten failed: {}", message);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            slog::error!(
                                self.logger,
                                "Error during receiving the response to a query which has been fired and forgotten: {}",
                                e
                            );
                            return Err(e);
                        }
                    }
                }
            }
            Disposition::FulfillOne(promise) => match self.read_one().await {
                Ok(reply) => {
                    let _ = promise.send(Ok(reply));
                }
                Err(e) => {
                    let _ = promise.send(Err(e.clone()));
                    return Err(e);
                }
            },
            Disposition::FulfillBatch(promise) => {
                let mut replies = Vec::with_capacity(action.count);
                for _ in 0..action.count {
                    match self.read_one().await {
                        Ok(reply) => replies.push(reply),
                        Err(e) => {
                            let _ = promise.send(Err(e.clone()));
                            return Err(e);
                        }
                    }
                }
                let _ = promise.send(Ok(replies));
            }
        }

        Ok(())
    }

    async fn read_one(&mut self) -> Result<Reply, QueryError> {
        if let Some(reply) = self.early.pop_front() {
            return Ok(reply);
        }
        if let Some(error) = &self.closed {
            return Err(error.clone());
        }

        frame_result(self.reader.next().await)
    }
}

fn frame_result(frame: Option<Result<Reply, RespError>>) -> Result<Reply, QueryError> {
    match frame {
        Some(Ok(reply)) => Ok(reply),
        Some(Err(e)) => Err(e.into()),
        None => Err(QueryError::Transport(String::from("Connection closed by peer"))),
    }
}
