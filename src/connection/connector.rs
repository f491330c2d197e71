use crate::connection::actor::Event;
use crate::connection::options::ConnectionOptionsValidated;
use crate::connection::{ConnectError, ConnectedCallback, Session, Transport};
use crate::time::Clock;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

// Consecutive failures after which they're logged as errors instead of warnings.
const FAILURES_BEFORE_ERROR: u32 = 3;

pub(super) type CallbackCell = watch::Receiver<Option<Arc<dyn ConnectedCallback>>>;

/// Connect loop for one session id. Retries with a fixed backoff until a session is up and the
/// connected callback accepted it, then hands the session to the event loop and exits.
pub(super) struct Connector<C: Clock> {
    pub(super) session_id: u64,
    pub(super) logger: slog::Logger,
    pub(super) options: Arc<ConnectionOptionsValidated>,
    pub(super) is_child: bool,
    pub(super) callback: CallbackCell,
    pub(super) events: mpsc::UnboundedSender<Event>,
    pub(super) stop: CancellationToken,
    pub(super) clock: C,
}

impl<C: Clock> Connector<C> {
    pub(super) async fn run(mut self) {
        let mut failures = 0u32;

        loop {
            let attempt = tokio::select! {
                _ = self.stop.cancelled() => return,
                attempt = self.try_connect() => attempt,
            };

            match attempt {
                Ok(session) => {
                    let _ = self.events.send(Event::Connected {
                        session_id: self.session_id,
                        session,
                    });
                    return;
                }
                Err(e) => {
                    failures += 1;
                    if failures < FAILURES_BEFORE_ERROR {
                        slog::warn!(self.logger, "Cannot connect to {}: {}", self.options.endpoint, e);
                    } else {
                        slog::error!(
                            self.logger,
                            "Cannot connect to {}: {} ({} consecutive failures)",
                            self.options.endpoint,
                            e,
                            failures
                        );
                    }
                }
            }

            let backoff = self.options.reconnect_backoff;
            tokio::select! {
                _ = self.stop.cancelled() => return,
                _ = self.clock.sleep(backoff) => {}
            }
        }
    }

    async fn try_connect(&self) -> Result<Session, ConnectError> {
        if self.is_child {
            slog::debug!(self.logger, "Trying to connect to {}", self.options.endpoint);
        } else {
            slog::info!(self.logger, "Trying to connect to {}", self.options.endpoint);
        }

        let mut session = tokio::time::timeout(self.options.connect_timeout, self.open_session())
            .await
            .map_err(|_| ConnectError::Timeout)??;

        // Copy out so the callback may replace itself while it runs.
        let callback = self.callback.borrow().clone();
        if let Some(callback) = callback {
            callback
                .on_connected(&mut session)
                .await
                .map_err(|e| ConnectError::Callback(e.to_string()))?;
        }

        Ok(session)
    }

    async fn open_session(&self) -> Result<Session, ConnectError> {
        let transport = Transport::open(&self.options.endpoint).await?;
        let mut session = Session::new(self.session_id, self.logger.clone(), transport);
        session
            .handshake(self.options.password.as_deref(), self.options.db_index)
            .await?;

        Ok(session)
    }
}
