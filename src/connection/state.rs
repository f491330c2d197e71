use tokio::sync::watch;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

pub(super) fn new(initial_state: ConnectionState) -> (ConnectionStateNotifier, ConnectionStateListener) {
    let (snd, rcv) = watch::channel(initial_state);

    (ConnectionStateNotifier { snd }, ConnectionStateListener { rcv })
}

pub(super) struct ConnectionStateNotifier {
    snd: watch::Sender<ConnectionState>,
}

impl ConnectionStateNotifier {
    pub(super) fn notify_new_state(&self, new_state: ConnectionState) {
        self.snd.send_if_modified(|state| {
            if *state == new_state {
                return false;
            }
            *state = new_state;
            true
        });
    }
}

#[derive(Clone)]
pub struct ConnectionStateListener {
    rcv: watch::Receiver<ConnectionState>,
}

impl ConnectionStateListener {
    pub fn current(&self) -> ConnectionState {
        *self.rcv.borrow()
    }

    /// Waits for the next state change. `None` once the connection's event loop is gone.
    pub async fn next(&mut self) -> Option<ConnectionState> {
        match self.rcv.changed().await {
            Ok(_) => Some(*self.rcv.borrow()),
            Err(_) => None,
        }
    }

    /// Returns `false` if the event loop exited before a connection was established.
    pub async fn wait_until_connected(&mut self) -> bool {
        loop {
            if self.current() == ConnectionState::Connected {
                return true;
            }
            if self.next().await.is_none() {
                return false;
            }
        }
    }

    pub(crate) fn receiver(&self) -> watch::Receiver<ConnectionState> {
        self.rcv.clone()
    }
}
