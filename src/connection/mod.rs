mod actor;
mod connector;
mod error;
mod handle;
mod options;
mod response_reader;
mod session;
mod state;
mod transport;
mod write_queue;

pub use error::ConnectError;
pub use error::OptionsError;
pub use error::QueryError;
pub use handle::Connection;
pub use options::ConnectionOptions;
pub use options::Endpoint;
pub use options::TlsOptions;
pub use session::ConnectedCallback;
pub use session::Session;
pub use state::ConnectionState;
pub use state::ConnectionStateListener;
pub(crate) use transport::Transport;
