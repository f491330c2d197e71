use crate::connection::OptionsError;
use std::convert::TryFrom;
use std::fmt;
use std::path::PathBuf;
use tokio::time::Duration;

/// Where the store listens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    Tcp {
        host: String,
        port: u16,
        tls: Option<TlsOptions>,
    },
    Unix {
        path: PathBuf,
    },
}

impl Endpoint {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Endpoint::Tcp {
            host: host.into(),
            port,
            tls: None,
        }
    }

    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Endpoint::Unix { path: path.into() }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port, tls: None } => write!(f, "{}:{}", host, port),
            Endpoint::Tcp { host, port, tls: Some(_) } => write!(f, "{}:{} (TLS)", host, port),
            Endpoint::Unix { path } => write!(f, "unix:{}", path.display()),
        }
    }
}

/// PEM files. The client certificate and key go together, the key in PKCS#8 form.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TlsOptions {
    pub ca_path: Option<PathBuf>,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    /// Skip certificate and hostname verification.
    pub insecure: bool,
}

#[derive(Clone, Default)]
pub struct ConnectionOptions {
    pub name: Option<String>,
    pub logger: Option<slog::Logger>,
    pub endpoint: Option<Endpoint>,
    pub password: Option<String>,
    pub db_index: Option<u32>,
    pub connect_timeout: Option<Duration>,
    pub reconnect_backoff: Option<Duration>,
    pub disconnect_grace: Option<Duration>,
    pub stats_interval: Option<Duration>,
    pub stats_log_timeout: Option<Duration>,
}

#[derive(Clone)]
pub(crate) struct ConnectionOptionsValidated {
    pub name: String,
    pub logger: slog::Logger,
    pub endpoint: Endpoint,
    pub password: Option<String>,
    pub db_index: u32,
    pub connect_timeout: Duration,
    pub reconnect_backoff: Duration,
    pub disconnect_grace: Duration,
    pub stats_interval: Duration,
    pub stats_log_timeout: Duration,
}

impl ConnectionOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        let durations = [
            self.connect_timeout,
            self.reconnect_backoff,
            self.disconnect_grace,
            self.stats_interval,
            self.stats_log_timeout,
        ];
        if durations.iter().any(|d| *d == Duration::from_secs(0)) {
            return Err("Durations must be greater than zero");
        }
        if let Endpoint::Tcp { tls: Some(tls), .. } = &self.endpoint {
            if tls.cert_path.is_some() != tls.key_path.is_some() {
                return Err("TLS client certificate and key must be given together");
            }
        }
        if let Some(password) = &self.password {
            if password.is_empty() {
                return Err("Password must not be empty when set");
            }
        }

        Ok(())
    }
}

impl TryFrom<ConnectionOptions> for ConnectionOptionsValidated {
    type Error = OptionsError;

    fn try_from(options: ConnectionOptions) -> Result<Self, Self::Error> {
        let name = options.name.unwrap_or_else(|| String::from("store"));
        let logger = options
            .logger
            .unwrap_or_else(|| slog::Logger::root(slog::Discard, slog::o!()))
            .new(slog::o!("Connection" => name.clone()));

        let values = ConnectionOptionsValidated {
            name,
            logger,
            endpoint: options.endpoint.ok_or(OptionsError("Endpoint is required"))?,
            password: options.password,
            db_index: options.db_index.unwrap_or(0),
            connect_timeout: options.connect_timeout.unwrap_or(Duration::from_secs(15)),
            reconnect_backoff: options.reconnect_backoff.unwrap_or(Duration::from_secs(5)),
            disconnect_grace: options.disconnect_grace.unwrap_or(Duration::from_secs(5)),
            stats_interval: options.stats_interval.unwrap_or(Duration::from_secs(10)),
            stats_log_timeout: options.stats_log_timeout.unwrap_or(Duration::from_secs(5 * 60)),
        };

        values.validate().map_err(OptionsError)?;
        Ok(values)
    }
}
