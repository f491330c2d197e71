#![allow(dead_code)]

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use slog::Drain;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use store_sync::{Reply, RespCodec};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio::time::{Duration, Instant};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

/// In-process store speaking just enough RESP for the tests. Every command it receives is
/// recorded, in order, across all client connections.
pub struct FakeStore {
    addr: Option<SocketAddr>,
    shared: Arc<StoreShared>,
    shutdown: CancellationToken,
}

#[derive(Default)]
struct StoreShared {
    password: Option<String>,
    data: Mutex<HashMap<Bytes, Bytes>>,
    hashes: Mutex<HashMap<Bytes, HashMap<Bytes, Bytes>>>,
    commands: Mutex<Vec<Vec<String>>>,
    connections: AtomicUsize,
    kill: Mutex<CancellationToken>,
}

impl FakeStore {
    pub async fn start() -> FakeStore {
        Self::start_on("127.0.0.1:0".parse().unwrap(), None).await
    }

    pub async fn start_with_password(password: &str) -> FakeStore {
        Self::start_on("127.0.0.1:0".parse().unwrap(), Some(password.to_string())).await
    }

    pub async fn start_on(addr: SocketAddr, password: Option<String>) -> FakeStore {
        let listener = TcpListener::bind(addr).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = Arc::new(StoreShared {
            password,
            ..Default::default()
        });
        let shutdown = CancellationToken::new();

        tokio::spawn(accept_loop(listener, shared.clone(), shutdown.clone()));

        FakeStore {
            addr: Some(addr),
            shared,
            shutdown,
        }
    }

    #[cfg(unix)]
    pub async fn start_unix(path: &Path) -> FakeStore {
        let _ = std::fs::remove_file(path);
        let listener = UnixListener::bind(path).unwrap();
        let shared = Arc::new(StoreShared::default());
        let shutdown = CancellationToken::new();

        let accept_shared = shared.clone();
        let accept_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                let stream = tokio::select! {
                    _ = accept_shutdown.cancelled() => return,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _)) => stream,
                        Err(_) => return,
                    },
                };
                accept_shared.connections.fetch_add(1, Ordering::SeqCst);
                let kill = accept_shared.kill.lock().unwrap().clone();
                tokio::spawn(serve(stream, accept_shared.clone(), kill));
            }
        });

        FakeStore {
            addr: None,
            shared,
            shutdown,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.expect("Store listens on a unix socket").port()
    }

    pub fn commands(&self) -> Vec<Vec<String>> {
        self.shared.commands.lock().unwrap().clone()
    }

    /// Commands received, each rendered as its args joined by spaces.
    pub fn command_lines(&self) -> Vec<String> {
        self.commands().into_iter().map(|args| args.join(" ")).collect()
    }

    pub fn connection_count(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    pub fn hash_field(&self, key: &str, field: &str) -> Option<String> {
        let hashes = self.shared.hashes.lock().unwrap();
        hashes
            .get(key.as_bytes())
            .and_then(|hash| hash.get(field.as_bytes()))
            .map(|value| String::from_utf8_lossy(value).into_owned())
    }

    /// Closes every open client connection. The store keeps accepting new ones.
    pub fn drop_connections(&self) {
        let mut kill = self.shared.kill.lock().unwrap();
        kill.cancel();
        *kill = CancellationToken::new();
    }
}

impl Drop for FakeStore {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.drop_connections();
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<StoreShared>, shutdown: CancellationToken) {
    loop {
        let stream = tokio::select! {
            _ = shutdown.cancelled() => return,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(_) => return,
            },
        };

        shared.connections.fetch_add(1, Ordering::SeqCst);
        let kill = shared.kill.lock().unwrap().clone();
        tokio::spawn(serve(stream, shared.clone(), kill));
    }
}

async fn serve<S>(stream: S, shared: Arc<StoreShared>, kill: CancellationToken)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, RespCodec);
    let mut authenticated = shared.password.is_none();
    let mut transaction: Option<Vec<Vec<Bytes>>> = None;

    loop {
        let frame = tokio::select! {
            _ = kill.cancelled() => return,
            frame = framed.next() => frame,
        };
        let args = match frame {
            Some(Ok(Reply::Array(items))) => items
                .into_iter()
                .filter_map(|item| match item {
                    Reply::Bulk(bytes) => Some(bytes),
                    _ => None,
                })
                .collect::<Vec<_>>(),
            _ => return,
        };
        if args.is_empty() {
            return;
        }

        shared
            .commands
            .lock()
            .unwrap()
            .push(args.iter().map(|arg| String::from_utf8_lossy(arg).into_owned()).collect());

        let command = String::from_utf8_lossy(&args[0]).to_uppercase();
        if command == "HANGUP" {
            // Closes this connection without replying.
            return;
        }
        let reply = match command.as_str() {
            "AUTH" => match &shared.password {
                None => Reply::Error(String::from(
                    "ERR AUTH <password> called without any password configured for the default user",
                )),
                Some(password) if args.get(1).map(|a| &a[..]) == Some(password.as_bytes()) => {
                    authenticated = true;
                    Reply::Status(String::from("OK"))
                }
                Some(_) => Reply::Error(String::from("WRONGPASS invalid username-password pair")),
            },
            _ if !authenticated => Reply::Error(String::from("NOAUTH Authentication required.")),
            "MULTI" => {
                transaction = Some(Vec::new());
                Reply::Status(String::from("OK"))
            }
            "EXEC" => match transaction.take() {
                Some(queued) => Reply::Array(queued.iter().map(|args| execute(&shared, args)).collect()),
                None => Reply::Error(String::from("ERR EXEC without MULTI")),
            },
            _ => match transaction.as_mut() {
                Some(queued) => {
                    queued.push(args);
                    Reply::Status(String::from("QUEUED"))
                }
                None => execute(&shared, &args),
            },
        };

        if framed.send(&reply).await.is_err() {
            return;
        }
    }
}

fn execute(shared: &StoreShared, args: &[Bytes]) -> Reply {
    let command = String::from_utf8_lossy(&args[0]).to_uppercase();
    let arg = |i: usize| args.get(i).cloned().unwrap_or_default();

    match command.as_str() {
        "PING" => Reply::Status(String::from("PONG")),
        "SELECT" | "CLIENT" => Reply::Status(String::from("OK")),
        "ECHO" => Reply::Bulk(arg(1)),
        "SET" => {
            shared.data.lock().unwrap().insert(arg(1), arg(2));
            Reply::Status(String::from("OK"))
        }
        "GET" => match shared.data.lock().unwrap().get(&arg(1)) {
            Some(value) => Reply::Bulk(value.clone()),
            None => Reply::Nil,
        },
        "INCR" => {
            let mut data = shared.data.lock().unwrap();
            let current = data
                .get(&arg(1))
                .and_then(|v| String::from_utf8_lossy(v).parse::<i64>().ok())
                .unwrap_or(0);
            data.insert(arg(1), Bytes::from((current + 1).to_string()));
            Reply::Integer(current + 1)
        }
        "HSET" => {
            let mut hashes = shared.hashes.lock().unwrap();
            let hash = hashes.entry(arg(1)).or_default();
            let mut added = 0;
            for pair in args[2..].chunks(2) {
                if pair.len() == 2 && hash.insert(pair[0].clone(), pair[1].clone()).is_none() {
                    added += 1;
                }
            }
            Reply::Integer(added)
        }
        "HDEL" => {
            let mut hashes = shared.hashes.lock().unwrap();
            let removed = match hashes.get_mut(&arg(1)) {
                Some(hash) => args[2..].iter().filter(|field| hash.remove(*field).is_some()).count(),
                None => 0,
            };
            Reply::Integer(removed as i64)
        }
        "FAIL" => Reply::Error(String::from("ERR scripted failure")),
        _ => Reply::Error(format!("ERR unknown command '{}'", command)),
    }
}

/// A port nothing listens on right now.
pub async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

pub async fn eventually<F: Fn() -> bool>(timeout: Duration, condition: F) {
    let deadline = Instant::now() + timeout;
    while !condition() {
        assert!(Instant::now() < deadline, "Condition not met within {:?}", timeout);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn create_root_logger_for_stdout(name: &str) -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).use_file_location().build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!("Test" => name.to_string()))
}
