use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use micro_ota::connection::Receiver;
use micro_ota::protocol::{SessionError, SessionOutcome};
use micro_ota::storage::OtaStorage;
use socket2::{SockRef, TcpKeepalive};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::{debug, error, info, warn};

use crate::config::OtaConfig;

type ConnectHook = Box<dyn FnOnce() + Send>;

pub struct PushOtaServerBuilder<S> {
    config: Option<OtaConfig>,
    storage: Option<S>,
    on_connect: Option<ConnectHook>,
}

impl<S> PushOtaServerBuilder<S>
where
    S: OtaStorage,
{
    fn new() -> Self {
        Self { config: None, storage: None, on_connect: None }
    }

    pub fn config(mut self, config: OtaConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn storage(mut self, storage: S) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Runs `f` once the connection is accepted, before the request is read.
    pub fn on_connect<F>(mut self, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_connect = Some(Box::new(f));
        self
    }

    pub fn build(self) -> Result<PushOtaServer<S>, ServerBuildError> {
        let storage = self.storage.ok_or(ServerBuildError::MissingStorage)?;
        Ok(PushOtaServer { config: self.config.unwrap_or_default(), storage, on_connect: self.on_connect })
    }
}

#[derive(Error, Debug)]
pub enum ServerBuildError {
    #[error("storage must be set")]
    MissingStorage,
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("push ota is disabled")]
    Disabled,

    #[error("failed to listen on {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("failed to accept: {source}")]
    Accept { source: io::Error },

    #[error("failed to configure socket: {source}")]
    SocketOption { source: io::Error },

    #[error("session failed: {source}")]
    Session {
        #[from]
        source: SessionError,
    },
}

/// Listens for a single push and runs one receive session on it.
pub struct PushOtaServer<S> {
    config: OtaConfig,
    storage: S,
    on_connect: Option<ConnectHook>,
}

impl<S> PushOtaServer<S>
where
    S: OtaStorage,
{
    pub fn builder() -> PushOtaServerBuilder<S> {
        PushOtaServerBuilder::new()
    }

    pub fn config(&self) -> &OtaConfig {
        &self.config
    }

    /// Binds the listening socket without accepting yet.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Disabled`] when push updates are turned off, or
    /// [`ServerError::Bind`] if the socket can't be set up.
    pub async fn bind(self) -> Result<BoundServer<S>, ServerError> {
        if !self.config.enabled {
            return Err(ServerError::Disabled);
        }

        let addr = self.config.socket_addr();
        let listener = listen(addr).map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind { addr, source })?;
        info!(port = local_addr.port(), "listening for push ota");

        Ok(BoundServer { listener, local_addr, server: self })
    }

    /// Binds, accepts one connection and runs the session on it.
    pub async fn serve(self) -> Result<SessionOutcome, ServerError> {
        self.bind().await?.serve().await
    }
}

/// A server whose listening socket is open.
pub struct BoundServer<S> {
    listener: TcpListener,
    local_addr: SocketAddr,
    server: PushOtaServer<S>,
}

impl<S> BoundServer<S>
where
    S: OtaStorage,
{
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn serve(self) -> Result<SessionOutcome, ServerError> {
        let BoundServer { listener, server, .. } = self;

        let (tcp_stream, remote_addr) = match listener.accept().await {
            Ok(stream_and_addr) => stream_and_addr,
            Err(e) => {
                error!(cause = %e, "failed to accept");
                return Err(ServerError::Accept { source: e });
            }
        };
        // one push per run, later clients are refused
        drop(listener);
        info!(%remote_addr, "accepted push ota connection");

        configure_stream(&tcp_stream, &server.config).map_err(|source| ServerError::SocketOption { source })?;

        let mut receiver = Receiver::new(server.storage).with_config(server.config.receiver_config());
        if let Some(on_connect) = server.on_connect {
            receiver = receiver.on_connect(on_connect);
        }

        let (reader, mut writer) = tcp_stream.into_split();
        let result = receiver.receive(reader, &mut writer).await;

        if let Err(e) = writer.shutdown().await {
            debug!(cause = %e, "failed to shutdown connection");
        }

        match &result {
            Ok(outcome) => info!(?outcome, restart_safe = outcome.is_restart_safe(), "push ota session finished"),
            Err(e) => warn!(cause = %e, "push ota session failed"),
        }
        Ok(result?)
    }
}

impl<S: fmt::Debug> fmt::Debug for PushOtaServer<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushOtaServer")
            .field("config", &self.config)
            .field("storage", &self.storage)
            .field("on_connect", &self.on_connect.is_some())
            .finish()
    }
}

impl<S: fmt::Debug> fmt::Debug for BoundServer<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundServer").field("local_addr", &self.local_addr).field("server", &self.server).finish()
    }
}

fn listen(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(1)
}

fn configure_stream(stream: &TcpStream, config: &OtaConfig) -> io::Result<()> {
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(config.keepalive_idle))
        .with_interval(Duration::from_secs(config.keepalive_interval));
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "macos", target_os = "freebsd"))]
    let keepalive = keepalive.with_retries(config.keepalive_count);

    SockRef::from(stream).set_tcp_keepalive(&keepalive)?;
    stream.set_nodelay(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use micro_ota::storage::{FileStorage, MemoryStorage};
    use std::net::Ipv4Addr;
    use tempfile::tempdir;
    use tokio::io::AsyncReadExt;
    use tokio::sync::oneshot;

    fn loopback_config() -> OtaConfig {
        OtaConfig { bind_address: Ipv4Addr::LOCALHOST, port: 0, ..OtaConfig::default() }
    }

    async fn exchange(addr: SocketAddr, request: &[u8]) -> String {
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(request).await.unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        response
    }

    #[test]
    fn build_without_storage() {
        let result = PushOtaServer::<MemoryStorage>::builder().config(loopback_config()).build();
        assert!(matches!(result, Err(ServerBuildError::MissingStorage)));
    }

    #[tokio::test]
    async fn disabled() {
        let config = OtaConfig { enabled: false, ..loopback_config() };
        let server = PushOtaServer::builder().config(config).storage(MemoryStorage::new("1.0.0", 2, 64)).build().unwrap();

        assert!(matches!(server.serve().await, Err(ServerError::Disabled)));
    }

    #[tokio::test]
    async fn push_image_to_file_storage() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::open(dir.path(), &["ota_0", "ota_1"], 1024, "1.0.0").await.unwrap();
        let server = PushOtaServer::builder().config(loopback_config()).storage(storage).build().unwrap();
        let bound = server.bind().await.unwrap();
        let addr = bound.local_addr();

        let session = tokio::spawn(bound.serve());
        let response = exchange(addr, b"POST / HTTP/1.1\r\nContent-Length: 4\r\n\r\nABCD").await;

        assert_eq!(response, "HTTP/1.0 200 OK\r\n\r\nNext boot partition: ota_1\n");
        let outcome = session.await.unwrap().unwrap();
        assert!(outcome.is_restart_safe());
        assert_eq!(std::fs::read(dir.path().join("ota_1.bin")).unwrap(), b"ABCD");
    }

    #[tokio::test]
    async fn version_query() {
        let server = PushOtaServer::builder()
            .config(loopback_config())
            .storage(MemoryStorage::new("3.1.4", 2, 64))
            .build()
            .unwrap();
        let bound = server.bind().await.unwrap();
        let addr = bound.local_addr();

        let session = tokio::spawn(bound.serve());
        let response = exchange(addr, b"GET / HTTP/1.1\r\n\r\n").await;

        assert_eq!(response, "HTTP/1.0 200 OK\r\n\r\nVersion: 3.1.4\n");
        let outcome = session.await.unwrap().unwrap();
        assert!(!outcome.is_restart_safe());
    }

    #[tokio::test]
    async fn failed_session_is_reported() {
        let server = PushOtaServer::builder()
            .config(loopback_config())
            .storage(MemoryStorage::new("1.0.0", 2, 64))
            .build()
            .unwrap();
        let bound = server.bind().await.unwrap();
        let addr = bound.local_addr();

        let session = tokio::spawn(bound.serve());
        let response = exchange(addr, b"POST / HTTP/1.1\r\n\r\n").await;

        assert_eq!(response, "HTTP/1.0 411 Length Required\r\n\r\n");
        assert!(matches!(session.await.unwrap(), Err(ServerError::Session { .. })));
    }

    #[tokio::test]
    async fn second_client_is_refused() {
        let (connected_tx, connected_rx) = oneshot::channel();
        let server = PushOtaServer::builder()
            .config(loopback_config())
            .storage(MemoryStorage::new("1.0.0", 2, 64))
            .on_connect(move || {
                let _ = connected_tx.send(());
            })
            .build()
            .unwrap();
        let bound = server.bind().await.unwrap();
        let addr = bound.local_addr();
        let session = tokio::spawn(bound.serve());

        let mut first = TcpStream::connect(addr).await.unwrap();
        connected_rx.await.unwrap();

        assert!(TcpStream::connect(addr).await.is_err());

        first.write_all(b"DELETE / HTTP/1.1\r\n\r\n").await.unwrap();
        let mut response = String::new();
        first.read_to_string(&mut response).await.unwrap();
        assert_eq!(response, "HTTP/1.0 204 No Content\r\n\r\n");
        assert!(session.await.unwrap().unwrap().is_restart_safe());
    }
}
