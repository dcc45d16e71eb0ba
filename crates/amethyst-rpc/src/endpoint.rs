//! Well-known transport endpoints shared by the plugin and the driver.
//!
//! Both processes agree on the endpoint ahead of time; nothing is negotiated.
//! The textual form is `tcp://host:port`, `unix://path` or `pipe://name`.

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
#[cfg(unix)]
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::error::{RpcError, RpcResult};

pub const DEFAULT_TCP_PORT: u16 = 7135;

/// Name used for the default pipe or socket file.
pub const DEFAULT_ENDPOINT_NAME: &str = "amethyst-driver";

#[cfg(windows)]
const PIPE_PREFIX: &str = r"\\.\pipe\";

/// Byte stream produced by connecting or accepting on an [`Endpoint`].
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Stream for T {}

pub type BoxStream = Box<dyn Stream>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Tcp(SocketAddr),
    #[cfg(unix)]
    Unix(PathBuf),
    /// Pipe name without the `\\.\pipe\` prefix.
    #[cfg(windows)]
    NamedPipe(String),
}

impl Endpoint {
    /// The endpoint both sides use when nothing is configured.
    pub fn platform_default() -> Self {
        #[cfg(windows)]
        {
            Endpoint::NamedPipe(DEFAULT_ENDPOINT_NAME.to_string())
        }
        #[cfg(unix)]
        {
            Endpoint::Unix(std::env::temp_dir().join(format!("{DEFAULT_ENDPOINT_NAME}.sock")))
        }
        #[cfg(not(any(unix, windows)))]
        {
            Endpoint::tcp_loopback(DEFAULT_TCP_PORT)
        }
    }

    pub fn tcp_loopback(port: u16) -> Self {
        Endpoint::Tcp(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
    }

    /// Opens a client stream, failing with `ConnectTimeout` after `timeout`.
    ///
    /// A failed or timed-out attempt leaves nothing open behind it.
    pub async fn connect(&self, timeout: Duration) -> RpcResult<BoxStream> {
        match tokio::time::timeout(timeout, self.connect_inner()).await {
            Ok(Ok(stream)) => {
                debug!("connected to {}", self);
                Ok(stream)
            }
            Ok(Err(e)) => Err(RpcError::ConnectionLost(format!("{self}: {e}"))),
            Err(_) => Err(RpcError::ConnectTimeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn connect_inner(&self) -> io::Result<BoxStream> {
        match self {
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr).await?;
                stream.set_nodelay(true)?;
                Ok(Box::new(stream))
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                let stream = tokio::net::UnixStream::connect(path).await?;
                Ok(Box::new(stream))
            }
            #[cfg(windows)]
            Endpoint::NamedPipe(name) => pipe::connect(&pipe_path(name)).await,
        }
    }

    /// Creates the listener. At most one listener may own an endpoint.
    pub async fn bind(&self) -> RpcResult<Acceptor> {
        let bind_err = |source: io::Error| RpcError::Bind {
            endpoint: self.to_string(),
            source,
        };
        let inner = match self {
            Endpoint::Tcp(addr) => {
                let listener = TcpListener::bind(addr).await.map_err(bind_err)?;
                AcceptorKind::Tcp(listener)
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => AcceptorKind::Unix(unix::bind(path).await.map_err(bind_err)?),
            #[cfg(windows)]
            Endpoint::NamedPipe(name) => {
                AcceptorKind::Pipe(pipe::PipeAcceptor::bind(pipe_path(name)).map_err(bind_err)?)
            }
        };
        let acceptor = Acceptor {
            inner,
            endpoint: self.clone(),
        };
        info!("listening on {}", acceptor.local_endpoint());
        Ok(acceptor)
    }
}

#[cfg(windows)]
fn pipe_path(name: &str) -> String {
    format!("{PIPE_PREFIX}{name}")
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::platform_default()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
            #[cfg(unix)]
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
            #[cfg(windows)]
            Endpoint::NamedPipe(name) => write!(f, "pipe://{name}"),
        }
    }
}

impl FromStr for Endpoint {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (scheme, rest) = match s.split_once("://") {
            Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
            None => ("tcp".to_string(), s),
        };
        if rest.is_empty() {
            return Err(RpcError::InvalidConfig(format!("empty endpoint address in {s:?}")));
        }
        match scheme.as_str() {
            "tcp" => parse_tcp(rest).map(Endpoint::Tcp),
            #[cfg(unix)]
            "unix" => Ok(Endpoint::Unix(PathBuf::from(rest))),
            #[cfg(windows)]
            "pipe" => Ok(Endpoint::NamedPipe(
                rest.strip_prefix(PIPE_PREFIX).unwrap_or(rest).to_string(),
            )),
            other => Err(RpcError::InvalidConfig(format!(
                "unsupported endpoint scheme {other:?} on this platform"
            ))),
        }
    }
}

fn parse_tcp(rest: &str) -> RpcResult<SocketAddr> {
    if let Ok(addr) = rest.parse::<SocketAddr>() {
        return Ok(addr);
    }
    match rest.rsplit_once(':') {
        Some(("localhost", port)) => port
            .parse::<u16>()
            .map(|port| SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
            .map_err(|e| RpcError::InvalidConfig(format!("bad port in {rest:?}: {e}"))),
        _ => Err(RpcError::InvalidConfig(format!(
            "expected ip:port, got {rest:?}"
        ))),
    }
}

impl Serialize for Endpoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Endpoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

enum AcceptorKind {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(unix::UnixAcceptor),
    #[cfg(windows)]
    Pipe(pipe::PipeAcceptor),
}

/// Listening side of an [`Endpoint`].
pub struct Acceptor {
    inner: AcceptorKind,
    endpoint: Endpoint,
}

impl Acceptor {
    /// Waits for the next client. Returns the stream and a peer description.
    pub async fn accept(&mut self) -> io::Result<(BoxStream, String)> {
        match &mut self.inner {
            AcceptorKind::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                stream.set_nodelay(true)?;
                Ok((Box::new(stream), peer.to_string()))
            }
            #[cfg(unix)]
            AcceptorKind::Unix(acceptor) => {
                let stream = acceptor.accept().await?;
                Ok((Box::new(stream), "unix peer".to_string()))
            }
            #[cfg(windows)]
            AcceptorKind::Pipe(acceptor) => {
                let stream = acceptor.accept().await?;
                Ok((Box::new(stream), "pipe client".to_string()))
            }
        }
    }

    /// The bound endpoint, with an ephemeral TCP port resolved.
    pub fn local_endpoint(&self) -> Endpoint {
        match &self.inner {
            AcceptorKind::Tcp(listener) => listener
                .local_addr()
                .map(Endpoint::Tcp)
                .unwrap_or_else(|_| self.endpoint.clone()),
            #[allow(unreachable_patterns)]
            _ => self.endpoint.clone(),
        }
    }
}

#[cfg(unix)]
mod unix {
    use std::io;
    use std::path::{Path, PathBuf};

    use tokio::net::{UnixListener, UnixStream};
    use tracing::debug;

    pub struct UnixAcceptor {
        listener: UnixListener,
        path: PathBuf,
    }

    /// Binds `path`, replacing a stale socket file but never a live listener.
    pub async fn bind(path: &Path) -> io::Result<UnixAcceptor> {
        if path.exists() {
            if UnixStream::connect(path).await.is_ok() {
                return Err(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    format!("another listener owns {}", path.display()),
                ));
            }
            debug!("removing stale socket {}", path.display());
            std::fs::remove_file(path)?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(path)?;
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(UnixAcceptor {
            listener,
            path: path.to_path_buf(),
        })
    }

    impl UnixAcceptor {
        pub async fn accept(&self) -> io::Result<UnixStream> {
            let (stream, _) = self.listener.accept().await?;
            Ok(stream)
        }
    }

    impl Drop for UnixAcceptor {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[cfg(windows)]
mod pipe {
    use std::io;
    use std::time::Duration;

    use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeServer, ServerOptions};

    use super::BoxStream;

    const ERROR_PIPE_BUSY: i32 = 231;

    pub struct PipeAcceptor {
        path: String,
        next: NamedPipeServer,
    }

    impl PipeAcceptor {
        pub fn bind(path: String) -> io::Result<Self> {
            // Fails if any other process already serves this pipe name.
            let next = ServerOptions::new()
                .first_pipe_instance(true)
                .create(&path)?;
            Ok(Self { path, next })
        }

        /// A failed connect leaves the instance unusable, so it is swapped
        /// for a fresh one before the error is returned.
        pub async fn accept(&mut self) -> io::Result<NamedPipeServer> {
            let connected = self.next.connect().await;
            let replacement = ServerOptions::new().create(&self.path)?;
            let served = std::mem::replace(&mut self.next, replacement);
            connected.map(|()| served)
        }
    }

    pub async fn connect(path: &str) -> io::Result<BoxStream> {
        loop {
            match ClientOptions::new().open(path) {
                Ok(client) => return Ok(Box::new(client)),
                Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY) => {}
                Err(e) => return Err(e),
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_prints_tcp() {
        let ep: Endpoint = "tcp://127.0.0.1:7135".parse().unwrap();
        assert_eq!(ep, Endpoint::tcp_loopback(DEFAULT_TCP_PORT));
        assert_eq!(ep.to_string(), "tcp://127.0.0.1:7135");

        let bare: Endpoint = "127.0.0.1:9000".parse().unwrap();
        assert_eq!(bare, Endpoint::tcp_loopback(9000));

        let local: Endpoint = "tcp://localhost:9001".parse().unwrap();
        assert_eq!(local, Endpoint::tcp_loopback(9001));
    }

    #[test]
    fn rejects_malformed_endpoints() {
        assert!("tcp://".parse::<Endpoint>().is_err());
        assert!("tcp://nohost".parse::<Endpoint>().is_err());
        assert!("carrier-pigeon://roof".parse::<Endpoint>().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn parses_unix_paths() {
        let ep: Endpoint = "unix:///tmp/ame.sock".parse().unwrap();
        assert_eq!(ep, Endpoint::Unix(PathBuf::from("/tmp/ame.sock")));
        assert_eq!(ep.to_string(), "unix:///tmp/ame.sock");
    }

    #[test]
    fn serde_uses_the_textual_form() {
        let ep = Endpoint::tcp_loopback(7135);
        let json = serde_json::to_string(&ep).unwrap();
        assert_eq!(json, "\"tcp://127.0.0.1:7135\"");
        assert_eq!(serde_json::from_str::<Endpoint>(&json).unwrap(), ep);
    }

    #[tokio::test]
    async fn connect_to_nothing_fails_fast() {
        // Bind then drop to find a port with no listener.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let started = std::time::Instant::now();
        let err = match Endpoint::Tcp(addr).connect(Duration::from_millis(500)).await {
            Ok(_) => panic!("connected to a closed port"),
            Err(e) => e,
        };
        assert!(err.is_unreachable());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn second_tcp_listener_is_refused() {
        let first = Endpoint::tcp_loopback(0).bind().await.unwrap();
        let bound = first.local_endpoint();
        assert!(matches!(bound.bind().await, Err(RpcError::Bind { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_listener_replaces_stale_socket_but_not_live_one() {
        let dir = std::env::temp_dir().join(format!(
            "amethyst-endpoint-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        let ep = Endpoint::Unix(dir.join("driver.sock"));

        let live = ep.bind().await.unwrap();
        assert!(matches!(ep.bind().await, Err(RpcError::Bind { .. })));
        drop(live);

        // A leftover file with no listener behind it is replaced.
        std::fs::write(dir.join("driver.sock"), b"").unwrap();
        let mut acceptor = ep.bind().await.unwrap();
        let client = tokio::spawn({
            let ep = ep.clone();
            async move { ep.connect(Duration::from_secs(1)).await.map(|_| ()) }
        });
        let _ = acceptor.accept().await.unwrap();
        client.await.unwrap().unwrap();
        drop(acceptor);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
