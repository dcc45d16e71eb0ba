//! Accept loop that gives every client its own RPC session.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{error, info};

use crate::endpoint::{Acceptor, Endpoint};
use crate::error::RpcResult;
use crate::frame::ChannelOptions;
use crate::session::{MethodKind, Router, RpcSession};

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

type SessionMap<M> = Arc<RwLock<HashMap<u64, RpcSession<M>>>>;

/// Listener for one endpoint. Serves a clone of `router` on each connection.
pub struct RpcServer<M: MethodKind> {
    acceptor: Acceptor,
    router: Router<M>,
    options: ChannelOptions,
    sessions: SessionMap<M>,
}

/// Live view of a running server's connections.
pub struct ServerHandle<M: MethodKind> {
    sessions: SessionMap<M>,
}

impl<M: MethodKind> Clone for ServerHandle<M> {
    fn clone(&self) -> Self {
        Self {
            sessions: Arc::clone(&self.sessions),
        }
    }
}

impl<M: MethodKind> ServerHandle<M> {
    pub async fn connection_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Open sessions, ordered by connection number.
    pub async fn sessions(&self) -> Vec<(u64, RpcSession<M>)> {
        let mut list: Vec<_> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, s)| (*id, s.clone()))
            .collect();
        list.sort_by_key(|(id, _)| *id);
        list
    }

    pub async fn session(&self, connection: u64) -> Option<RpcSession<M>> {
        self.sessions.read().await.get(&connection).cloned()
    }

    pub async fn close_all(&self) {
        let sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();
        for session in sessions {
            session.close().await;
        }
    }
}

impl<M: MethodKind> RpcServer<M> {
    /// Binds `endpoint`. A bind failure is returned to the caller as-is.
    pub async fn bind(
        endpoint: &Endpoint,
        router: Router<M>,
        options: ChannelOptions,
    ) -> RpcResult<Self> {
        let acceptor = endpoint.bind().await?;
        Ok(Self {
            acceptor,
            router,
            options,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn local_endpoint(&self) -> Endpoint {
        self.acceptor.local_endpoint()
    }

    pub fn handle(&self) -> ServerHandle<M> {
        ServerHandle {
            sessions: Arc::clone(&self.sessions),
        }
    }

    /// Runs the accept loop forever.
    pub async fn serve(self) {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Runs the accept loop until `signal` resolves, then closes every session.
    pub async fn serve_with_shutdown<F>(self, signal: F)
    where
        F: Future<Output = ()>,
    {
        let RpcServer {
            mut acceptor,
            router,
            options,
            sessions,
        } = self;
        let handle = ServerHandle {
            sessions: Arc::clone(&sessions),
        };
        tokio::pin!(signal);
        let mut next_connection: u64 = 0;

        loop {
            tokio::select! {
                _ = &mut signal => break,
                accepted = acceptor.accept() => match accepted {
                    Ok((stream, peer)) => {
                        next_connection += 1;
                        let id = next_connection;
                        let session = RpcSession::new(
                            stream,
                            router.clone(),
                            options,
                            format!("connection #{id}"),
                        );
                        let live = {
                            let mut map = sessions.write().await;
                            map.insert(id, session.clone());
                            map.len()
                        };
                        info!("connection #{} accepted from {} ({} live)", id, peer, live);
                        tokio::spawn(watch_session(id, session, Arc::clone(&sessions)));
                    }
                    Err(e) => {
                        error!("accept failed: {}", e);
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                },
            }
        }

        info!("listener on {} shutting down", acceptor.local_endpoint());
        drop(acceptor);
        handle.close_all().await;
    }
}

async fn watch_session<M: MethodKind>(id: u64, session: RpcSession<M>, sessions: SessionMap<M>) {
    session.closed().await;
    let live = {
        let mut map = sessions.write().await;
        map.remove(&id);
        map.len()
    };
    let reason = session
        .close_reason()
        .unwrap_or_else(|| "unknown reason".to_string());
    info!("connection #{} terminated: {} ({} live)", id, reason, live);
}
