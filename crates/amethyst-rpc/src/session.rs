//! Bidirectional RPC session over one framed stream.
//!
//! Either end can issue calls and serve handlers on the same connection.
//! One read loop owns the read half; replies are matched to waiters by call
//! id inline, inbound calls run on their own tasks, and notifications run in
//! arrival order on a per-session worker. The read loop never waits on a
//! handler, so a slow handler cannot hold back replies.

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::envelope::{decode_payload, encode_payload, CallFrame, Envelope, Fault, ReplyFrame};
use crate::error::{ChannelError, RpcError, RpcResult};
use crate::frame::{spawn_writer, ChannelOptions, FrameReader, FrameSender};

/// How long `close` lets the writer flush before dropping the stream.
pub const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

/// A closed set of method names understood by one side of a session.
pub trait MethodKind: Copy + Eq + Hash + Debug + Send + Sync + 'static {
    fn name(self) -> &'static str;
    fn from_name(name: &str) -> Option<Self>;
}

pub type HandlerFuture = BoxFuture<'static, Result<Vec<u8>, Fault>>;
type Handler = Arc<dyn Fn(Vec<u8>) -> HandlerFuture + Send + Sync>;

/// Method-to-handler table for inbound calls.
pub struct Router<M> {
    handlers: HashMap<M, Handler>,
}

impl<M: MethodKind> Router<M> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers a typed handler, replacing any previous one for `method`.
    pub fn route<A, R, F, Fut>(mut self, method: M, f: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Fault>> + Send + 'static,
    {
        self.insert(method, f);
        self
    }

    pub fn insert<A, R, F, Fut>(&mut self, method: M, f: F)
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Fault>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |raw: Vec<u8>| -> HandlerFuture {
            let args = match decode_payload::<A>(&raw) {
                Ok(args) => args,
                Err(e) => {
                    let fault = Fault::invalid_arguments(e.to_string());
                    return async move { Err::<Vec<u8>, Fault>(fault) }.boxed();
                }
            };
            let fut = f(args);
            async move {
                let value = fut.await?;
                encode_payload(&value).map_err(|e| Fault::handler_failed(e.to_string()))
            }
            .boxed()
        });
        self.handlers.insert(method, handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn get(&self, method: M) -> Option<Handler> {
        self.handlers.get(&method).cloned()
    }
}

impl<M: MethodKind> Default for Router<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: MethodKind> Clone for Router<M> {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Listening,
    Closed,
}

type Waiter = oneshot::Sender<RpcResult<Vec<u8>>>;
type SharedRouter<M> = Arc<RwLock<Router<M>>>;

#[derive(Default)]
struct Pending {
    closed: Option<String>,
    waiters: HashMap<u32, Waiter>,
}

struct Shared<M: MethodKind> {
    label: String,
    sender: FrameSender,
    pending: Mutex<Pending>,
    next_id: AtomicU32,
    router: SharedRouter<M>,
    notifications: mpsc::UnboundedSender<CallFrame>,
    state: watch::Sender<SessionState>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl<M: MethodKind> Shared<M> {
    fn lock_pending(&self) -> MutexGuard<'_, Pending> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn register_call(&self) -> RpcResult<(u32, oneshot::Receiver<RpcResult<Vec<u8>>>)> {
        let mut pending = self.lock_pending();
        if let Some(reason) = &pending.closed {
            return Err(RpcError::ConnectionLost(reason.clone()));
        }
        let call_id = loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            // Zero marks notifications; live ids are never handed out twice.
            if id != 0 && !pending.waiters.contains_key(&id) {
                break id;
            }
        };
        let (tx, rx) = oneshot::channel();
        pending.waiters.insert(call_id, tx);
        Ok((call_id, rx))
    }

    fn forget_call(&self, call_id: u32) {
        self.lock_pending().waiters.remove(&call_id);
    }

    fn closed_reason(&self) -> Option<String> {
        self.lock_pending().closed.clone()
    }

    /// Marks the session closed and fails every outstanding call.
    fn terminate(&self, reason: &str) -> bool {
        let waiters = {
            let mut pending = self.lock_pending();
            if pending.closed.is_some() {
                return false;
            }
            pending.closed = Some(reason.to_string());
            std::mem::take(&mut pending.waiters)
        };
        if !waiters.is_empty() {
            debug!("{}: failing {} pending call(s)", self.label, waiters.len());
        }
        for (_, waiter) in waiters {
            let _ = waiter.send(Err(RpcError::ConnectionLost(reason.to_string())));
        }
        self.state.send_replace(SessionState::Closed);
        true
    }

    async fn send(&self, envelope: &Envelope) -> RpcResult<()> {
        let bytes = envelope.encode()?;
        self.sender.send(&bytes).await.map_err(|e| match e {
            ChannelError::Closed => match self.closed_reason() {
                Some(reason) => RpcError::ConnectionLost(reason),
                None => RpcError::ChannelClosed,
            },
            other => other.into(),
        })
    }

    fn lookup(&self, method: &str) -> Option<Handler> {
        lookup_handler(&self.router, method)
    }

    async fn dispatch(self: Arc<Self>, envelope: Envelope) {
        match envelope {
            Envelope::Reply(reply) => {
                let waiter = self.lock_pending().waiters.remove(&reply.call_id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(reply.outcome.map_err(RpcError::from));
                    }
                    None => debug!(
                        "{}: dropping reply for unknown call #{}",
                        self.label, reply.call_id
                    ),
                }
            }
            Envelope::Call(call) if !call.want_reply => {
                if self.notifications.send(call).is_err() {
                    debug!("{}: notification worker gone", self.label);
                }
            }
            Envelope::Call(call) => {
                let handler = self.lookup(&call.method);
                tokio::spawn(async move {
                    let outcome = run_handler(&self.label, handler, &call.method, call.args).await;
                    let reply = Envelope::Reply(ReplyFrame {
                        call_id: call.call_id,
                        outcome,
                    });
                    if let Err(e) = self.send(&reply).await {
                        debug!(
                            "{}: reply to {} #{} not sent: {}",
                            self.label, call.method, call.call_id, e
                        );
                    }
                });
            }
        }
    }
}

impl<M: MethodKind> Drop for Shared<M> {
    fn drop(&mut self) {
        self.sender.abort();
        let reader = match self.reader.get_mut() {
            Ok(reader) => reader.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = reader {
            handle.abort();
        }
    }
}

fn lookup_handler<M: MethodKind>(router: &SharedRouter<M>, method: &str) -> Option<Handler> {
    let kind = M::from_name(method)?;
    let router = match router.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    router.get(kind)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

async fn run_handler(
    label: &str,
    handler: Option<Handler>,
    method: &str,
    args: Vec<u8>,
) -> Result<Vec<u8>, Fault> {
    let Some(handler) = handler else {
        warn!("{}: no handler for method {:?}", label, method);
        return Err(Fault::method_not_found(method));
    };
    match AssertUnwindSafe(async move { handler(args).await })
        .catch_unwind()
        .await
    {
        Ok(outcome) => outcome,
        Err(panic) => {
            let msg = panic_message(panic.as_ref());
            warn!("{}: handler for {} panicked: {}", label, method, msg);
            Err(Fault::handler_failed(msg))
        }
    }
}

async fn notification_worker<M: MethodKind>(
    label: String,
    router: SharedRouter<M>,
    mut rx: mpsc::UnboundedReceiver<CallFrame>,
) {
    while let Some(call) = rx.recv().await {
        let handler = lookup_handler(&router, &call.method);
        if let Err(fault) = run_handler(&label, handler, &call.method, call.args).await {
            debug!("{}: notification {} failed: {}", label, call.method, fault);
        }
    }
}

async fn read_loop<M, R>(
    weak: Weak<Shared<M>>,
    mut reader: FrameReader<R>,
    mut writer: JoinHandle<Result<(), ChannelError>>,
) where
    M: MethodKind,
    R: AsyncRead + Unpin,
{
    let reason = loop {
        let frame = tokio::select! {
            frame = reader.recv() => frame,
            res = &mut writer => {
                break match res {
                    Ok(Ok(())) => "write side closed".to_string(),
                    Ok(Err(e)) => e.to_string(),
                    Err(e) => format!("writer task failed: {e}"),
                };
            }
        };
        let Some(shared) = weak.upgrade() else {
            return;
        };
        match frame {
            Ok(bytes) => match Envelope::decode(&bytes) {
                Ok(envelope) => shared.dispatch(envelope).await,
                Err(e) => {
                    warn!("{}: undecodable frame, closing: {}", shared.label, e);
                    break format!("undecodable frame: {e}");
                }
            },
            Err(ChannelError::Closed) => break "peer closed the channel".to_string(),
            Err(e) => {
                warn!("{}: channel failed: {}", shared.label, e);
                break e.to_string();
            }
        }
    };

    writer.abort();
    if let Some(shared) = weak.upgrade() {
        if shared.terminate(&reason) {
            debug!("{}: session closed: {}", shared.label, reason);
        }
    }
}

/// Handle to one live RPC session. Cheap to clone.
///
/// Dropping the last handle tears down the read loop and closes the stream.
pub struct RpcSession<M: MethodKind> {
    shared: Arc<Shared<M>>,
}

impl<M: MethodKind> Clone for RpcSession<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M: MethodKind> RpcSession<M> {
    /// Takes ownership of `stream` and starts serving `router` on it.
    pub fn new<S>(
        stream: S,
        router: Router<M>,
        options: ChannelOptions,
        label: impl Into<String>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let label = label.into();
        let (read_half, write_half) = tokio::io::split(stream);
        let (sender, writer) = spawn_writer(write_half, options);
        let (state, _) = watch::channel(SessionState::Connecting);
        let router = Arc::new(RwLock::new(router));
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        tokio::spawn(notification_worker(label.clone(), Arc::clone(&router), notify_rx));

        let shared = Arc::new(Shared {
            label,
            sender,
            pending: Mutex::new(Pending::default()),
            next_id: AtomicU32::new(1),
            router,
            notifications: notify_tx,
            state,
            reader: Mutex::new(None),
        });

        let reader = FrameReader::new(read_half, options.max_frame_len);
        let handle = tokio::spawn(read_loop(Arc::downgrade(&shared), reader, writer));
        if let Ok(mut slot) = shared.reader.lock() {
            *slot = Some(handle);
        }
        shared.state.send_if_modified(|s| {
            if *s == SessionState::Connecting {
                *s = SessionState::Listening;
                true
            } else {
                false
            }
        });
        Self { shared }
    }

    /// Calls `method` and waits for its reply.
    pub async fn call<A, R>(&self, method: M, args: &A) -> RpcResult<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let raw = self.call_raw(method, encode_payload(args)?).await?;
        decode_payload(&raw)
    }

    /// [`call`](Self::call) bounded by `timeout`.
    ///
    /// The pending slot is released when the wait gives up.
    pub async fn call_timeout<A, R>(
        &self,
        method: M,
        args: &A,
        timeout: Duration,
    ) -> RpcResult<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        match tokio::time::timeout(timeout, self.call(method, args)).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    pub async fn call_raw(&self, method: M, args: Vec<u8>) -> RpcResult<Vec<u8>> {
        let (call_id, rx) = self.shared.register_call()?;
        let _guard = PendingGuard {
            shared: &self.shared,
            call_id,
        };
        let envelope = Envelope::Call(CallFrame {
            call_id,
            method: method.name().to_string(),
            want_reply: true,
            args,
        });
        self.shared.send(&envelope).await?;
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(RpcError::connection_lost("session dropped")),
        }
    }

    /// Sends `method` without expecting a reply.
    ///
    /// Returns once the frame is queued for writing. No call id is allocated.
    pub async fn notify<A>(&self, method: M, args: &A) -> RpcResult<()>
    where
        A: Serialize + ?Sized,
    {
        if let Some(reason) = self.shared.closed_reason() {
            return Err(RpcError::ConnectionLost(reason));
        }
        let envelope = Envelope::Call(CallFrame {
            call_id: 0,
            method: method.name().to_string(),
            want_reply: false,
            args: encode_payload(args)?,
        });
        self.shared.send(&envelope).await
    }

    /// [`notify`](Self::notify) bounded by `timeout`, for peers that may
    /// have stopped reading.
    pub async fn notify_timeout<A>(
        &self,
        method: M,
        args: &A,
        timeout: Duration,
    ) -> RpcResult<()>
    where
        A: Serialize + ?Sized,
    {
        match tokio::time::timeout(timeout, self.notify(method, args)).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Adds or replaces a handler on the live session.
    pub fn register_handler<A, R, F, Fut>(&self, method: M, f: F)
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Fault>> + Send + 'static,
    {
        let mut router = match self.shared.router.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        router.insert(method, f);
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Why the session closed, once it has.
    pub fn close_reason(&self) -> Option<String> {
        self.shared.closed_reason()
    }

    /// Calls currently waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.shared.lock_pending().waiters.len()
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    /// Resolves once the session has closed for any reason.
    pub async fn closed(&self) {
        let mut rx = self.shared.state.subscribe();
        let _ = rx.wait_for(|s| *s == SessionState::Closed).await;
    }

    /// Closes the session. Outstanding calls fail with `ConnectionLost`.
    ///
    /// Queued frames get [`CLOSE_FLUSH_TIMEOUT`] to drain; after that the
    /// stream is dropped regardless of the peer.
    pub async fn close(&self) {
        if self.shared.terminate("session closed locally") {
            debug!("{}: closing", self.shared.label);
        }
        let sender = &self.shared.sender;
        sender.shutdown();
        if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, sender.closed())
            .await
            .is_err()
        {
            debug!("{}: peer not reading, dropping unsent frames", self.shared.label);
            sender.abort();
        }
        let reader = match self.shared.reader.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = reader {
            handle.abort();
        }
    }
}

struct PendingGuard<'a, M: MethodKind> {
    shared: &'a Shared<M>,
    call_id: u32,
}

impl<M: MethodKind> Drop for PendingGuard<'_, M> {
    fn drop(&mut self) {
        self.shared.forget_call(self.call_id);
    }
}
