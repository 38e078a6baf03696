//! Protocol listener and subscription registry.
//!
//! A single long-lived task owns the read side of the transport, reassembles
//! `<...>` frames and fans each parsed command out to every matching
//! subscription. Subscriptions come in three scopes:
//!
//! - **all commands**: every frame.
//! - **exact frame**: frames whose serialized form equals a given command.
//! - **op code**: frames whose op code matches.
//!
//! There is no request/response correlation on the wire, so callers match
//! replies by op code or full-frame equality, never by position.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use dccex_protocol::{Command, FrameCodec, OpCode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Queue depth of each subscription's ingress and egress channels.
const SUBSCRIPTION_BUFFER: usize = 16;

/// Raw OS error returned when writing to a file descriptor that was closed
/// underneath us.
const BAD_FILE_DESCRIPTOR: i32 = 9;

/// Size of the transport read buffer.
const READ_BUFFER_SIZE: usize = 256;

/// Marker event delivered when an exact-frame subscription matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation;

/// The scope a subscription is registered under.
#[derive(Debug, Clone)]
enum Scope {
    All,
    Command(String),
    OpCode(OpCode),
}

/// The listener-facing side of a subscription.
struct Slot<T> {
    tx: mpsc::Sender<T>,
    cancelled: CancellationToken,
}

/// Deliver a value to a slot without ever blocking on a subscriber that has
/// already cancelled but whose registry entry is not yet removed.
async fn deliver<T>(slot: &Slot<T>, value: T) {
    tokio::select! {
        _ = slot.cancelled.cancelled() => {}
        _ = slot.tx.send(value) => {}
    }
}

/// The three subscription indexes, each behind its own lock so dispatch
/// never holds more than one at a time.
#[derive(Default)]
struct Registry {
    all: Mutex<HashMap<Uuid, Slot<Command>>>,
    by_command: Mutex<HashMap<String, HashMap<Uuid, Slot<Observation>>>>,
    by_op_code: Mutex<HashMap<OpCode, HashMap<Uuid, Slot<Command>>>>,
}

impl Registry {
    async fn dispatch(&self, command: &Command) {
        let rendered = command.to_string();

        {
            let subscriptions = self.by_command.lock().await;
            if let Some(entries) = subscriptions.get(&rendered) {
                for slot in entries.values() {
                    deliver(slot, Observation).await;
                }
            }
        }

        {
            let subscriptions = self.by_op_code.lock().await;
            if let Some(entries) = subscriptions.get(&command.op_code()) {
                for slot in entries.values() {
                    deliver(slot, command.clone()).await;
                }
            }
        }

        let subscriptions = self.all.lock().await;
        for slot in subscriptions.values() {
            deliver(slot, command.clone()).await;
        }
    }

    async fn remove(&self, scope: &Scope, id: Uuid) {
        match scope {
            Scope::All => {
                self.all.lock().await.remove(&id);
            }
            Scope::Command(key) => {
                let mut subscriptions = self.by_command.lock().await;
                if let Some(entries) = subscriptions.get_mut(key) {
                    entries.remove(&id);
                    if entries.is_empty() {
                        subscriptions.remove(key);
                    }
                }
            }
            Scope::OpCode(op_code) => {
                let mut subscriptions = self.by_op_code.lock().await;
                if let Some(entries) = subscriptions.get_mut(op_code) {
                    entries.remove(&id);
                    if entries.is_empty() {
                        subscriptions.remove(op_code);
                    }
                }
            }
        }
    }

    /// Dropping every slot closes the ingress channels, which lets the
    /// relay tasks finish and close their egress channels in turn.
    async fn clear(&self) {
        self.all.lock().await.clear();
        self.by_command.lock().await.clear();
        self.by_op_code.lock().await.clear();
    }

    async fn len(&self) -> usize {
        let all = self.all.lock().await.len();
        let by_command: usize = self
            .by_command
            .lock()
            .await
            .values()
            .map(HashMap::len)
            .sum();
        let by_op_code: usize = self
            .by_op_code
            .lock()
            .await
            .values()
            .map(HashMap::len)
            .sum();

        all + by_command + by_op_code
    }
}

/// A registered consumer of frames.
///
/// Frames matching the subscription's scope arrive in FIFO order through
/// [`Subscription::recv`]. Callers must settle the subscription with
/// [`Subscription::cleanup`]; the listener never tears subscribers down on
/// its own.
pub struct Subscription<T> {
    egress: mpsc::Receiver<T>,
    cancelled: CancellationToken,
    relay: Option<JoinHandle<()>>,
    registry: Arc<Registry>,
    scope: Scope,
    id: Uuid,
    settled: bool,
}

impl<T> Subscription<T> {
    /// Receive the next matching event.
    ///
    /// Returns `None` once the subscription's queue is closed, which
    /// happens when the listener exits after a transport error or close.
    pub async fn recv(&mut self) -> Option<T> {
        self.egress.recv().await
    }

    /// Settle the subscription.
    ///
    /// Cancels the relay task, waits for it to finish and removes the
    /// registration. The cancellation flag is raised before any queue is
    /// torn down, so the listener can never deliver into a freed queue.
    /// Cleanup always succeeds.
    pub async fn cleanup(mut self) {
        self.cancelled.cancel();
        if let Some(relay) = self.relay.take() {
            let _ = relay.await;
        }

        self.registry.remove(&self.scope, self.id).await;
        self.settled = true;
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        // Dropped without cleanup, e.g. when a select races the owning
        // future to completion. The raised flag keeps the listener from
        // blocking on this subscriber; the registry entry is removed from
        // a task since drop cannot await.
        self.cancelled.cancel();
        if let Some(relay) = self.relay.take() {
            relay.abort();
        }

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let registry = Arc::clone(&self.registry);
            let scope = self.scope.clone();
            let id = self.id;
            handle.spawn(async move {
                registry.remove(&scope, id).await;
            });
        }
    }
}

/// Forward events from a subscription's ingress queue to its caller-facing
/// egress queue until cancelled or either side closes.
async fn relay<T>(mut ingress: mpsc::Receiver<T>, egress: mpsc::Sender<T>, cancelled: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancelled.cancelled() => return,
            received = ingress.recv() => match received {
                Some(value) => {
                    if egress.send(value).await.is_err() {
                        // The caller dropped the subscription without
                        // cleanup; raise the flag so the listener stops
                        // delivering to it.
                        cancelled.cancel();
                        return;
                    }
                }
                None => return,
            },
        }
    }
}

/// Protocol endpoint over a byte-stream transport.
///
/// Owns the transport: the listener task reads and dispatches frames, and
/// writes are serialized through an internal lock. Dropping the protocol
/// without [`Protocol::close`] aborts the listener.
pub struct Protocol {
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    registry: Arc<Registry>,
    first_subscriber: watch::Sender<bool>,
    shutdown: CancellationToken,
    listener: StdMutex<Option<JoinHandle<()>>>,
}

impl Protocol {
    /// Create a protocol endpoint over the given transport and start its
    /// listener task.
    ///
    /// With `require_subscriber` set, the listener does not consume a
    /// single byte until the first subscription of any kind exists, so
    /// broadcasts emitted before the first client arrives are never lost.
    pub fn new<T>(transport: T, require_subscriber: bool) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(transport);
        let registry = Arc::new(Registry::default());
        let (first_subscriber, subscribed) = watch::channel(false);
        let shutdown = CancellationToken::new();

        let listener = tokio::spawn(listen(
            reader,
            Arc::clone(&registry),
            subscribed,
            require_subscriber,
            shutdown.clone(),
        ));

        Protocol {
            writer: Mutex::new(Box::new(writer)),
            registry,
            first_subscriber,
            shutdown,
            listener: StdMutex::new(Some(listener)),
        }
    }

    /// Subscribe to every incoming command.
    pub async fn read(&self) -> Subscription<Command> {
        let id = Uuid::new_v4();
        let cancelled = CancellationToken::new();
        let (ingress_tx, ingress_rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

        self.registry.all.lock().await.insert(
            id,
            Slot {
                tx: ingress_tx,
                cancelled: cancelled.clone(),
            },
        );
        self.notify_first_subscriber();

        self.start_relay(Scope::All, id, ingress_rx, cancelled)
    }

    /// Subscribe to incoming commands whose serialized form equals the
    /// given command exactly, including parameter order and quoting.
    pub async fn read_command(&self, command: &Command) -> Subscription<Observation> {
        let key = command.to_string();
        let id = Uuid::new_v4();
        let cancelled = CancellationToken::new();
        let (ingress_tx, ingress_rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

        self.registry
            .by_command
            .lock()
            .await
            .entry(key.clone())
            .or_default()
            .insert(
                id,
                Slot {
                    tx: ingress_tx,
                    cancelled: cancelled.clone(),
                },
            );
        self.notify_first_subscriber();

        self.start_relay(Scope::Command(key), id, ingress_rx, cancelled)
    }

    /// Subscribe to incoming commands of the given op code.
    pub async fn read_op_code(&self, op_code: OpCode) -> Subscription<Command> {
        let id = Uuid::new_v4();
        let cancelled = CancellationToken::new();
        let (ingress_tx, ingress_rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

        self.registry
            .by_op_code
            .lock()
            .await
            .entry(op_code)
            .or_default()
            .insert(
                id,
                Slot {
                    tx: ingress_tx,
                    cancelled: cancelled.clone(),
                },
            );
        self.notify_first_subscriber();

        self.start_relay(Scope::OpCode(op_code), id, ingress_rx, cancelled)
    }

    /// Wait for the next observation of the given command.
    ///
    /// The temporary subscription is settled before returning, on every
    /// path.
    pub async fn wait_command(&self, cancel: &CancellationToken, command: &Command) -> Result<()> {
        let mut subscription = self.read_command(command).await;

        let result = tokio::select! {
            observed = subscription.recv() => match observed {
                Some(_) => Ok(()),
                None => Err(Error::TransportClosed),
            },
            _ = cancel.cancelled() => Err(Error::Cancelled),
        };

        subscription.cleanup().await;
        result
    }

    /// Wait for the next command of the given op code.
    ///
    /// The temporary subscription is settled before returning, on every
    /// path.
    pub async fn wait_op_code(&self, cancel: &CancellationToken, op_code: OpCode) -> Result<Command> {
        let mut subscription = self.read_op_code(op_code).await;

        let result = tokio::select! {
            received = subscription.recv() => match received {
                Some(command) => Ok(command),
                None => Err(Error::TransportClosed),
            },
            _ = cancel.cancelled() => Err(Error::Cancelled),
        };

        subscription.cleanup().await;
        result
    }

    /// Write a command to the transport.
    ///
    /// Writes are serialized with respect to each other but not with
    /// respect to reads.
    pub async fn write(&self, command: &Command) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(Error::TransportClosed);
        }

        let bytes = command.to_bytes();
        let mut writer = self.writer.lock().await;
        if let Err(source) = write_frame(writer.as_mut(), &bytes).await {
            if source.raw_os_error() == Some(BAD_FILE_DESCRIPTOR) {
                return Err(Error::TransportClosed);
            }

            return Err(Error::Write {
                command: command.to_string(),
                source,
            });
        }

        trace!("Wrote command {}", command);
        Ok(())
    }

    /// Close the transport and wait for the listener task to exit.
    ///
    /// Every live subscription's queue closes as part of the listener's
    /// exit; subsequent writes fail with a transport-closed error.
    pub async fn close(&self) -> Result<()> {
        self.shutdown.cancel();

        let listener = self
            .listener
            .lock()
            .map(|mut listener| listener.take())
            .unwrap_or(None);
        if let Some(listener) = listener {
            let _ = listener.await;
        }

        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
        Ok(())
    }

    /// Number of live subscriptions across all three indexes.
    pub async fn subscriptions(&self) -> usize {
        self.registry.len().await
    }

    fn notify_first_subscriber(&self) {
        // Idempotent; the listener gate only waits for the first edge.
        self.first_subscriber.send_replace(true);
    }

    fn start_relay<T: Send + 'static>(
        &self,
        scope: Scope,
        id: Uuid,
        ingress: mpsc::Receiver<T>,
        cancelled: CancellationToken,
    ) -> Subscription<T> {
        let (egress_tx, egress_rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let relay = tokio::spawn(relay(ingress, egress_tx, cancelled.clone()));

        Subscription {
            egress: egress_rx,
            cancelled,
            relay: Some(relay),
            registry: Arc::clone(&self.registry),
            scope,
            id,
            settled: false,
        }
    }
}

impl Drop for Protocol {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Ok(mut listener) = self.listener.lock() {
            if let Some(listener) = listener.take() {
                listener.abort();
            }
        }
    }
}

async fn write_frame(writer: &mut (dyn AsyncWrite + Send + Unpin), bytes: &[u8]) -> std::io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// Listener task: reassemble frames from the transport and dispatch them.
async fn listen<R>(
    mut reader: R,
    registry: Arc<Registry>,
    mut subscribed: watch::Receiver<bool>,
    require_subscriber: bool,
    shutdown: CancellationToken,
) where
    R: AsyncRead + Send + Unpin,
{
    // Hold off reading until the first subscriber is registered so early
    // broadcasts stay in the transport until someone can observe them.
    if require_subscriber {
        tokio::select! {
            _ = shutdown.cancelled() => {
                registry.clear().await;
                return;
            }
            failed = async { subscribed.wait_for(|ready| *ready).await.is_err() } => {
                if failed {
                    registry.clear().await;
                    return;
                }
            }
        }
    }

    let mut codec = FrameCodec::new();
    let mut buffer = [0u8; READ_BUFFER_SIZE];

    loop {
        let read = tokio::select! {
            _ = shutdown.cancelled() => break,
            read = reader.read(&mut buffer) => read,
        };

        let received = match read {
            Ok(0) | Err(_) => break,
            Ok(received) => received,
        };

        for frame in codec.push(&buffer[..received]) {
            // The station emits diagnostic text that is not a frame;
            // anything unparseable is skipped.
            let Ok(command) = Command::parse(&frame) else {
                continue;
            };

            trace!("Dispatching command {}", command);
            registry.dispatch(&command).await;
        }
    }

    debug!("Protocol listener exiting");
    registry.clear().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use dccex_protocol::Parameter;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_fan_out_to_all_scopes() {
        let (transport, mut device) = duplex(1024);
        let protocol = Protocol::new(transport, false);

        let mut all = protocol.read().await;
        let mut by_op_code = protocol.read_op_code(OpCode::SENSOR_ACTIVE).await;
        let exact = Command::new(OpCode::SENSOR_ACTIVE, "%d", vec![Parameter::Int(7)]);
        let mut by_command = protocol.read_command(&exact).await;

        device.write_all(b"<Q 7>\n").await.unwrap();

        assert_eq!(all.recv().await.unwrap().to_string(), "<Q 7>");
        assert_eq!(by_op_code.recv().await.unwrap().to_string(), "<Q 7>");
        assert_eq!(by_command.recv().await.unwrap(), Observation);

        all.cleanup().await;
        by_op_code.cleanup().await;
        by_command.cleanup().await;
        assert_eq!(protocol.subscriptions().await, 0);
    }

    #[tokio::test]
    async fn test_opcode_subscription_ignores_other_frames() {
        let (transport, mut device) = duplex(1024);
        let protocol = Protocol::new(transport, false);

        let mut failures = protocol.read_op_code(OpCode::FAIL).await;
        device.write_all(b"<O>\n<Q 1>\n<X>\n").await.unwrap();

        assert_eq!(failures.recv().await.unwrap().op_code(), OpCode::FAIL);
        failures.cleanup().await;
    }

    #[tokio::test]
    async fn test_register_cleanup_pairs_leave_nothing() {
        let (transport, _device) = duplex(1024);
        let protocol = Protocol::new(transport, false);

        for _ in 0..8 {
            let subscription = protocol.read().await;
            subscription.cleanup().await;

            let subscription = protocol.read_op_code(OpCode::SUCCESS).await;
            subscription.cleanup().await;

            let command = Command::new(OpCode::INFO, "%d", vec![Parameter::Int(1)]);
            let subscription = protocol.read_command(&command).await;
            subscription.cleanup().await;
        }

        assert_eq!(protocol.subscriptions().await, 0);
    }

    #[tokio::test]
    async fn test_cancelled_subscriber_does_not_block_dispatch() {
        let (transport, mut device) = duplex(1024);
        let protocol = Protocol::new(transport, false);

        // A subscriber that cancelled but is still registered: the
        // listener must skip it instead of blocking.
        let stuck = protocol.read().await;
        stuck.cancelled.cancel();

        let mut live = protocol.read().await;
        for _ in 0..(SUBSCRIPTION_BUFFER * 2 + 2) {
            device.write_all(b"<O>\n").await.unwrap();
        }

        for _ in 0..(SUBSCRIPTION_BUFFER * 2 + 2) {
            assert!(live.recv().await.is_some());
        }

        stuck.cleanup().await;
        live.cleanup().await;
    }

    #[tokio::test]
    async fn test_close_settles_listener_and_fails_writes() {
        let (transport, _device) = duplex(1024);
        let protocol = Protocol::new(transport, false);

        let mut subscription = protocol.read().await;
        protocol.close().await.unwrap();

        // The listener cleared the registry, so the queue is closed.
        assert!(subscription.recv().await.is_none());
        subscription.cleanup().await;

        let command = Command::new(OpCode::STATUS, "", vec![]);
        assert!(matches!(
            protocol.write(&command).await,
            Err(Error::TransportClosed)
        ));
    }

    #[tokio::test]
    async fn test_transport_eof_closes_subscriptions() {
        let (transport, device) = duplex(1024);
        let protocol = Protocol::new(transport, false);

        let mut subscription = protocol.read().await;
        drop(device);

        assert!(subscription.recv().await.is_none());
        subscription.cleanup().await;
    }
}
