//! Session gate over the shared protocol endpoint.
//!
//! A session scopes a conversation of one or more frames so it is atomic
//! with respect to other sessions. The gate is a reader/writer lock: at
//! most one exclusive session at a time, any number of concurrent
//! read-only sessions, and neither kind while the other side holds the
//! lock.

use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};

use dccex_protocol::{Command, OpCode};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::protocol::{Observation, Protocol, Subscription};

struct ChannelInner {
    protocol: Protocol,
    gate: Arc<RwLock<()>>,
    /// The last command written through any session, kept for diagnostic
    /// error messages.
    last_command: StdMutex<Option<Command>>,
}

/// Serializes request/reply conversations over a shared protocol endpoint.
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    /// Create a channel over the given protocol endpoint.
    pub fn new(protocol: Protocol) -> Self {
        Channel {
            inner: Arc::new(ChannelInner {
                protocol,
                gate: Arc::new(RwLock::new(())),
                last_command: StdMutex::new(None),
            }),
        }
    }

    /// The underlying protocol endpoint.
    ///
    /// Accessing it directly bypasses session serialization.
    pub fn protocol(&self) -> &Protocol {
        &self.inner.protocol
    }

    /// Run `f` with exclusive read/write access to the transport.
    ///
    /// No other session, exclusive or read-only, proceeds while `f` runs.
    pub async fn session<F, Fut, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let guard = Arc::clone(&self.inner.gate).write_owned().await;
        f(Session {
            inner: Arc::clone(&self.inner),
            _guard: guard,
        })
        .await
    }

    /// Run `f` with shared read-only access to the transport.
    ///
    /// Read sessions run concurrently with each other but never while an
    /// exclusive session holds the gate.
    pub async fn rsession<F, Fut, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(ReadSession) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let guard = Arc::clone(&self.inner.gate).read_owned().await;
        f(ReadSession {
            inner: Arc::clone(&self.inner),
            _guard: guard,
        })
        .await
    }

    /// Run `f` as an exclusive session while watching for the failure op
    /// code.
    ///
    /// The watcher subscribes before `f` runs. If the station emits `X`
    /// first, `f` is cancelled and the returned error names the last
    /// command written within the session; if `f` finishes first the
    /// watcher is settled quietly. An invalid command anywhere in the
    /// session typically means the station rejected it, e.g. examining a
    /// turnout that does not exist.
    pub async fn session_success<F, Fut, R>(&self, cancel: &CancellationToken, f: F) -> Result<R>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let guard = Arc::clone(&self.inner.gate).write_owned().await;
        let mut failure = self.inner.protocol.read_op_code(OpCode::FAIL).await;

        let body = f(Session {
            inner: Arc::clone(&self.inner),
            _guard: guard,
        });
        tokio::pin!(body);

        let result = tokio::select! {
            result = &mut body => result,
            observed = failure.recv() => match observed {
                Some(_) => Err(Error::SessionFailure {
                    command: self.last_command(),
                }),
                None => Err(Error::TransportClosed),
            },
            _ = cancel.cancelled() => Err(Error::Cancelled),
        };

        failure.cleanup().await;
        result
    }

    fn last_command(&self) -> String {
        self.inner
            .last_command
            .lock()
            .ok()
            .and_then(|cache| cache.as_ref().map(|command| command.to_string()))
            .unwrap_or_default()
    }
}

/// Exclusive session handle with full access to the protocol endpoint.
pub struct Session {
    inner: Arc<ChannelInner>,
    _guard: OwnedRwLockWriteGuard<()>,
}

impl Session {
    /// Write a command through the session, caching it for diagnostics.
    pub async fn write(&self, command: &Command) -> Result<()> {
        if let Ok(mut cache) = self.inner.last_command.lock() {
            *cache = Some(command.clone());
        }

        self.inner.protocol.write(command).await
    }

    /// Subscribe to every incoming command.
    pub async fn read(&self) -> Subscription<Command> {
        self.inner.protocol.read().await
    }

    /// Subscribe to exact observations of the given command.
    pub async fn read_command(&self, command: &Command) -> Subscription<Observation> {
        self.inner.protocol.read_command(command).await
    }

    /// Subscribe to incoming commands of the given op code.
    pub async fn read_op_code(&self, op_code: OpCode) -> Subscription<Command> {
        self.inner.protocol.read_op_code(op_code).await
    }

    /// Wait for the next observation of the given command.
    pub async fn wait_command(&self, cancel: &CancellationToken, command: &Command) -> Result<()> {
        self.inner.protocol.wait_command(cancel, command).await
    }

    /// Wait for the next command of the given op code.
    pub async fn wait_op_code(&self, cancel: &CancellationToken, op_code: OpCode) -> Result<Command> {
        self.inner.protocol.wait_op_code(cancel, op_code).await
    }

    /// Close the protocol endpoint.
    pub async fn close(&self) -> Result<()> {
        self.inner.protocol.close().await
    }
}

/// Shared read-only session handle.
pub struct ReadSession {
    inner: Arc<ChannelInner>,
    _guard: OwnedRwLockReadGuard<()>,
}

impl ReadSession {
    /// Subscribe to every incoming command.
    pub async fn read(&self) -> Subscription<Command> {
        self.inner.protocol.read().await
    }

    /// Subscribe to exact observations of the given command.
    pub async fn read_command(&self, command: &Command) -> Subscription<Observation> {
        self.inner.protocol.read_command(command).await
    }

    /// Subscribe to incoming commands of the given op code.
    pub async fn read_op_code(&self, op_code: OpCode) -> Subscription<Command> {
        self.inner.protocol.read_op_code(op_code).await
    }

    /// Wait for the next observation of the given command.
    pub async fn wait_command(&self, cancel: &CancellationToken, command: &Command) -> Result<()> {
        self.inner.protocol.wait_command(cancel, command).await
    }

    /// Wait for the next command of the given op code.
    pub async fn wait_op_code(&self, cancel: &CancellationToken, op_code: OpCode) -> Result<Command> {
        self.inner.protocol.wait_op_code(cancel, op_code).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn channel() -> (Channel, tokio::io::DuplexStream) {
        let (transport, device) = duplex(1024);
        (Channel::new(Protocol::new(transport, false)), device)
    }

    #[tokio::test]
    async fn test_sessions_are_exclusive() {
        let (channel, _device) = channel();
        let gate = Arc::clone(&channel.inner.gate);

        channel
            .session(|session| async move {
                // Neither another exclusive session nor a read session can
                // start while the first session holds the gate.
                let _session = session;
                assert!(gate.try_write().is_err());
                assert!(gate.try_read().is_err());
                Ok(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_read_sessions_are_shared() {
        let (channel, _device) = channel();
        let gate = Arc::clone(&channel.inner.gate);

        channel
            .rsession(|_session| async move {
                assert!(gate.try_read().is_ok());
                Ok(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_session_write_updates_cache() {
        let (channel, _device) = channel();

        let command = Command::new(OpCode::STATUS, "", vec![]);
        channel
            .session(|session| async move { session.write(&command).await })
            .await
            .unwrap();

        assert_eq!(channel.last_command(), "<s>");
    }
}
