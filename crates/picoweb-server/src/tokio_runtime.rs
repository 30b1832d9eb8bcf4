//! Tokio transport adapter and driver loop.
//!
//! [`TokioTransport`] emulates a callback-style network stack on top of
//! Tokio sockets: each connection gets a reader task and a writer task that
//! report back over a channel, and writes are limited by a per-connection
//! send window that only reopens when the writer reports bytes flushed.
//!
//! [`TokioDriver`] is the single task that owns the [`Server`] and feeds it
//! those events, the idle-poll tick, and commands from [`ServerHandle`]s.

use std::collections::HashMap;
use std::net::SocketAddr;

use picoweb_core::{ServerConfig, SessionHandle};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::{ServerError, TransportError};
use crate::lock::TransportLock;
use crate::server::Server;
use crate::transport::Transport;

/// Connection identity assigned by [`TokioTransport`].
pub type ConnId = u64;

const READ_CHUNK: usize = 2048;

/// Events from socket tasks to the driver.
#[derive(Debug)]
pub enum TransportEvent {
    Accepted(TcpStream, SocketAddr),
    Received(ConnId, Vec<u8>),
    RemoteClosed(ConnId),
    Sent(ConnId, usize),
    Failed(ConnId, std::io::Error),
}

#[derive(Debug)]
enum WriterOp {
    Data(Vec<u8>),
    Shutdown,
}

#[derive(Debug)]
struct TokioConn {
    writer: mpsc::UnboundedSender<WriterOp>,
    reader: JoinHandle<()>,
    in_flight: usize,
}

/// Transport adapter over Tokio TCP sockets.
#[derive(Debug)]
pub struct TokioTransport {
    lock: TransportLock,
    send_buffer_size: usize,
    events: mpsc::UnboundedSender<TransportEvent>,
    conns: HashMap<ConnId, TokioConn>,
    next_id: ConnId,
    acceptor: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl TokioTransport {
    pub fn new(send_buffer_size: usize, events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            lock: TransportLock::new(),
            send_buffer_size,
            events,
            conns: HashMap::new(),
            next_id: 1,
            acceptor: None,
            local_addr: None,
        }
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Take ownership of an accepted stream and start its socket tasks.
    pub fn register(&mut self, stream: TcpStream) -> ConnId {
        let id = self.next_id;
        self.next_id += 1;

        let (mut read_half, mut write_half) = stream.into_split();

        let events = self.events.clone();
        let reader = tokio::spawn(async move {
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                match read_half.read(&mut buf).await {
                    Ok(0) => {
                        let _ = events.send(TransportEvent::RemoteClosed(id));
                        break;
                    }
                    Ok(n) => {
                        if events.send(TransportEvent::Received(id, buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = events.send(TransportEvent::Failed(id, e));
                        break;
                    }
                }
            }
        });

        let (writer, mut ops) = mpsc::unbounded_channel();
        let events = self.events.clone();
        tokio::spawn(async move {
            while let Some(op) = ops.recv().await {
                match op {
                    WriterOp::Data(data) => {
                        if let Err(e) = write_half.write_all(&data).await {
                            let _ = events.send(TransportEvent::Failed(id, e));
                            break;
                        }
                        let _ = events.send(TransportEvent::Sent(id, data.len()));
                    }
                    WriterOp::Shutdown => {
                        let _ = write_half.shutdown().await;
                        break;
                    }
                }
            }
        });

        self.conns.insert(
            id,
            TokioConn {
                writer,
                reader,
                in_flight: 0,
            },
        );
        id
    }

    /// Reopen the send window after the writer flushed `count` bytes.
    pub fn acknowledge(&mut self, conn: ConnId, count: usize) {
        if let Some(c) = self.conns.get_mut(&conn) {
            c.in_flight = c.in_flight.saturating_sub(count);
        }
    }

    /// Drop a connection the socket tasks already gave up on.
    pub fn forget(&mut self, conn: ConnId) {
        if let Some(c) = self.conns.remove(&conn) {
            c.reader.abort();
        }
    }

    pub fn connection_count(&self) -> usize {
        self.conns.len()
    }
}

impl Transport for TokioTransport {
    type ConnId = ConnId;

    fn listen(&mut self, port: u16) -> Result<(), TransportError> {
        let std_listener = std::net::TcpListener::bind(("0.0.0.0", port))
            .map_err(|source| TransportError::Listen { port, source })?;
        std_listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(std_listener)?;
        self.local_addr = Some(listener.local_addr()?);

        let events = self.events.clone();
        self.acceptor = Some(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        if events.send(TransportEvent::Accepted(stream, addr)).is_err() {
                            break;
                        }
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                }
            }
        }));
        Ok(())
    }

    fn stop_listening(&mut self) {
        if let Some(acceptor) = self.acceptor.take() {
            acceptor.abort();
        }
    }

    fn send_capacity(&self, conn: ConnId) -> usize {
        self.conns
            .get(&conn)
            .map_or(0, |c| self.send_buffer_size.saturating_sub(c.in_flight))
    }

    fn write(&mut self, conn: ConnId, data: &[u8]) -> Result<usize, TransportError> {
        let capacity = self.send_capacity(conn);
        let c = self
            .conns
            .get_mut(&conn)
            .ok_or(TransportError::UnknownConnection)?;
        if capacity == 0 {
            return Err(TransportError::WouldBlock);
        }
        let accepted = data.len().min(capacity);
        c.writer
            .send(WriterOp::Data(data[..accepted].to_vec()))
            .map_err(|_| TransportError::UnknownConnection)?;
        c.in_flight += accepted;
        Ok(accepted)
    }

    fn close(&mut self, conn: ConnId) -> Result<(), TransportError> {
        let c = self
            .conns
            .remove(&conn)
            .ok_or(TransportError::UnknownConnection)?;
        c.reader.abort();
        let _ = c.writer.send(WriterOp::Shutdown);
        Ok(())
    }

    fn lock(&self) -> &TransportLock {
        &self.lock
    }
}

/// Commands accepted by the driver from other tasks.
#[derive(Debug)]
enum Command {
    SendMessage(SessionHandle, String),
    SendData(SessionHandle, Vec<u8>),
    Broadcast(String),
    Close(SessionHandle),
    Shutdown,
}

/// Cloneable handle for talking to a running [`TokioDriver`].
///
/// Every method returns `false` once the driver has stopped.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl ServerHandle {
    pub fn send_message(&self, handle: SessionHandle, text: impl Into<String>) -> bool {
        self.commands
            .send(Command::SendMessage(handle, text.into()))
            .is_ok()
    }

    pub fn send_data(&self, handle: SessionHandle, data: Vec<u8>) -> bool {
        self.commands.send(Command::SendData(handle, data)).is_ok()
    }

    pub fn broadcast(&self, text: impl Into<String>) -> bool {
        self.commands.send(Command::Broadcast(text.into())).is_ok()
    }

    pub fn close(&self, handle: SessionHandle) -> bool {
        self.commands.send(Command::Close(handle)).is_ok()
    }

    pub fn shutdown(&self) -> bool {
        self.commands.send(Command::Shutdown).is_ok()
    }
}

/// Single task running the engine over [`TokioTransport`].
pub struct TokioDriver {
    server: Server<TokioTransport>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    command_tx: mpsc::UnboundedSender<Command>,
}

impl TokioDriver {
    pub fn new(config: ServerConfig) -> Self {
        let (event_tx, events) = mpsc::unbounded_channel();
        let (command_tx, commands) = mpsc::unbounded_channel();
        let transport = TokioTransport::new(config.send_buffer_size, event_tx);
        Self {
            server: Server::new(config, transport),
            events,
            commands,
            command_tx,
        }
    }

    /// The engine, for installing handlers before [`run`](Self::run).
    pub fn server_mut(&mut self) -> &mut Server<TokioTransport> {
        &mut self.server
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            commands: self.command_tx.clone(),
        }
    }

    /// Bind the listener now, so the caller learns the address before
    /// running. Must be called inside a Tokio runtime.
    pub fn start(&mut self) -> Result<SocketAddr, ServerError> {
        if !self.server.is_listening() {
            self.server.start()?;
        }
        self.server.transport().local_addr().ok_or_else(|| {
            let e = std::io::Error::new(std::io::ErrorKind::NotConnected, "listener not bound");
            ServerError::Transport(TransportError::Io(e))
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.transport().local_addr()
    }

    /// Run until a shutdown command arrives.
    pub async fn run(mut self) -> Result<(), ServerError> {
        let addr = self.start()?;
        info!("picoweb server running on {}", addr);

        let mut ticker = tokio::time::interval(self.server.config().poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(event) = self.events.recv() => self.handle_event(event),
                Some(command) = self.commands.recv() => {
                    if !self.handle_command(command) {
                        break;
                    }
                }
                _ = ticker.tick() => self.server.poll(),
            }
        }

        self.server.stop();
        Ok(())
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Accepted(stream, addr) => {
                let conn = self.server.transport_mut().register(stream);
                debug!(conn, %addr, "Accepted connection");
                if self.server.on_accept(conn).is_none() {
                    let _ = self.server.transport_mut().close(conn);
                }
            }
            TransportEvent::Received(conn, data) => {
                self.server.on_receive(conn, &data);
            }
            TransportEvent::RemoteClosed(conn) => {
                self.server.on_remote_close(conn);
                self.server.transport_mut().forget(conn);
            }
            TransportEvent::Sent(conn, count) => {
                self.server.transport_mut().acknowledge(conn, count);
                self.server.on_sent(conn, count);
            }
            TransportEvent::Failed(conn, e) => {
                warn!(conn, "Connection failed: {}", e);
                self.server.transport_mut().forget(conn);
                self.server.on_error(conn);
            }
        }
    }

    fn handle_command(&mut self, command: Command) -> bool {
        let result = match command {
            Command::SendMessage(handle, text) => self.server.send_message(handle, &text),
            Command::SendData(handle, data) => self.server.send_owned(handle, data),
            Command::Broadcast(text) => {
                let count = self.server.broadcast_message(&text);
                debug!(count, "Broadcast queued");
                Ok(())
            }
            Command::Close(handle) => self.server.close(handle),
            Command::Shutdown => return false,
        };
        if let Err(e) = result {
            debug!("Command failed: {}", e);
        }
        true
    }
}
