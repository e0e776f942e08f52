//! Reconnecting command connection
//!
//! [`ConnectionMachine`] owns the command link to one device and keeps it
//! open for as long as a target address is known. It reacts to a single
//! ordered queue of [`MachineEvent`]s; network work happens behind the
//! [`Connector`] and [`CommandLink`] traits so the machine can be driven by
//! scripted fakes in tests.

use async_trait::async_trait;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::Result;
use crate::command::{ChannelOptions, CommandChannel, CommandRequest, CommandResponse};
use crate::types::SettingsRequest;

pub mod backoff;
pub mod machine;


pub use backoff::Backoff;
pub use machine::{ConnectionMachine, MachineConfig, MachineHandle, StateTransition, spawn_machine};

/// Lifecycle of the command connection.
///
/// The order is a lifecycle order; the machine moves back from
/// `ConnectionTerminated` to `AttemptingConnection` on every reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Start,
    AttemptingConnection,
    Connected,
    ConnectionTerminated,
    End,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Start => "start",
            ConnectionState::AttemptingConnection => "attempting-connection",
            ConnectionState::Connected => "connected",
            ConnectionState::ConnectionTerminated => "connection-terminated",
            ConnectionState::End => "end",
        };
        f.write_str(name)
    }
}

/// Input to the state machine.
#[derive(Debug)]
pub enum MachineEvent {
    /// The externally resolved device address; `None` tears the link down
    AddressChanged(Option<IpAddr>),
    Tick(Instant),
    ApplySettings(SettingsRequest),
    /// Move to `End`, then signal the sender
    Stop(oneshot::Sender<()>),
}

/// An open request/response link to a device.
#[async_trait]
pub trait CommandLink: Send + 'static {
    async fn send(&mut self, request: &CommandRequest) -> Result<CommandResponse>;

    /// True once an exchange has failed and the link cannot be reused.
    fn is_broken(&self) -> bool;

    /// Check without blocking whether the peer has gone away, marking the
    /// link broken if so. Returns [`is_broken`](Self::is_broken) afterwards.
    fn poll_closed(&mut self) -> bool;

    /// Release the link. Called exactly once per link.
    async fn close(&mut self);
}

/// Opens command links.
#[async_trait]
pub trait Connector: Send + 'static {
    type Link: CommandLink;

    async fn connect(&mut self, addr: IpAddr) -> Result<Self::Link>;
}

#[async_trait]
impl CommandLink for CommandChannel {
    async fn send(&mut self, request: &CommandRequest) -> Result<CommandResponse> {
        CommandChannel::send(self, request).await
    }

    fn is_broken(&self) -> bool {
        CommandChannel::is_broken(self)
    }

    fn poll_closed(&mut self) -> bool {
        CommandChannel::poll_closed(self)
    }

    async fn close(&mut self) {
        CommandChannel::close(self).await
    }
}

/// Connects [`CommandChannel`]s to a fixed device port.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    port: u16,
    options: ChannelOptions,
}

impl TcpConnector {
    pub fn new(port: u16, options: ChannelOptions) -> Self {
        Self { port, options }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Link = CommandChannel;

    async fn connect(&mut self, addr: IpAddr) -> Result<CommandChannel> {
        CommandChannel::connect(SocketAddr::new(addr, self.port), &self.options).await
    }
}
