//! TCP command channel

use chrono::Local;
use socket2::{SockRef, TcpKeepalive};
use std::net::SocketAddr;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadBuf};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, info, trace, warn};

use super::request::CommandRequest;
use super::response::CommandResponse;
use crate::config::ClientConfig;
use crate::types::Salinity;
use crate::{Result, SonarError};

/// Connection parameters for a [`CommandChannel`].
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
    pub keepalive_time: Duration,
    pub keepalive_interval: Duration,
    pub keepalive_retries: u32,
    pub salinity: Salinity,
    /// Local frame port announced in the handshake
    pub rcvr_port: u16,
}

impl ChannelOptions {
    pub fn from_config(config: &ClientConfig, rcvr_port: u16) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            response_timeout: config.response_timeout(),
            keepalive_time: config.keepalive_time(),
            keepalive_interval: config.keepalive_interval(),
            keepalive_retries: config.keepalive_retries,
            salinity: config.salinity,
            rcvr_port,
        }
    }
}

/// An initialized, line-oriented request/response channel to one device.
///
/// Any failed exchange (write error, closed connection, response timeout)
/// marks the channel broken. A broken channel refuses further requests and
/// has to be replaced.
#[derive(Debug)]
pub struct CommandChannel {
    peer: SocketAddr,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    response_timeout: Duration,
    broken: bool,
}

impl CommandChannel {
    /// Connect, configure keep-alive and run the initialize handshake.
    pub async fn connect(addr: SocketAddr, options: &ChannelOptions) -> Result<Self> {
        debug!(%addr, "Opening command channel");
        let stream = tokio::time::timeout(options.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| SonarError::Timeout { duration: options.connect_timeout })?
            .map_err(|e| {
                SonarError::connection_failed_with_source(
                    format!("connecting to {}", addr),
                    Box::new(e),
                )
            })?;

        configure_keepalive(&stream, options)
            .map_err(|e| SonarError::io_error("configuring TCP keep-alive", e))?;
        stream
            .set_nodelay(true)
            .map_err(|e| SonarError::io_error("disabling Nagle on command channel", e))?;

        let (read_half, write_half) = stream.into_split();
        let mut channel = Self {
            peer: addr,
            reader: BufReader::new(read_half),
            writer: write_half,
            response_timeout: options.response_timeout,
            broken: false,
        };

        let handshake = CommandRequest::initialize(
            options.salinity,
            options.rcvr_port,
            Local::now().naive_local(),
        );
        channel.send(&handshake).await?.into_result()?;

        info!(%addr, rcvr_port = options.rcvr_port, "Command channel initialized");
        Ok(channel)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Check whether the device closed the connection, without blocking.
    ///
    /// Only peeks at the socket, so unsolicited bytes stay queued. Keep-alive
    /// failures surface here as socket errors. Returns true if the channel is
    /// broken afterwards.
    pub fn poll_closed(&mut self) -> bool {
        if self.broken {
            return true;
        }
        let mut scratch = [0u8; 1];
        let mut buf = ReadBuf::new(&mut scratch);
        let mut cx = Context::from_waker(futures::task::noop_waker_ref());
        match self.reader.get_mut().poll_peek(&mut cx, &mut buf) {
            Poll::Ready(Ok(0)) => {
                info!(peer = %self.peer, "Device closed the command channel");
                self.broken = true;
            }
            Poll::Ready(Err(e)) => {
                warn!(peer = %self.peer, "Command channel broken: {}", e);
                self.broken = true;
            }
            Poll::Ready(Ok(_)) | Poll::Pending => {}
        }
        self.broken
    }

    /// Send a request and wait for its response.
    ///
    /// A non-200 status is returned as a normal response; only transport
    /// failures are errors.
    pub async fn send(&mut self, request: &CommandRequest) -> Result<CommandResponse> {
        if self.broken {
            return Err(SonarError::closed("command channel"));
        }

        let timeout = self.response_timeout;
        let outcome = match tokio::time::timeout(timeout, self.exchange(request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(SonarError::Timeout { duration: timeout }),
        };

        match &outcome {
            Ok(response) => {
                trace!(request = %request, status = response.status(), "Command exchange");
                if !response.is_success() {
                    warn!(
                        request = %request,
                        status = response.status_line(),
                        "Device rejected command"
                    );
                }
            }
            Err(e) => {
                warn!(peer = %self.peer, request = %request, "Command channel broken: {}", e);
                self.broken = true;
            }
        }
        outcome
    }

    async fn exchange(&mut self, request: &CommandRequest) -> Result<CommandResponse> {
        self.writer
            .write_all(request.to_wire().as_bytes())
            .await
            .map_err(|e| SonarError::io_error("writing command", e))?;
        self.writer.flush().await.map_err(|e| SonarError::io_error("flushing command", e))?;

        let mut lines = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            let read = self
                .reader
                .read_line(&mut line)
                .await
                .map_err(|e| SonarError::io_error("reading command response", e))?;
            if read == 0 {
                return Err(SonarError::closed("command channel"));
            }

            let content = line.trim_end_matches(['\r', '\n']);
            if content.trim().is_empty() {
                if lines.is_empty() {
                    continue;
                }
                break;
            }
            lines.push(content.to_string());
        }

        CommandResponse::from_lines(lines)
    }

    /// Shut down the write side so the device sees an orderly close.
    ///
    /// The channel is broken afterwards.
    pub async fn close(&mut self) {
        self.broken = true;
        if let Err(e) = self.writer.shutdown().await {
            debug!(peer = %self.peer, "Command channel shutdown: {}", e);
        }
    }
}

fn configure_keepalive(stream: &TcpStream, options: &ChannelOptions) -> std::io::Result<()> {
    let keepalive = TcpKeepalive::new().with_time(options.keepalive_time);
    #[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
    let keepalive = keepalive.with_interval(options.keepalive_interval);
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    let keepalive = keepalive.with_retries(options.keepalive_retries);
    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn options() -> ChannelOptions {
        ChannelOptions {
            response_timeout: Duration::from_millis(500),
            ..ChannelOptions::from_config(&ClientConfig::default(), 40000)
        }
    }

    /// Accept one connection and answer each request with the given replies in turn.
    async fn fake_device(
        replies: Vec<&'static str>,
    ) -> (SocketAddr, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            let mut requests = Vec::new();
            for reply in replies {
                let mut request = String::new();
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).await.unwrap() == 0 {
                        return requests;
                    }
                    if line == "\n" {
                        break;
                    }
                    request.push_str(&line);
                }
                requests.push(request);
                write_half.write_all(reply.as_bytes()).await.unwrap();
            }
            let mut rest = Vec::new();
            let _ = reader.read_to_end(&mut rest).await;
            requests
        });
        (addr, task)
    }

    #[tokio::test]
    async fn handshake_then_settings_round_trip() {
        let (addr, device) =
            fake_device(vec!["200 OK\n\n", "200 OK\nsettings_cookie 5\n\n"]).await;
        let mut channel = CommandChannel::connect(addr, &options()).await.unwrap();

        let request = CommandRequest::new(["set_acquire", "settings_cookie 5"]).unwrap();
        let response = channel.send(&request).await.unwrap();
        assert_eq!(response.settings_cookie(), Some(5));
        assert!(!channel.poll_closed());
        channel.close().await;

        let requests = device.await.unwrap();
        assert!(requests[0].starts_with("initialize\nsalinity seawater\nrcvr_port 40000\ndatetime "));
        assert_eq!(requests[1], "set_acquire\nsettings_cookie 5\n");
    }

    #[tokio::test]
    async fn rejected_handshake_fails_connect() {
        let (addr, _device) = fake_device(vec!["503 Busy\n\n"]).await;
        let result = CommandChannel::connect(addr, &options()).await;
        assert!(matches!(result, Err(SonarError::CommandRejected { .. })));
    }

    #[tokio::test]
    async fn closed_connection_breaks_channel() {
        let (addr, device) = fake_device(vec!["200 OK\n\n"]).await;
        let mut channel = CommandChannel::connect(addr, &options()).await.unwrap();

        let request = CommandRequest::new(["ping"]).unwrap();
        // The device stops answering after the handshake and closes once we do
        let first = channel.send(&request).await;
        assert!(first.is_err());
        assert!(channel.is_broken());
        assert!(matches!(channel.send(&request).await, Err(SonarError::Closed { .. })));
        drop(channel);
        device.await.unwrap();
    }

    #[tokio::test]
    async fn idle_channel_notices_peer_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let device = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();
            while reader.read_line(&mut line).await.unwrap() > 0 && !line.ends_with("\n\n") {}
            write_half.write_all(b"200 OK\n\n").await.unwrap();
        });

        let mut channel = CommandChannel::connect(addr, &options()).await.unwrap();
        device.await.unwrap();

        let mut closed = false;
        for _ in 0..100 {
            if channel.poll_closed() {
                closed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(closed, "peer close went unnoticed");
        assert!(channel.is_broken());
    }

    #[tokio::test]
    async fn refused_connection_is_retryable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let error = CommandChannel::connect(addr, &options()).await.unwrap_err();
        assert!(error.is_retryable(), "{:?}", error);
    }
}
