//! Frame stream receiver task

use futures::Stream;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::assembler::{AssemblerStats, FrameAssembler};
use crate::types::Frame;
use crate::{Result, SonarError};

/// Largest datagram the receiver accepts.
const MAX_DATAGRAM_SIZE: usize = 65_536;

/// Owns the frame socket and the task that reassembles frames from it.
///
/// The assembler lives entirely inside the receiver task; completed frames
/// leave through an unbounded channel. Until the stream is taken, frames are
/// counted as unclaimed and discarded.
pub struct FrameListener {
    local_addr: SocketAddr,
    frames: Option<mpsc::UnboundedReceiver<Frame>>,
    claimed: Arc<AtomicBool>,
    cancel: CancellationToken,
    task: Option<JoinHandle<AssemblerStats>>,
}

impl FrameListener {
    /// Bind the frame socket and start receiving.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| SonarError::io_error(format!("binding frame socket {}", addr), e))?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| SonarError::io_error("reading frame socket address", e))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let claimed = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(receive_frames(socket, tx, claimed.clone(), cancel.clone()));

        info!("Frame listener bound to {}", local_addr);
        Ok(Self { local_addr, frames: Some(rx), claimed, cancel, task: Some(task) })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Take the frame stream. Only the first call returns a stream.
    pub fn frames(&mut self) -> Option<impl Stream<Item = Frame> + Send + 'static> {
        let frames = self.frames.take()?;
        self.claimed.store(true, Ordering::Release);
        Some(UnboundedReceiverStream::new(frames))
    }

    /// Stop receiving and return the assembler counters.
    ///
    /// Calling this more than once returns `None` after the first call.
    pub async fn stop(&mut self) -> Option<AssemblerStats> {
        self.cancel.cancel();
        let task = self.task.take()?;
        match task.await {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!("Frame receiver task failed: {}", e);
                None
            }
        }
    }
}

impl Drop for FrameListener {
    fn drop(&mut self) {
        debug!("Dropping frame listener");
        self.cancel.cancel();
    }
}

async fn receive_frames(
    socket: UdpSocket,
    frames: mpsc::UnboundedSender<Frame>,
    claimed: Arc<AtomicBool>,
    cancel: CancellationToken,
) -> AssemblerStats {
    let mut assembler = FrameAssembler::new();
    let mut unclaimed = 0;
    let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Frame receiver cancelled");
                break;
            }
            received = socket.recv_from(&mut buffer) => received,
        };

        match received {
            Ok((len, from)) => {
                trace!(len, %from, "Frame datagram");
                if let Some(frame) = assembler.push(&buffer[..len]) {
                    if !claimed.load(Ordering::Acquire) {
                        unclaimed += 1;
                        trace!(frame_index = frame.frame_index(), "No frame stream taken yet");
                        continue;
                    }
                    if frames.send(frame).is_err() {
                        debug!("Frame stream dropped, stopping receiver");
                        break;
                    }
                }
            }
            Err(e) => {
                // ICMP port-unreachable and similar surface here; the socket stays usable
                warn!("Frame socket receive error: {}", e);
            }
        }
    }

    let stats = AssemblerStats { unclaimed, ..assembler.stats() };
    info!(
        completed = stats.completed,
        abandoned = stats.abandoned,
        duplicates = stats.duplicates,
        dropped = stats.dropped,
        unclaimed = stats.unclaimed,
        "Frame receiver stopped"
    );
    stats
}
