use std::sync::Arc;

use crate::{
    messages::{CanError, CanId, CanMessage},
    traits::{AsyncCanReceiver, AsyncCanSender, CanSendError},
};
use snafu::{ResultExt, Snafu};
use socketcan::{CanFrame, CanSocket, EmbeddedFrame, Frame, ShouldRetry, Socket};
use tokio::io::{unix::AsyncFd, Interest};

fn from_socketcan_id(id: socketcan::CanId) -> CanId {
    match id {
        socketcan::CanId::Standard(id) => CanId::std(id.as_raw()),
        socketcan::CanId::Extended(id) => CanId::extended(id.as_raw()),
    }
}

fn to_socketcan_id(id: CanId) -> Option<socketcan::CanId> {
    match id {
        CanId::Extended(id) => socketcan::ExtendedId::new(id).map(Into::into),
        CanId::Std(id) => socketcan::StandardId::new(id).map(Into::into),
    }
}

fn frame_to_message(frame: CanFrame) -> Result<CanMessage, CanError> {
    let id = from_socketcan_id(frame.can_id());

    match frame {
        CanFrame::Data(frame) => Ok(CanMessage::new(id, frame.data())),
        CanFrame::Remote(_) => Ok(CanMessage::new_rtr(id)),
        CanFrame::Error(frame) => Err(CanError::from_raw(frame.error_bits() as u8)),
    }
}

fn message_to_frame(msg: CanMessage) -> Option<CanFrame> {
    let id = to_socketcan_id(msg.id())?;
    if msg.is_rtr() {
        CanFrame::new_remote(id, 0)
    } else {
        CanFrame::new(id, msg.data())
    }
}

/// Error returned when a socketcan receiver fails
#[derive(Debug, Snafu)]
pub enum ReceiveError {
    /// The socket failed
    #[snafu(display("socket error: {source}"))]
    Io {
        /// The underlying error
        source: socketcan::IoError,
    },
    /// The controller reported an error frame
    #[snafu(display("{source}"))]
    Can {
        /// The reported error
        source: CanError,
    },
}

/// Error returned when a frame could not be written to the socket
#[derive(Debug)]
pub struct SocketCanSendError {
    msg: CanMessage,
    reason: String,
}

impl CanSendError for SocketCanSendError {
    fn into_can_message(self) -> CanMessage {
        self.msg
    }

    fn message(&self) -> String {
        format!("Failed to send {:?}: {}", self.msg, self.reason)
    }
}

/// An async wrapper around a non-blocking CanSocket which allows both blocking and non-blocking
/// reads from a shared reference
#[derive(Debug)]
struct AsyncCanSocket(AsyncFd<CanSocket>);

impl AsyncCanSocket {
    fn open(ifname: &str) -> Result<Self, std::io::Error> {
        let socket = CanSocket::open(ifname)?;
        socket.set_nonblocking(true)?;
        Ok(Self(AsyncFd::new(socket)?))
    }

    /// Read a frame without waiting; a WouldBlock error means nothing is queued
    fn try_read_frame(&self) -> Result<CanFrame, std::io::Error> {
        self.0.get_ref().read_frame()
    }

    async fn read_frame(&self) -> Result<CanFrame, std::io::Error> {
        self.0
            .async_io(Interest::READABLE, |inner| inner.read_frame())
            .await
    }

    async fn write_frame(&self, frame: &CanFrame) -> Result<(), std::io::Error> {
        self.0
            .async_io(Interest::WRITABLE, |inner| inner.write_frame(frame))
            .await
    }
}

/// Receiving half of a socketcan interface
#[derive(Debug, Clone)]
pub struct SocketCanReceiver {
    socket: Arc<AsyncCanSocket>,
}

impl AsyncCanReceiver for SocketCanReceiver {
    type Error = ReceiveError;

    fn try_recv(&mut self) -> Option<CanMessage> {
        loop {
            match self.socket.try_read_frame() {
                Ok(frame) => match frame_to_message(frame) {
                    Ok(msg) => return Some(msg),
                    Err(e) => log::warn!("CAN error frame while draining: {e}"),
                },
                Err(_) => return None,
            }
        }
    }

    async fn recv(&mut self) -> Result<CanMessage, ReceiveError> {
        loop {
            match self.socket.read_frame().await {
                Ok(frame) => return frame_to_message(frame).context(CanSnafu),
                Err(e) => {
                    if !e.should_retry() {
                        return Err(ReceiveError::Io { source: e });
                    }
                }
            }
        }
    }
}

/// Sending half of a socketcan interface
#[derive(Debug, Clone)]
pub struct SocketCanSender {
    socket: Arc<AsyncCanSocket>,
}

impl AsyncCanSender for SocketCanSender {
    type Error = SocketCanSendError;

    async fn send(&mut self, msg: CanMessage) -> Result<(), SocketCanSendError> {
        let Some(frame) = message_to_frame(msg) else {
            return Err(SocketCanSendError {
                msg,
                reason: "invalid frame".into(),
            });
        };

        self.socket
            .write_frame(&frame)
            .await
            .map_err(|e| SocketCanSendError {
                msg,
                reason: e.to_string(),
            })
    }
}

/// Open a socketcan device and split it into a sender and a receiver
///
/// # Arguments
/// * `device` - The name of the socketcan device to open, e.g. "vcan0", or "can0"
///
/// Because both halves share one socket, the receiver does not see frames written by the sender.
#[cfg_attr(docsrs, doc(cfg(feature = "socketcan")))]
pub fn open_socketcan<S: AsRef<str>>(
    device: S,
) -> Result<(SocketCanSender, SocketCanReceiver), socketcan::IoError> {
    let socket = Arc::new(AsyncCanSocket::open(device.as_ref())?);
    let receiver = SocketCanReceiver {
        socket: socket.clone(),
    };
    let sender = SocketCanSender { socket };
    Ok((sender, receiver))
}
