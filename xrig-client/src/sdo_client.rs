use std::time::Duration;

use snafu::Snafu;
use tokio::sync::Mutex;
use xrig_common::{
    constants::ObjectRef,
    node_id::NodeId,
    sdo::{RawAbortCode, SdoRequest, SdoResponse},
    traits::{AsyncCanReceiver, AsyncCanSender, CanSendError as _},
    CanMessage,
};

/// Default time to wait for a node to answer a request
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(150);

/// Error returned by [`SdoClient`] methods
#[derive(Clone, Debug, PartialEq, Snafu)]
pub enum SdoClientError {
    /// No matching response arrived before the deadline
    #[snafu(display("No response from node {node} accessing object 0x{index:04X}sub{sub}"))]
    Timeout {
        /// The node which did not answer
        node: u8,
        /// Index of the object being accessed
        index: u16,
        /// Sub index of the object being accessed
        sub: u8,
    },
    /// Received a response for the right object, but with an unexpected command specifier
    #[snafu(display("Unexpected SDO response. Expected {expecting}, got {response:?}"))]
    Mismatch {
        /// The type of response which was expected
        expecting: String,
        /// The response which was received
        response: SdoResponse,
    },
    /// Received a ServerAbort response from the node
    #[snafu(display("Received abort accessing object 0x{index:04X}sub{sub}: {abort_code}"))]
    ServerAbort {
        /// Index of the SDO access which was aborted
        index: u16,
        /// Sub index of the SDO access which was aborted
        sub: u8,
        /// Reason for the abort
        abort_code: RawAbortCode,
    },
    /// An upload confirmation for the requested object carried no usable value
    MalformedResponse,
    /// The client has been closed, or the receiver reported that the transport is gone
    #[snafu(display("CAN transport is down"))]
    TransportDown,
    /// Failed to write a message to the socket
    #[snafu(display("Failed to send CAN message: {message}"))]
    SocketSendFailed {
        /// A string describing the error reason
        message: String,
    },
}

impl SdoClientError {
    /// True for failures of the transport itself, rather than of a single request
    ///
    /// A transport error will fail every subsequent request, whereas a protocol error (timeout,
    /// abort, mismatch) concerns only the request which produced it.
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            SdoClientError::TransportDown | SdoClientError::SocketSendFailed { .. }
        )
    }
}

type Result<T> = std::result::Result<T, SdoClientError>;

/// Convenience macro for expecting a particular variant of a response and erroring on abort or an
/// unexpected variant
macro_rules! match_response  {
    ($resp: ident, $expecting: literal, $($match:pat => $code : expr),*) => {
        match $resp {
            $($match => $code),*
            SdoResponse::Abort { object, abort_code } => {
                return ServerAbortSnafu {
                    index: object.index,
                    sub: object.sub,
                    abort_code: RawAbortCode::from(abort_code),
                }
                .fail()
            }
            _ => {
                return MismatchSnafu {
                    expecting: $expecting,
                    response: $resp,
                }
                .fail()
            }
        }
    };
}

use paste::paste;
macro_rules! access_methods {
    ($type: ty) => {
        paste! {
            #[doc = concat!("Read a ", stringify!($type), " object from a node")]
            pub async fn [<read_ $type>](&self, node: NodeId, object: ObjectRef) -> Result<$type> {
                let raw = self.read(node, object).await?;
                Ok(raw as $type)
            }

            #[doc = concat!("Write a ", stringify!($type), " object on a node")]
            pub async fn [<write_ $type>](&self, node: NodeId, object: ObjectRef, value: $type) -> Result<()> {
                self.download(node, object, &value.to_le_bytes()).await
            }
        }
    };
}

#[derive(Debug)]
struct Transport<S, R> {
    sender: S,
    receiver: R,
}

/// A client for the SDO servers of all nodes on one bus
///
/// Only expedited transfers (values of up to 4 bytes) are supported. A single client owns the bus:
/// requests are serialized by an internal lock, so that only one request is outstanding at a time
/// and responses can be correlated to it by node and object. The client is meant to be shared
/// between axes as an `Arc<SdoClient>`.
#[derive(Debug)]
pub struct SdoClient<S, R> {
    timeout: Duration,
    transport: Mutex<Option<Transport<S, R>>>,
}

impl<S: AsyncCanSender, R: AsyncCanReceiver> SdoClient<S, R> {
    /// Create a new client on a bus
    pub fn new(sender: S, receiver: R) -> Self {
        Self {
            timeout: DEFAULT_RESPONSE_TIMEOUT,
            transport: Mutex::new(Some(Transport { sender, receiver })),
        }
    }

    /// Set the timeout for waiting on SDO server responses
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Get the current timeout for waiting on SDO server responses
    pub fn get_timeout(&self) -> Duration {
        self.timeout
    }

    /// Release the transport
    ///
    /// Any request made after closing fails with [`SdoClientError::TransportDown`]. A request in
    /// progress completes before the transport is dropped.
    pub async fn close(&self) {
        self.transport.lock().await.take();
    }

    /// Returns true if [`Self::close`] has been called
    pub async fn is_closed(&self) -> bool {
        self.transport.lock().await.is_none()
    }

    /// Read an object from a node, returning the raw payload as an unsigned value
    pub async fn read(&self, node: NodeId, object: ObjectRef) -> Result<u32> {
        let resp = self.transact(node, SdoRequest::upload(object)).await?;
        match_response!(
            resp,
            "ConfirmUpload",
            SdoResponse::ConfirmUpload { .. } => {
                resp.value().ok_or(SdoClientError::MalformedResponse)
            }
        )
    }

    /// Write a 32-bit value to a node
    pub async fn write(&self, node: NodeId, object: ObjectRef, value: u32) -> Result<()> {
        self.download(node, object, &value.to_le_bytes()).await
    }

    async fn download(&self, node: NodeId, object: ObjectRef, data: &[u8]) -> Result<()> {
        let resp = self
            .transact(node, SdoRequest::expedited_download(object, data))
            .await?;
        match_response!(
            resp,
            "ConfirmDownload",
            SdoResponse::ConfirmDownload { .. } => {
                Ok(())
            }
        )
    }

    access_methods!(u8);
    access_methods!(u16);
    access_methods!(u32);
    access_methods!(i32);

    /// Send one request and wait for the response to it
    async fn transact(&self, node: NodeId, req: SdoRequest) -> Result<SdoResponse> {
        let mut guard = self.transport.lock().await;
        let transport = guard.as_mut().ok_or(SdoClientError::TransportDown)?;

        let leftovers = transport.receiver.drain();
        if !leftovers.is_empty() {
            log::warn!(
                "Response buffer had {} unprocessed messages: {:?}",
                leftovers.len(),
                leftovers
            );
        }

        let frame = CanMessage::new(node.sdo_request_id(), &req.to_bytes());
        log::debug!("SDO request to node {node}: {frame:?}");
        Self::send(transport, frame).await?;
        self.wait_for_response(transport, node, req.object()).await
    }

    async fn send(transport: &mut Transport<S, R>, frame: CanMessage) -> Result<()> {
        let mut tries = 3;
        loop {
            match transport.sender.send(frame).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tries -= 1;
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    if tries == 0 {
                        return SocketSendFailedSnafu {
                            message: e.message(),
                        }
                        .fail();
                    }
                }
            }
        }
    }

    async fn wait_for_response(
        &self,
        transport: &mut Transport<S, R>,
        node: NodeId,
        object: ObjectRef,
    ) -> Result<SdoResponse> {
        let resp_id = node.sdo_response_id();
        let wait_until = tokio::time::Instant::now() + self.timeout;
        loop {
            match tokio::time::timeout_at(wait_until, transport.receiver.recv()).await {
                // Err indicates the timeout elapsed, so return
                Err(_) => {
                    return TimeoutSnafu {
                        node: node.raw(),
                        index: object.index,
                        sub: object.sub,
                    }
                    .fail()
                }
                Ok(Ok(msg)) => {
                    if msg.id() != resp_id {
                        log::debug!("Ignoring frame {msg:?} while waiting on node {node}");
                        continue;
                    }
                    let resp = match SdoResponse::try_from(msg.data()) {
                        Ok(resp) => resp,
                        Err(e) => {
                            log::debug!("Ignoring unparseable frame {msg:?} from node {node}: {e}");
                            continue;
                        }
                    };
                    if resp.object() != object {
                        log::debug!(
                            "Ignoring response for {} while waiting on {object}",
                            resp.object()
                        );
                        continue;
                    }
                    log::debug!("SDO response from node {node}: {msg:?}");
                    return Ok(resp);
                }
                // Recv returned an error
                Ok(Err(e)) => {
                    log::error!("Error reading from socket: {e:?}");
                    return TransportDownSnafu.fail();
                }
            }
        }
    }
}
