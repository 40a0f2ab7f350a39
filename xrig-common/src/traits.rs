//! Transport traits
//!
//! The protocol layer never talks to a CAN driver directly. Anything which can send and receive
//! [`CanMessage`]s (a socketcan interface, a vendor adapter, the simulated bus used in tests) can
//! back an [`SdoClient`](https://docs.rs/xrig-client) by implementing these two traits.

use crate::messages::CanMessage;

/// An async CAN sender trait
pub trait AsyncCanSender: Send {
    /// Error type returned by sender
    type Error: CanSendError;
    /// Send a message to the bus
    fn send(
        &mut self,
        msg: CanMessage,
    ) -> impl core::future::Future<Output = Result<(), Self::Error>> + Send;
}

/// A trait for CAN errors which may come from different types of interfaces
pub trait CanSendError: core::fmt::Debug + Send {
    /// Convert the error into the undelivered message
    fn into_can_message(self) -> CanMessage;

    /// Get a string describing the error
    fn message(&self) -> String;
}

impl CanSendError for CanMessage {
    fn into_can_message(self) -> CanMessage {
        self
    }

    fn message(&self) -> String {
        format!("Failed to send {self:?}")
    }
}

/// An async CAN receiver trait
pub trait AsyncCanReceiver: Send {
    /// The error type returned by recv
    type Error: core::fmt::Debug + Send;

    /// Receive available message immediately
    fn try_recv(&mut self) -> Option<CanMessage>;

    /// Wait for the next message
    ///
    /// Callers bound the wait with a deadline; an error means the transport itself is gone.
    fn recv(
        &mut self,
    ) -> impl core::future::Future<Output = Result<CanMessage, Self::Error>> + Send;

    /// Remove any pending messages from the receiver
    ///
    /// Returns the discarded messages so that the caller can report them
    fn drain(&mut self) -> Vec<CanMessage> {
        let mut leftovers = Vec::new();
        while let Some(msg) = self.try_recv() {
            leftovers.push(msg);
        }
        leftovers
    }
}
