use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use xrig_common::messages::CanMessage;
use xrig_common::traits::{AsyncCanReceiver, AsyncCanSender};

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

struct Port {
    id: usize,
    tx: UnboundedSender<CanMessage>,
}

/// An in-memory CAN bus
///
/// Every frame sent on the bus is delivered to every receiver, except the receiver belonging to
/// the same port as the sender, like a socketcan socket.
#[derive(Clone, Default)]
pub struct SimBus {
    ports: Arc<Mutex<Vec<Port>>>,
    next_id: Arc<Mutex<usize>>,
    down: Arc<AtomicBool>,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc_id(&self) -> usize {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        *next
    }

    fn add_receiver(&self, id: usize) -> SimBusReceiver {
        let (tx, rx) = unbounded_channel();
        self.ports.lock().unwrap().push(Port { id, tx });
        SimBusReceiver { channel_rx: rx }
    }

    /// Create a sender/receiver pair which does not see its own frames
    pub fn new_port(&mut self) -> (SimBusSender, SimBusReceiver) {
        let id = self.alloc_id();
        let receiver = self.add_receiver(id);
        let sender = SimBusSender {
            id,
            ports: self.ports.clone(),
            down: self.down.clone(),
        };
        (sender, receiver)
    }

    /// Create a receiver which sees every frame on the bus
    pub fn new_receiver(&mut self) -> SimBusReceiver {
        let id = self.alloc_id();
        self.add_receiver(id)
    }

    /// Create a sender with no receiver of its own
    pub fn new_sender(&mut self) -> SimBusSender {
        SimBusSender {
            id: self.alloc_id(),
            ports: self.ports.clone(),
            down: self.down.clone(),
        }
    }

    /// Make every send on the bus fail, as if the interface went down
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::Relaxed);
    }
}

pub struct SimBusSender {
    id: usize,
    ports: Arc<Mutex<Vec<Port>>>,
    down: Arc<AtomicBool>,
}

impl AsyncCanSender for SimBusSender {
    type Error = CanMessage;

    async fn send(&mut self, msg: CanMessage) -> Result<(), CanMessage> {
        if self.down.load(Ordering::Relaxed) {
            return Err(msg);
        }
        for port in self.ports.lock().unwrap().iter() {
            if port.id != self.id {
                // A receiver which has been dropped just doesn't get the message
                port.tx.send(msg).ok();
            }
        }
        Ok(())
    }
}

pub struct SimBusReceiver {
    channel_rx: UnboundedReceiver<CanMessage>,
}

impl SimBusReceiver {
    pub fn flush(&mut self) {
        while self.channel_rx.try_recv().is_ok() {}
    }
}

impl AsyncCanReceiver for SimBusReceiver {
    type Error = ();

    async fn recv(&mut self) -> Result<CanMessage, Self::Error> {
        self.channel_rx.recv().await.ok_or(())
    }

    fn try_recv(&mut self) -> Option<CanMessage> {
        self.channel_rx.try_recv().ok()
    }
}
