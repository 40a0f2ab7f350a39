#![allow(dead_code)]
use std::{sync::Arc, time::Duration};

use crate::sim_bus::{SimBus, SimBusReceiver, SimBusSender};
use xrig_client::{AxisController, MotionAxis, MotionConfig, SdoClient};
use xrig_common::{
    sdo::{SdoRequest, SdoResponse},
    traits::AsyncCanReceiver,
    NodeId, StepMapping,
};

pub type SimClient = SdoClient<SimBusSender, SimBusReceiver>;
pub type SimAxis = MotionAxis<SimBusSender, SimBusReceiver>;

/// Create a client on its own port of the bus
pub fn get_sdo_client(bus: &mut SimBus) -> Arc<SimClient> {
    let (sender, receiver) = bus.new_port();
    let mut client = SdoClient::new(sender, receiver);
    client.set_timeout(Duration::from_millis(50));
    Arc::new(client)
}

/// Move timing short enough for tests
pub fn fast_motion() -> MotionConfig {
    MotionConfig {
        poll_interval: Duration::from_millis(5),
        move_timeout: Duration::from_secs(5),
    }
}

/// An axis with 1000 steps per unit and step 0 at position 0
pub fn sim_axis(client: &Arc<SimClient>, name: &str, node_id: u8) -> SimAxis {
    let controller = AxisController::new(
        client.clone(),
        NodeId::new(node_id).unwrap(),
        StepMapping::new(1000.0, 0, 0.0).unwrap(),
    );
    MotionAxis::new(name, controller, 10.0, fast_motion())
}

/// Prints every frame seen on the bus when dropped, to help debug failing tests
pub struct BusLogger {
    rx: SimBusReceiver,
}

impl BusLogger {
    pub fn new(rx: SimBusReceiver) -> Self {
        Self { rx }
    }

    pub fn print(&mut self) {
        println!("Bus message history");
        println!("-------------------");
        while let Some(msg) = self.rx.try_recv() {
            let id = msg.id().raw();
            if (0x600..0x680).contains(&id) {
                if let Ok(req) = SdoRequest::try_from(msg.data()) {
                    println!("{:03X} {:?}", id, req);
                    continue;
                }
            } else if (0x580..0x600).contains(&id) {
                if let Ok(resp) = SdoResponse::try_from(msg.data()) {
                    println!("{:03X} {:?}", id, resp);
                    continue;
                }
            }
            println!("{:?}", msg);
        }
    }
}

impl Drop for BusLogger {
    fn drop(&mut self) {
        self.print();
    }
}
