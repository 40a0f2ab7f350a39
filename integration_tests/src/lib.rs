pub mod mock_camera;
pub mod sim_bus;
pub mod sim_drive;
pub mod utils;

pub mod prelude {
    pub use super::mock_camera::MockCamera;
    pub use super::sim_bus::{SimBus, SimBusReceiver, SimBusSender};
    pub use super::sim_drive::{wait_until, SimDrive, INITIAL_RATE};
    pub use super::utils::{fast_motion, get_sdo_client, sim_axis, BusLogger, SimAxis, SimClient};
    pub use xrig_client::SdoClientError;
    pub use xrig_common::{
        constants::objects,
        sdo::{AbortCode, RawAbortCode},
        DriveState, NodeId,
    };
}
