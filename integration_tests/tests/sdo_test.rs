use assertables::assert_contains;
use integration_tests::prelude::*;
use serial_test::serial;
use xrig_common::ObjectRef;

const NODE: u8 = 1;

fn node() -> NodeId {
    NodeId::new(NODE).unwrap()
}

#[tokio::test]
#[serial]
async fn test_read_write() {
    let mut bus = SimBus::new();
    let _logger = BusLogger::new(bus.new_receiver());
    let drive = SimDrive::spawn(&mut bus, NODE);
    let client = get_sdo_client(&mut bus);

    // The status word is answered with a 2 byte payload
    let status = client.read_u16(node(), objects::STATUS_WORD).await.unwrap();
    assert_eq!(0x0637, status);
    assert_eq!(0x0637, client.read(node(), objects::STATUS_WORD).await.unwrap());

    client
        .write_u32(node(), objects::PROFILE_VELOCITY, 1_000_000)
        .await
        .unwrap();
    assert_eq!(
        1_000_000,
        client
            .read_u32(node(), objects::PROFILE_VELOCITY)
            .await
            .unwrap()
    );
    assert_eq!(Some(1_000_000), drive.object(objects::PROFILE_VELOCITY));
}

#[tokio::test]
#[serial]
async fn test_signed_positions() {
    let mut bus = SimBus::new();
    let drive = SimDrive::spawn(&mut bus, NODE);
    let client = get_sdo_client(&mut bus);

    drive.set_position(-9056);
    assert_eq!(
        -9056,
        client
            .read_i32(node(), objects::ACTUAL_POSITION)
            .await
            .unwrap()
    );
    assert_eq!(
        (-9056i32) as u32,
        client.read(node(), objects::ACTUAL_POSITION).await.unwrap()
    );
}

#[tokio::test]
#[serial]
async fn test_multiple_nodes() {
    let mut bus = SimBus::new();
    let drive1 = SimDrive::spawn(&mut bus, 1);
    let drive2 = SimDrive::spawn(&mut bus, 2);
    let client = get_sdo_client(&mut bus);

    drive1.set_position(100);
    drive2.set_position(-200);
    let n1 = NodeId::new(1).unwrap();
    let n2 = NodeId::new(2).unwrap();
    assert_eq!(100, client.read_i32(n1, objects::ACTUAL_POSITION).await.unwrap());
    assert_eq!(-200, client.read_i32(n2, objects::ACTUAL_POSITION).await.unwrap());
}

#[tokio::test]
#[serial]
async fn test_stray_frames_are_ignored() {
    let mut bus = SimBus::new();
    let drive = SimDrive::spawn(&mut bus, NODE);
    let client = get_sdo_client(&mut bus);

    // Each response is preceded by an answer for another object, an answer from another node,
    // a frame with an unknown command and a truncated frame
    drive.set_stray_frames(true);
    drive.set_position(42);
    assert_eq!(
        42,
        client
            .read_i32(node(), objects::ACTUAL_POSITION)
            .await
            .unwrap()
    );
    client
        .write_u32(node(), objects::JOYSTICK_INPUT, 0xFF)
        .await
        .unwrap();
    assert_eq!(0x0637, client.read_u16(node(), objects::STATUS_WORD).await.unwrap());
    assert_eq!(Some(0xFF), drive.object(objects::JOYSTICK_INPUT));
}

#[tokio::test]
#[serial]
async fn test_timeout() {
    let mut bus = SimBus::new();
    let drive = SimDrive::spawn(&mut bus, NODE);
    let client = get_sdo_client(&mut bus);

    drive.set_mute(true);
    let err = client
        .read_u16(node(), objects::STATUS_WORD)
        .await
        .unwrap_err();
    assert_eq!(
        SdoClientError::Timeout {
            node: NODE,
            index: 0x6041,
            sub: 0
        },
        err
    );
    assert!(!err.is_transport_error());

    // Nothing is left over to confuse the next request
    drive.set_mute(false);
    assert_eq!(
        0x0637,
        client.read_u16(node(), objects::STATUS_WORD).await.unwrap()
    );

    // No drive at all on node 5
    let err = client
        .read_u16(NodeId::new(5).unwrap(), objects::STATUS_WORD)
        .await
        .unwrap_err();
    assert!(matches!(err, SdoClientError::Timeout { node: 5, .. }));
}

#[tokio::test]
#[serial]
async fn test_server_abort() {
    let mut bus = SimBus::new();
    let drive = SimDrive::spawn(&mut bus, NODE);
    let client = get_sdo_client(&mut bus);

    let err = client
        .read_u32(node(), ObjectRef::new(0x5000, 1))
        .await
        .unwrap_err();
    assert_eq!(
        SdoClientError::ServerAbort {
            index: 0x5000,
            sub: 1,
            abort_code: RawAbortCode::Valid(AbortCode::NoSuchObject)
        },
        err
    );

    let err = client
        .write_i32(node(), objects::ACTUAL_POSITION, 5)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SdoClientError::ServerAbort {
            abort_code: RawAbortCode::Valid(AbortCode::ReadOnly),
            ..
        }
    ));

    drive.abort_on(objects::TARGET_POSITION, AbortCode::ValueTooHigh);
    let err = client
        .write_i32(node(), objects::TARGET_POSITION, i32::MAX)
        .await
        .unwrap_err();
    assert_contains!(err.to_string(), "0x607Asub0");
    assert_contains!(err.to_string(), "ValueTooHigh");
}

#[tokio::test]
#[serial]
async fn test_closed_client() {
    let mut bus = SimBus::new();
    let _drive = SimDrive::spawn(&mut bus, NODE);
    let client = get_sdo_client(&mut bus);

    client.read_u16(node(), objects::STATUS_WORD).await.unwrap();
    client.close().await;
    assert!(client.is_closed().await);
    let err = client
        .read_u16(node(), objects::STATUS_WORD)
        .await
        .unwrap_err();
    assert_eq!(SdoClientError::TransportDown, err);
    assert!(err.is_transport_error());
}

#[tokio::test]
#[serial]
async fn test_bus_down() {
    let mut bus = SimBus::new();
    let _drive = SimDrive::spawn(&mut bus, NODE);
    let client = get_sdo_client(&mut bus);

    bus.set_down(true);
    let err = client
        .write_u16(node(), objects::CONTROL_WORD, 0x06)
        .await
        .unwrap_err();
    assert!(matches!(err, SdoClientError::SocketSendFailed { .. }));
    assert!(err.is_transport_error());

    bus.set_down(false);
    client
        .write_u16(node(), objects::CONTROL_WORD, 0x06)
        .await
        .unwrap();
}
