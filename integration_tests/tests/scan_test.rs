use std::{path::Path, time::Duration};

use assertables::{assert_contains, assert_starts_with};
use integration_tests::prelude::*;
use serial_test::serial;
use xrig_client::scan::{
    AxisSweep, MovementMode, Rig, ScanConfig, ScanCoordinator, ScanError, ScanOutcome, ScanPlan,
    ScanState,
};

type SimRig = Rig<SimBusSender, SimBusReceiver, MockCamera>;

fn scan_config() -> ScanConfig {
    ScanConfig {
        exposure_poll_interval: Duration::from_millis(5),
        exposure_timeout_margin: Duration::from_secs(1),
    }
}

fn plan(log_path: &Path, axis1: AxisSweep) -> ScanPlan {
    ScanPlan {
        axis1,
        axis2: None,
        mode: MovementMode::Stepped,
        exposure_time: 0.01,
        exposures: 1,
        prefix: "IMG".into(),
        image_path: "/data/run1".into(),
        log_path: log_path.to_path_buf(),
    }
}

struct Setup {
    _bus: SimBus,
    drives: Vec<SimDrive>,
    camera: MockCamera,
    coordinator: ScanCoordinator<SimBusSender, SimBusReceiver, MockCamera>,
    dir: tempfile::TempDir,
}

impl Setup {
    /// A rig with one axis per name, on nodes 1, 2, ...
    fn new(axes: &[&str]) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut bus = SimBus::new();
        let drives: Vec<SimDrive> = (1..=axes.len() as u8)
            .map(|id| SimDrive::spawn(&mut bus, id))
            .collect();
        for drive in &drives {
            drive.set_speed_factor(10.0);
        }
        let client = get_sdo_client(&mut bus);
        let camera = MockCamera::new();
        let rig: SimRig = Rig::new(
            axes.iter()
                .enumerate()
                .map(|(i, name)| sim_axis(&client, name, i as u8 + 1))
                .collect(),
            camera.clone(),
        );
        Self {
            _bus: bus,
            drives,
            camera,
            coordinator: ScanCoordinator::new(rig, scan_config()),
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn log_path(&self) -> std::path::PathBuf {
        self.dir.path().join("scan.log")
    }

    fn log_lines(&self) -> Vec<String> {
        std::fs::read_to_string(self.log_path())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

#[tokio::test]
#[serial]
async fn test_stepped_scan() {
    let mut s = Setup::new(&["rot"]);
    let plan = plan(&s.log_path(), AxisSweep::new("rot", 0.0, 2.0, 3));

    s.coordinator.start(plan).await.unwrap();
    assert_ne!(ScanState::Idle, s.coordinator.state());
    let outcome = s.coordinator.join().await.unwrap();
    assert_eq!(ScanOutcome::Completed { points: 3 }, outcome);
    assert_eq!("Scan completed (3 images)", outcome.to_string());
    assert_eq!(ScanState::Idle, s.coordinator.state());

    assert_eq!(
        vec![
            "rot_start:rot_end:exposure_time:file_name",
            "0.0000:0.0000:0.01:IMG0001.tif",
            "1.0000:1.0000:0.01:IMG0002.tif",
            "2.0000:2.0000:0.01:IMG0003.tif",
        ],
        s.log_lines()
    );
    assert_eq!(
        vec!["IMG0001.tif", "IMG0002.tif", "IMG0003.tif"],
        s.camera.exposures()
    );
    assert_eq!(Some(0.01), s.camera.exposure_time());
    assert_eq!(Some(0.015), s.camera.exposure_period());
    assert_eq!(Some("/data/run1".to_string()), s.camera.image_path());
    assert_eq!(0, s.camera.aborts());

    let progress = s.coordinator.progress();
    assert_eq!(3, progress.total);
    assert_eq!(3, progress.completed);
    assert_eq!(Some("IMG0003.tif".to_string()), progress.last_file_name);

    // A completed stepped scan leaves the axis under joystick control, not quick stopped
    let drive = &s.drives[0];
    assert_eq!(DriveState::OperationEnabled, drive.state());
    assert_eq!(Some(0xFE), drive.object(objects::JOYSTICK_INPUT));

    // The rig is handed back and can run another scan
    assert!(s.coordinator.rig().is_some());
    let plan = plan_with_prefix(&s.log_path(), "second");
    s.coordinator.start(plan).await.unwrap();
    assert!(s.coordinator.join().await.unwrap().is_completed());
    assert_starts_with!(s.log_lines()[1].as_str(), "0.0000:");
}

fn plan_with_prefix(log_path: &Path, prefix: &str) -> ScanPlan {
    ScanPlan {
        prefix: prefix.into(),
        ..plan(log_path, AxisSweep::new("rot", 0.0, 0.0, 1))
    }
}

#[tokio::test]
#[serial]
async fn test_stop_mid_scan() {
    let mut s = Setup::new(&["rot"]);
    s.camera.hang_from(1);
    let plan = plan(&s.log_path(), AxisSweep::new("rot", 0.0, 2.0, 3));

    s.coordinator.start(plan).await.unwrap();
    let handle = s.coordinator.handle();
    assert!(
        wait_until(Duration::from_secs(2), || {
            handle.progress().last_file_name.as_deref() == Some("IMG0002.tif")
        })
        .await
    );
    assert_eq!(ScanState::Running, handle.state());
    handle.stop();
    assert_ne!(ScanState::Running, handle.state());
    // The worker notices within one exposure poll interval and winds down
    assert!(
        wait_until(Duration::from_millis(50), || handle.state() == ScanState::Idle).await,
        "still {:?}",
        handle.state()
    );

    let outcome = s.coordinator.join().await.unwrap();
    assert_eq!(ScanOutcome::Cancelled { points: 1 }, outcome);
    assert_eq!(ScanState::Idle, s.coordinator.state());
    assert_eq!(Some(outcome), handle.outcome());

    // Only the completed exposure is logged
    assert_eq!(2, s.log_lines().len());
    assert_eq!("0.0000:0.0000:0.01:IMG0001.tif", s.log_lines()[1]);
    assert_eq!(1, s.camera.aborts());

    let drive = &s.drives[0];
    assert_eq!(Some(&0x3B), drive.control_words().last());
    assert_eq!(Some(0xFE), drive.object(objects::JOYSTICK_INPUT));

    // Stopping an idle coordinator does nothing
    s.coordinator.stop();
    assert_eq!(ScanState::Idle, s.coordinator.state());
}

#[tokio::test]
#[serial]
async fn test_continuous_scan() {
    let mut s = Setup::new(&["rot"]);
    s.drives[0].set_speed_factor(1.0);
    let plan = ScanPlan {
        mode: MovementMode::Continuous,
        exposure_time: 0.125,
        ..plan(&s.log_path(), AxisSweep::new("rot", 0.0, 1.5, 3))
    };
    // 1.5 units over 3 exposures of 0.125 s
    assert_eq!(4.0, plan.sweep_speed());

    s.coordinator.start(plan).await.unwrap();
    let outcome = s.coordinator.join().await.unwrap();
    assert_eq!(ScanOutcome::Completed { points: 3 }, outcome);

    let drive = &s.drives[0];
    // 4 units/s at 1000 steps per unit
    assert_contains!(drive.writes_to(objects::PROFILE_VELOCITY), &256_000);
    assert_contains!(drive.writes_to(objects::TARGET_POSITION), &1500);
    // The sweep is stopped once the last exposure completes
    assert_eq!(Some(&0x3B), drive.control_words().last());

    let lines = s.log_lines();
    assert_eq!(4, lines.len());
    let starts: Vec<f64> = lines[1..]
        .iter()
        .map(|l| l.split(':').next().unwrap().parse().unwrap())
        .collect();
    assert!(starts.windows(2).all(|w| w[0] <= w[1]), "{starts:?}");
}

#[tokio::test]
#[serial]
async fn test_camera_rejects_exposure() {
    let mut s = Setup::new(&["rot"]);
    s.camera.reject("IMG0002.tif");
    let plan = plan(&s.log_path(), AxisSweep::new("rot", 0.0, 2.0, 3));

    s.coordinator.start(plan).await.unwrap();
    let outcome = s.coordinator.join().await.unwrap();
    let ScanOutcome::Failed { reason } = &outcome else {
        panic!("Expected failure, got {outcome:?}");
    };
    assert_contains!(reason.as_str(), "IMG0002.tif");
    assert_eq!(2, s.log_lines().len());
    assert_eq!(Some(&0x3B), s.drives[0].control_words().last());
}

#[tokio::test]
#[serial]
async fn test_exposure_timeout() {
    let mut s = Setup::new(&["rot"]);
    s.camera.hang_from(0);
    let plan = plan(&s.log_path(), AxisSweep::new("rot", 0.0, 0.0, 1));

    s.coordinator.start(plan).await.unwrap();
    let outcome = s.coordinator.join().await.unwrap();
    let ScanOutcome::Failed { reason } = &outcome else {
        panic!("Expected failure, got {outcome:?}");
    };
    assert_contains!(reason.as_str(), "did not finish");
    assert_eq!(1, s.camera.aborts());
    assert_eq!(1, s.log_lines().len());
}

#[tokio::test]
#[serial]
async fn test_two_axis_scan() {
    let mut s = Setup::new(&["y", "z"]);
    let plan = ScanPlan {
        axis2: Some(AxisSweep::new("z", 0.0, 2.0, 2)),
        exposures: 2,
        ..plan(&s.log_path(), AxisSweep::new("y", 0.0, 1.0, 2))
    };

    s.coordinator.start(plan).await.unwrap();
    let outcome = s.coordinator.join().await.unwrap();
    assert_eq!(ScanOutcome::Completed { points: 8 }, outcome);

    // z moves once per row, y moves to the row start and then to each point
    assert_eq!(vec![0, 2000], s.drives[1].writes_to(objects::TARGET_POSITION));
    assert_eq!(
        vec![0, 0, 1000, 0, 0, 1000],
        s.drives[0].writes_to(objects::TARGET_POSITION)
    );

    let lines = s.log_lines();
    assert_eq!("y_start:y_end:z_start:z_end:exposure_time:file_name", lines[0]);
    assert_eq!(9, lines.len());
    assert_eq!("0.0000:0.0000:0.0000:0.0000:0.01:IMG0001.tif", lines[1]);
    assert_eq!("1.0000:1.0000:0.0000:0.0000:0.01:IMG0004.tif", lines[4]);
    assert_eq!("1.0000:1.0000:2.0000:2.0000:0.01:IMG0008.tif", lines[8]);
}

#[tokio::test]
#[serial]
async fn test_already_running() {
    let mut s = Setup::new(&["rot"]);
    s.camera.hang_from(0);
    let plan = plan(&s.log_path(), AxisSweep::new("rot", 0.0, 0.0, 1));

    s.coordinator.start(plan.clone()).await.unwrap();
    let err = s.coordinator.start(plan).await.unwrap_err();
    assert!(matches!(err, ScanError::AlreadyRunning));

    s.coordinator.stop();
    let outcome = s.coordinator.join().await.unwrap();
    assert_eq!(ScanOutcome::Cancelled { points: 0 }, outcome);
}

#[tokio::test]
#[serial]
async fn test_rejected_plans() {
    let mut s = Setup::new(&["rot"]);

    let bad = ScanPlan {
        exposures: 0,
        ..plan(&s.log_path(), AxisSweep::new("rot", 0.0, 1.0, 2))
    };
    let err = s.coordinator.start(bad).await.unwrap_err();
    assert!(matches!(err, ScanError::InvalidPlan { .. }));

    let unknown = plan(&s.log_path(), AxisSweep::new("x", 0.0, 1.0, 2));
    let err = s.coordinator.start(unknown).await.unwrap_err();
    assert_eq!("Rig has no axis named x", err.to_string());

    let no_dir = plan(
        &s.dir.path().join("missing").join("scan.log"),
        AxisSweep::new("rot", 0.0, 1.0, 2),
    );
    let err = s.coordinator.start(no_dir).await.unwrap_err();
    assert!(matches!(err, ScanError::CreateLog { .. }));

    // Nothing was started, and the rig is still available
    assert_eq!(ScanState::Idle, s.coordinator.state());
    assert!(s.coordinator.rig().is_some());
    assert!(matches!(
        s.coordinator.join().await,
        Err(ScanError::NotStarted)
    ));
    assert!(s.drives[0].requests().is_empty());
    assert!(!s.log_path().exists());
}

#[tokio::test]
#[serial]
async fn test_immediate_completion() {
    let mut s = Setup::new(&["rot"]);
    s.camera.set_polls_to_finish(0);
    let plan = plan(&s.log_path(), AxisSweep::new("rot", 0.0, 1.0, 2));

    s.coordinator.start(plan).await.unwrap();
    let outcome = s.coordinator.join().await.unwrap();
    assert_eq!(ScanOutcome::Completed { points: 2 }, outcome);
    // Exposures that finish within expose are never polled
    assert_eq!(0, s.camera.polls());
    assert_eq!(0, s.camera.aborts());
    assert_eq!(
        vec![
            "rot_start:rot_end:exposure_time:file_name",
            "0.0000:0.0000:0.01:IMG0001.tif",
            "1.0000:1.0000:0.01:IMG0002.tif",
        ],
        s.log_lines()
    );
}

#[tokio::test]
#[serial]
async fn test_drive_failure_mid_scan() {
    let mut s = Setup::new(&["rot"]);
    // Exposures take about 20 polls of 5 ms
    s.camera.set_polls_to_finish(20);
    let plan = plan(&s.log_path(), AxisSweep::new("rot", 0.0, 2.0, 3));

    s.coordinator.start(plan).await.unwrap();
    let handle = s.coordinator.handle();
    assert!(
        wait_until(Duration::from_secs(2), || {
            handle.progress().last_file_name.as_deref() == Some("IMG0001.tif")
        })
        .await
    );
    // The end position read of the first point fails
    s.drives[0].abort_on(objects::ACTUAL_POSITION, AbortCode::HardwareError);

    let outcome = s.coordinator.join().await.unwrap();
    let ScanOutcome::Failed { reason } = &outcome else {
        panic!("Expected failure, got {outcome:?}");
    };
    assert_contains!(reason.as_str(), "rot");
    assert_contains!(reason.as_str(), "HardwareError");
    assert_eq!(ScanState::Idle, s.coordinator.state());

    // The unlogged exposure is aborted, the axis stopped and handed back to the joystick
    assert_eq!(1, s.camera.aborts());
    assert_eq!(vec!["IMG0001.tif"], s.camera.exposures());
    let drive = &s.drives[0];
    assert_eq!(Some(&0x3B), drive.control_words().last());
    assert_eq!(Some(0xFE), drive.object(objects::JOYSTICK_INPUT));
    assert_eq!(
        vec!["rot_start:rot_end:exposure_time:file_name"],
        s.log_lines()
    );

    // The rig is handed back and works once the drive recovers
    s.drives[0].clear_aborts();
    s.camera.set_polls_to_finish(1);
    let plan = plan_with_prefix(&s.log_path(), "retry");
    s.coordinator.start(plan).await.unwrap();
    assert!(s.coordinator.join().await.unwrap().is_completed());
}

#[tokio::test]
#[serial]
async fn test_exposure_time_out_of_range() {
    let mut s = Setup::new(&["rot"]);

    // Beyond what a Duration can hold
    let bad = ScanPlan {
        exposure_time: 1e20,
        ..plan(&s.log_path(), AxisSweep::new("rot", 0.0, 0.0, 1))
    };
    let err = s.coordinator.start(bad).await.unwrap_err();
    assert!(matches!(err, ScanError::InvalidPlan { .. }));
    assert!(s.coordinator.rig().is_some());

    // A Duration, but no deadline can be placed that far out
    let far = ScanPlan {
        exposure_time: 1e19,
        ..plan(&s.log_path(), AxisSweep::new("rot", 0.0, 0.0, 1))
    };
    s.coordinator.start(far).await.unwrap();
    let outcome = s.coordinator.join().await.unwrap();
    let ScanOutcome::Failed { reason } = &outcome else {
        panic!("Expected failure, got {outcome:?}");
    };
    assert_contains!(reason.as_str(), "out of range");
    assert_eq!(1, s.camera.aborts());
    assert_eq!(Some(0xFE), s.drives[0].object(objects::JOYSTICK_INPUT));

    // The worker survived, so the rig is back
    assert!(s.coordinator.rig().is_some());
    let plan = plan_with_prefix(&s.log_path(), "after");
    s.coordinator.start(plan).await.unwrap();
    assert!(s.coordinator.join().await.unwrap().is_completed());
}
