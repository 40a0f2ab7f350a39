use assertables::assert_contains;
use xrig_common::rig_config::{RigConfig, RigConfigError};

#[test]
fn test_full_config() {
    const RIGCFG: &str = r#"
        [bus]
        interface = "vcan0"
        response_timeout_ms = 250

        [motion]
        poll_interval_ms = 50

        [[axis]]
        name = "y"
        node_id = 1
        steps_per_unit = 2400
        ref_pos_steps = 11976
        ref_pos = 0
        power_gate = true

        [[axis]]
        name = "rot"
        node_id = 3
        steps_per_unit = 1000
        ref_pos_steps = 230360
        ref_pos = 0
        max_rate = 600000
        unit = "deg"
    "#;

    let cfg = RigConfig::load_from_str(RIGCFG).expect("Failed to parse rig config");

    assert_eq!("vcan0", cfg.bus.interface);
    assert_eq!(250, cfg.bus.response_timeout().as_millis());
    assert_eq!(50, cfg.motion.poll_interval_ms);
    // Not given, so the default is used
    assert_eq!(300, cfg.motion.move_timeout_s);
    assert_eq!(1000, cfg.scan.exposure_poll_interval_ms);

    assert_eq!(2, cfg.axes.len());
    let y = cfg.axis("y").unwrap();
    assert_eq!(1_200_000, y.max_rate);
    assert_eq!(600_000, y.default_rate());
    assert_eq!("mm", y.unit);
    assert!(y.power_gate);
    assert_eq!(11976, y.mapping().unwrap().pos_to_steps(0.0));

    let rot = cfg.axis("rot").unwrap();
    assert_eq!(300_000, rot.default_rate());
    assert_eq!("y", cfg.power_gate_axis().unwrap().name);

    assert!(matches!(
        cfg.axis("z"),
        Err(RigConfigError::NoSuchAxis { .. })
    ));
}

#[test]
fn test_empty_config_uses_factory_axes() {
    let cfg = RigConfig::load_from_str("").unwrap();
    assert_eq!(RigConfig::default(), cfg);
    let names: Vec<&str> = cfg.axes.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(vec!["y", "z", "rot"], names);

    let z = cfg.axis("z").unwrap();
    assert_eq!(-9056, z.mapping().unwrap().pos_to_steps(300.0));
    assert_eq!(2, z.node().unwrap().raw());
}

#[test]
fn test_rejects_bad_configs() {
    let err = RigConfig::load_from_str(
        r#"
        [bus]
        interfce = "can0"
        "#,
    )
    .unwrap_err();
    assert!(matches!(err, RigConfigError::Parse { .. }));

    let err = RigConfig::load_from_str(
        r#"
        [[axis]]
        name = "y"
        node_id = 0
        steps_per_unit = 2400
        ref_pos_steps = 0
        ref_pos = 0
        "#,
    )
    .unwrap_err();
    assert!(matches!(err, RigConfigError::InvalidNodeId { node_id: 0, .. }));

    let err = RigConfig::load_from_str(
        r#"
        [[axis]]
        name = "y"
        node_id = 1
        steps_per_unit = 0
        ref_pos_steps = 0
        ref_pos = 0
        "#,
    )
    .unwrap_err();
    assert!(matches!(err, RigConfigError::InvalidMapping { .. }));

    let err = RigConfig::load_from_str(
        r#"
        [[axis]]
        name = "y"
        node_id = 1
        steps_per_unit = 1
        ref_pos_steps = 0
        ref_pos = 0

        [[axis]]
        name = "z"
        node_id = 1
        steps_per_unit = 1
        ref_pos_steps = 0
        ref_pos = 0
        "#,
    )
    .unwrap_err();
    assert_contains!(err.to_string(), "node ID 1");
}

#[test]
fn test_load_missing_file() {
    let err = RigConfig::load_from_file("/nonexistent/rig.toml").unwrap_err();
    assert!(matches!(err, RigConfigError::Io { .. }));
}
