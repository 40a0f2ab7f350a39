use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{Parser, Subcommand, ValueEnum};
use snafu::{whatever, Report, ResultExt, Whatever};
use tokio_util::sync::CancellationToken;
use xrig_client::{
    common::rig_config::AxisConfig,
    open_socketcan,
    scan::{AxisSweep, MovementMode, Rig, ScanCoordinator, ScanPlan},
    AxisController, DryRunCamera, MotionAxis, RigConfig, SdoClient, SocketCanReceiver,
    SocketCanSender,
};

type Client = SdoClient<SocketCanSender, SocketCanReceiver>;

#[derive(Parser, Debug)]
#[command(name = "xrig", version, about = "Control the stages of the X-ray imaging rig")]
struct Args {
    /// Rig configuration file. The factory configuration is used if not given.
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// CAN interface, overriding the configuration
    #[arg(long, short)]
    interface: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the drive state and position of one or all axes
    Status {
        /// Axis name
        axis: Option<String>,
    },
    /// Move an axis and wait for it to arrive
    Move {
        /// Axis name
        axis: String,
        /// Target position
        #[arg(allow_negative_numbers = true)]
        position: f64,
        /// Speed in units per second, defaults to half the maximum
        #[arg(long, short)]
        speed: Option<f64>,
        /// Return as soon as the move is started
        #[arg(long)]
        no_wait: bool,
    },
    /// Reset faults and enable an axis
    Reset {
        /// Axis name
        axis: String,
    },
    /// Quick stop an axis and give it back to the joystick
    Stop {
        /// Axis name
        axis: String,
    },
    /// Switch stage power
    Power {
        #[arg(value_enum)]
        state: PowerState,
    },
    /// Run a scan
    Scan(ScanArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum PowerState {
    On,
    Off,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    Stepped,
    Continuous,
}

#[derive(clap::Args, Debug)]
struct ScanArgs {
    /// Inner axis
    #[arg(long, default_value = "rot")]
    axis1: String,
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    start1: f64,
    #[arg(long, default_value_t = 180.0, allow_negative_numbers = true)]
    end1: f64,
    #[arg(long, default_value_t = 18)]
    steps1: u32,
    /// Optional outer axis
    #[arg(long)]
    axis2: Option<String>,
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    start2: f64,
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    end2: f64,
    #[arg(long, default_value_t = 1)]
    steps2: u32,
    #[arg(long, value_enum, default_value_t = Mode::Stepped)]
    mode: Mode,
    /// Exposure time in seconds
    #[arg(long, default_value_t = 600.0)]
    exposure_time: f64,
    /// Exposures per grid point
    #[arg(long, default_value_t = 3)]
    exposures: u32,
    /// Image file name prefix
    #[arg(long, default_value = "IMG_diffraction")]
    prefix: String,
    /// Image directory on the detector
    #[arg(long, default_value = "/data")]
    image_path: String,
    /// Scan log file
    #[arg(long, default_value = "scan.log")]
    log: PathBuf,
    /// Time exposures locally instead of using a detector
    #[arg(long)]
    dry_run: bool,
}

impl ScanArgs {
    fn plan(&self) -> ScanPlan {
        ScanPlan {
            axis1: AxisSweep::new(&self.axis1, self.start1, self.end1, self.steps1),
            axis2: self
                .axis2
                .as_ref()
                .map(|axis| AxisSweep::new(axis, self.start2, self.end2, self.steps2)),
            mode: match self.mode {
                Mode::Stepped => MovementMode::Stepped,
                Mode::Continuous => MovementMode::Continuous,
            },
            exposure_time: self.exposure_time,
            exposures: self.exposures,
            prefix: self.prefix.clone(),
            image_path: self.image_path.clone(),
            log_path: self.log.clone(),
        }
    }
}

fn load_config(args: &Args) -> Result<RigConfig, Whatever> {
    let mut config = match &args.config {
        Some(path) => RigConfig::load_from_file(path)
            .with_whatever_context(|_| format!("Failed to load {}", path.display()))?,
        None => RigConfig::default(),
    };
    if let Some(interface) = &args.interface {
        config.bus.interface = interface.clone();
    }
    Ok(config)
}

fn open_client(config: &RigConfig) -> Result<Arc<Client>, Whatever> {
    let (tx, rx) = open_socketcan(&config.bus.interface).with_whatever_context(|_| {
        format!("Failed to open CAN interface {}", config.bus.interface)
    })?;
    let mut client = SdoClient::new(tx, rx);
    client.set_timeout(config.bus.response_timeout());
    Ok(Arc::new(client))
}

fn motion_axis(
    client: &Arc<Client>,
    config: &RigConfig,
    cfg: &AxisConfig,
) -> Result<MotionAxis<SocketCanSender, SocketCanReceiver>, Whatever> {
    MotionAxis::from_config(client.clone(), cfg, &config.motion)
        .with_whatever_context(|_| format!("Bad configuration for axis {}", cfg.name))
}

fn find_axis<'a>(config: &'a RigConfig, name: &str) -> Result<&'a AxisConfig, Whatever> {
    config
        .axis(name)
        .with_whatever_context(|_| format!("Unknown axis {name}"))
}

async fn print_status(axis: &MotionAxis<SocketCanSender, SocketCanReceiver>) {
    let ctrl: &AxisController<_, _> = axis.controller();
    let report = async {
        let status = ctrl.status().await?;
        let steps = ctrl.actual_position().await?;
        let target = ctrl.target_position().await?;
        let demand = ctrl.position_demand().await?;
        Ok::<_, xrig_client::SdoClientError>((status, steps, target, demand))
    };
    match report.await {
        Ok((status, steps, target, demand)) => {
            let map = ctrl.mapping();
            println!(
                "{:<5} node {:<3} {:<20} status 0x{status:04X}  pos {:>10.4} {}  target {:>10.4}  demand {:>10.4}",
                axis.name(),
                ctrl.node(),
                xrig_client::common::DriveState::from_status_word(status).to_string(),
                map.steps_to_pos(steps),
                axis.unit(),
                map.steps_to_pos(target),
                map.steps_to_pos(demand),
            );
        }
        Err(e) => println!("{:<5} node {:<3} {e}", axis.name(), ctrl.node()),
    }
}

/// A token which fires on Ctrl-C
fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupted");
            child.cancel();
        }
    });
    token
}

async fn run_scan(
    client: &Arc<Client>,
    config: &RigConfig,
    args: &ScanArgs,
) -> Result<(), Whatever> {
    if !args.dry_run {
        whatever!("No detector backend is available; use --dry-run to rehearse the scan motion");
    }
    let plan = args.plan();
    let mut axes = vec![motion_axis(client, config, find_axis(config, &plan.axis1.axis)?)?];
    if let Some(sweep) = &plan.axis2 {
        axes.push(motion_axis(client, config, find_axis(config, &sweep.axis)?)?);
    }
    println!(
        "{} images, estimated exposure time {:?}",
        plan.total_points(),
        plan.estimated_duration()
    );

    let rig = Rig::new(axes, DryRunCamera::new());
    let mut coordinator = ScanCoordinator::new(rig, (&config.scan).into());
    coordinator
        .start(plan)
        .await
        .whatever_context("Failed to start scan")?;

    let handle = coordinator.handle();
    let interrupted = ctrl_c_token();
    let watcher = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(5));
        loop {
            tokio::select! {
                _ = interrupted.cancelled() => {
                    handle.stop();
                    break;
                }
                _ = ticker.tick() => {
                    let progress = handle.progress();
                    if let Some(file) = progress.last_file_name {
                        println!("{}/{} {file}", progress.completed, progress.total);
                    }
                }
            }
        }
    });

    let outcome = coordinator.join().await.whatever_context("Scan failed")?;
    watcher.abort();
    println!("{outcome}");
    if !outcome.is_completed() {
        whatever!("{outcome}");
    }
    Ok(())
}

async fn run(args: Args) -> Result<(), Whatever> {
    let config = load_config(&args)?;
    let client = open_client(&config)?;

    match &args.command {
        Command::Status { axis } => {
            let selected: Vec<&AxisConfig> = match axis {
                Some(name) => vec![find_axis(&config, name)?],
                None => config.axes.iter().collect(),
            };
            for cfg in selected {
                print_status(&motion_axis(&client, &config, cfg)?).await;
            }
        }
        Command::Move {
            axis,
            position,
            speed,
            no_wait,
        } => {
            let axis = motion_axis(&client, &config, find_axis(&config, axis)?)?;
            if *no_wait {
                axis.start_move(*position, *speed)
                    .await
                    .whatever_context("Move failed")?;
            } else {
                axis.move_until_cancelled(*position, *speed, &ctrl_c_token())
                    .await
                    .whatever_context("Move failed")?;
                print_status(&axis).await;
            }
        }
        Command::Reset { axis } => {
            let axis = motion_axis(&client, &config, find_axis(&config, axis)?)?;
            axis.controller()
                .reset_faults()
                .await
                .whatever_context("Reset failed")?;
            print_status(&axis).await;
        }
        Command::Stop { axis } => {
            let axis = motion_axis(&client, &config, find_axis(&config, axis)?)?;
            axis.stop().await.whatever_context("Stop failed")?;
        }
        Command::Power { state } => {
            let Some(cfg) = config.power_gate_axis() else {
                whatever!("No axis is configured with power_gate = true");
            };
            let axis = motion_axis(&client, &config, cfg)?;
            axis.controller()
                .set_drive_power(*state == PowerState::On)
                .await
                .whatever_context("Failed to switch power")?;
        }
        Command::Scan(scan) => run_scan(&client, &config, scan).await?,
    }

    client.close().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Report<Whatever> {
    env_logger::init();
    let args = Args::parse();
    Report::from(run(args).await)
}
