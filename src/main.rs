use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use hexapod_runtime::config::{self, RobotConfig};
use hexapod_runtime::gait::GaitEngine;
use hexapod_runtime::motor::driver::LegController;
use hexapod_runtime::motor::lewansoul::{self, LewansoulBus};
use hexapod_runtime::motor::port::{ActuatorPort, SimulatedPort};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// In-memory actuators, no hardware
    Sim,
    /// LX-16A serial bus servos
    Serial,
    /// Hobby servos on two PCA9685 boards
    Pwm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Preset {
    Small,
    Lx16a,
}

#[derive(Debug, Parser)]
#[command(version, about = "Hexapod motion runtime over Zenoh")]
struct Args {
    #[arg(long, value_enum, default_value_t = Backend::Sim)]
    backend: Backend,

    /// Serial device for the LX-16A bus
    #[arg(long, default_value = config::SERIAL_PORT)]
    port: String,

    #[arg(long, default_value_t = lewansoul::DEFAULT_BAUDRATE)]
    baud: u32,

    /// I2C device for the PCA9685 boards
    #[arg(long, default_value = config::I2C_BUS)]
    i2c: String,

    /// JSON robot config; overrides --preset
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Preset::Small)]
    preset: Preset,
}

fn open_serial(args: &Args, config: &RobotConfig) -> Result<Box<dyn ActuatorPort + Send>, BoxError> {
    let mut bus = LewansoulBus::open_with_baudrate(&args.port, args.baud, config.servo_ids)?;

    let expected: Vec<u8> = config.servo_ids.iter().flat_map(|(_, ids)| ids.0).collect();
    let found = bus.scan(expected.iter().copied());
    if found.len() < expected.len() {
        let missing: Vec<u8> = expected.into_iter().filter(|id| !found.contains(id)).collect();
        warn!("Servos not answering: {:?}", missing);
    }
    if let Some(&first) = found.first() {
        if let Some(volts) = bus.read_voltage(first) {
            info!("Bus voltage: {:.2}V", volts);
        }
    }

    Ok(Box::new(bus))
}

#[cfg(target_os = "linux")]
fn open_pwm(args: &Args, config: &RobotConfig) -> Result<Box<dyn ActuatorPort + Send>, BoxError> {
    use hexapod_runtime::motor::pca9685::{Expander, PwmServoBus};
    use linux_embedded_hal::I2cdev;

    info!("Opening {} for PWM expanders", args.i2c);
    let [first, second] = config.pwm_addresses;
    let chips = [
        Expander::new(I2cdev::new(&args.i2c)?, 0, first)?,
        Expander::new(I2cdev::new(&args.i2c)?, 1, second)?,
    ];
    Ok(Box::new(PwmServoBus::new(chips, config.pwm_channels)))
}

#[cfg(not(target_os = "linux"))]
fn open_pwm(_args: &Args, _config: &RobotConfig) -> Result<Box<dyn ActuatorPort + Send>, BoxError> {
    Err("PWM backend needs Linux I2C (/dev/i2c-*)".into())
}

async fn start(args: Args) -> Result<(), BoxError> {
    let config = match &args.config {
        Some(path) => RobotConfig::load(path)?,
        None => match args.preset {
            Preset::Small => RobotConfig::default(),
            Preset::Lx16a => RobotConfig::lx16a(),
        },
    };

    let port: Box<dyn ActuatorPort + Send> = match args.backend {
        Backend::Sim => {
            info!("Using simulated actuators");
            Box::new(SimulatedPort::new())
        }
        Backend::Serial => open_serial(&args, &config)?,
        Backend::Pwm => open_pwm(&args, &config)?,
    };

    let legs = LegController::new(&config, port)?;
    let engine = GaitEngine::new(&config, legs);
    hexapod_runtime::runtime::run(engine).await
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init(); // installs the subscriber globally

    let args = Args::parse();
    if let Err(e) = start(args).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
