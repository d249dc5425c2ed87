// 20 Hz command/telemetry loop around one blocking gait worker
// Note: gaits block for seconds (each phase sleeps), so they run on a dedicated
// worker thread; the async loop only queues commands and publishes state

use std::collections::VecDeque;
use std::sync::mpsc;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tokio::time::{Interval, interval};
use tracing::{error, info, warn};

// local imports
use crate::config::{LOOP_HZ, TOPIC_CMD_GAIT, TOPIC_HEALTH, TOPIC_LEGS};
use crate::gait::{CancelToken, GaitEngine, GaitError, PhaseClock};
use crate::messages::{GaitCommand, LegStates, RuntimeHealth};
use crate::motor::port::ActuatorPort;

/// How a dispatched command ended
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed,
    Cancelled,
    Failed(String),
}

impl From<&Result<(), GaitError>> for Outcome {
    fn from(result: &Result<(), GaitError>) -> Self {
        match result {
            Ok(()) => Outcome::Completed,
            Err(GaitError::Cancelled) => Outcome::Cancelled,
            Err(e) => Outcome::Failed(e.to_string()),
        }
    }
}

/// Reported by the worker after every command
#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub command: GaitCommand,
    pub outcome: Outcome,
    pub legs: LegStates,
}

/// Command queue and health state; the worker runs one command at a time
pub struct Runtime {
    queue: VecDeque<GaitCommand>,
    busy: bool,
    cancel: CancelToken,
    health: RuntimeHealth,
}

impl Runtime {
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            queue: VecDeque::new(),
            busy: false,
            cancel,
            health: RuntimeHealth::Idle,
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Process incoming command
    pub fn on_command(&mut self, cmd: GaitCommand) {
        info!("Received command: {:?}", &cmd);
        if cmd == GaitCommand::Stop {
            if !self.queue.is_empty() {
                warn!("Stop: dropping {} queued command(s)", self.queue.len());
            }
            self.queue.clear();
            if self.busy {
                self.cancel.cancel();
            }
            return;
        }
        self.queue.push_back(cmd);
    }

    /// Next command for the worker, if it is free
    pub fn next_dispatch(&mut self) -> Option<GaitCommand> {
        if self.busy {
            return None;
        }
        let cmd = self.queue.pop_front()?;
        // A Stop only ever applies to the command that was running
        self.cancel.reset();
        self.busy = true;
        self.health = RuntimeHealth::Executing;
        Some(cmd)
    }

    /// Worker finished a command
    pub fn on_report(&mut self, report: &WorkerReport) {
        self.busy = false;
        self.health = match &report.outcome {
            Outcome::Completed => {
                info!("Finished {:?}", report.command);
                RuntimeHealth::Idle
            }
            Outcome::Cancelled => {
                info!("Cancelled {:?}", report.command);
                RuntimeHealth::Cancelled
            }
            Outcome::Failed(reason) => {
                error!("{:?} failed: {}", report.command, reason);
                RuntimeHealth::Fault
            }
        };
    }
}

/// Blocking worker: owns the engine and runs commands until the sender goes away
pub fn worker<P, C>(
    mut engine: GaitEngine<P, C>,
    commands: mpsc::Receiver<GaitCommand>,
    reports: UnboundedSender<WorkerReport>,
) where
    P: ActuatorPort,
    C: PhaseClock,
{
    while let Ok(command) = commands.recv() {
        let result = engine.execute(&command);
        let report = WorkerReport {
            command,
            outcome: Outcome::from(&result),
            legs: engine.leg_states(),
        };
        if reports.send(report).is_err() {
            break;
        }
    }
    info!("Gait worker stopped");
}

/// Wait for the next tick; false once `shutdown` has resolved.
///
/// `shutdown` must outlive the loop so a signal between two ticks is kept.
async fn next_tick<F: Future + Unpin>(tick: &mut Interval, shutdown: &mut F) -> bool {
    tokio::select! {
        biased;
        _ = shutdown => false,
        _ = tick.tick() => true,
    }
}

pub async fn run<P, C>(engine: GaitEngine<P, C>) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    P: ActuatorPort + Send + 'static,
    C: PhaseClock + Send + 'static,
{
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CMD_GAIT).await?;
    let pub_legs = session.declare_publisher(TOPIC_LEGS).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut runtime = Runtime::new(engine.cancel_token());
    let mut legs = engine.leg_states();

    let (cmd_tx, cmd_rx) = mpsc::channel::<GaitCommand>();
    let (report_tx, mut report_rx) = unbounded_channel::<WorkerReport>();
    let worker_handle = tokio::task::spawn_blocking(move || worker(engine, cmd_rx, report_tx));

    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));

    info!("Runtime started: {}Hz loop", LOOP_HZ);
    info!("Subscribed to: {}", TOPIC_CMD_GAIT);
    info!("Publishing to: {}, {}", TOPIC_LEGS, TOPIC_HEALTH);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        if !next_tick(&mut tick, &mut ctrl_c).await {
            info!("Interrupted, stopping gait worker");
            runtime.on_command(GaitCommand::Stop);
            break;
        }

        // 1. Drain all pending commands (non-blocking)
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<GaitCommand>(&payload) {
                Ok(cmd) => {
                    runtime.on_command(cmd);
                }
                Err(e) => {
                    warn!("Failed to parse command: {}", e);
                }
            }
        }

        // 2. Collect finished work
        while let Ok(report) = report_rx.try_recv() {
            runtime.on_report(&report);
            legs = report.legs;
        }

        // 3. Hand the next command to the worker
        if let Some(cmd) = runtime.next_dispatch() {
            cmd_tx.send(cmd)?;
        }

        // 4. Publish leg state
        let legs_json = serde_json::to_string(&legs)?;
        pub_legs.put(legs_json).await?;

        // 5. Publish health
        let health_json = serde_json::to_string(&runtime.health())?;
        pub_health.put(health_json).await?;
    }

    // Worker exits once the command channel closes
    drop(cmd_tx);
    worker_handle.await?;
    Ok(())
}
