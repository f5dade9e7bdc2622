// src/engine.rs
use crate::{
    alarms::Severity,
    config::{Config, SerialConfig},
    demo::DemoGenerator,
    error::*,
    reconciler::{ReconcileStats, Reconciler},
    state::{Mode, MonitorState, SharedState, StatusSnapshot},
    telemetry::Command,
    transport::Transport,
};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[cfg(feature = "metrics")]
use metrics::{counter, gauge, histogram};

/// Depth of the operator command queue
const COMMAND_QUEUE: usize = 256;

/// Operator actions, applied at the start of the next tick
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorCommand {
    Acknowledge {
        severity: Severity,
        shelf: usize,
        name: String,
    },
    AcknowledgeAll,
    /// Set locally and send to the controller when LIVE
    SetSetpoint { shelf: usize, value: f64 },
    /// Nudge the local setpoint by one configured step
    StepSetpoint { shelf: usize, up: bool },
    /// Send the current local setpoint to the controller
    ApplySetpoint { shelf: usize },
    TogglePower { shelf: usize },
    SimulateAlarm {
        shelf: usize,
        name: String,
        severity: Severity,
    },
    /// Open the link, optionally with new settings
    Connect { settings: Option<SerialConfig> },
    Disconnect,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct EngineStats {
    pub running: bool,
    pub mode: Option<Mode>,
    pub tick_count: u64,
    pub error_count: u64,
    pub uptime_secs: u64,
    pub last_tick_us: u64,
    pub max_tick_us: u64,
    pub reconcile: ReconcileStats,
}

pub struct Engine {
    state: SharedState,
    link: Box<dyn Transport>,
    demo: DemoGenerator,
    reconciler: Reconciler,
    config: Config,
    commands: mpsc::Receiver<OperatorCommand>,
    command_tx: mpsc::Sender<OperatorCommand>,
    running: Arc<AtomicBool>,
    tick_count: Arc<AtomicU64>,
    error_count: Arc<AtomicU64>,
    start_time: Instant,
    stats_handle: Arc<RwLock<EngineStats>>,
    connect_requested: bool,
    disconnect_requested: bool,
    outbound: Vec<Command>,
}

impl Engine {
    pub fn new(config: Config, link: Box<dyn Transport>) -> Result<Self> {
        config.validate()?;

        #[cfg(feature = "metrics")]
        {
            gauge!("shelfwatch_tick_ms").set(config.engine.tick_ms as f64);
            gauge!("shelfwatch_shelf_count").set(config.shelves.count as f64);
        }

        let state = MonitorState::new(&config).into_shared();
        let (command_tx, commands) = mpsc::channel(COMMAND_QUEUE);
        info!(
            "Monitoring {} shelves, link {}",
            config.shelves.count,
            link.describe()
        );

        Ok(Self {
            state,
            link,
            demo: DemoGenerator::new(config.demo.clone()),
            reconciler: Reconciler::with_max_shelves(config.shelves.max_count),
            connect_requested: config.serial.auto_connect,
            disconnect_requested: false,
            config,
            commands,
            command_tx,
            running: Arc::new(AtomicBool::new(false)),
            tick_count: Arc::new(AtomicU64::new(0)),
            error_count: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
            stats_handle: Arc::new(RwLock::new(EngineStats::default())),
            outbound: Vec::new(),
        })
    }

    /// Cloneable handle for submitting commands and reading snapshots
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            state: self.state.clone(),
            tx: self.command_tx.clone(),
            running: self.running.clone(),
            stats: self.stats_handle.clone(),
            rolling_window: self.config.shelves.rolling_window,
            log_tail: self.config.engine.log_tail,
        }
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub async fn run(&mut self) -> Result<()> {
        if self.running.swap(true, Ordering::Relaxed) {
            return Err(MonitorError::Config("Engine is already running".into()));
        }
        info!("Starting shelfwatch engine with tick: {}ms", self.config.engine.tick_ms);

        #[cfg(feature = "metrics")]
        gauge!("shelfwatch_engine_running").set(1.0);

        self.stats_handle.write().running = true;

        let mut interval = interval(Duration::from_millis(self.config.engine.tick_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.running.load(Ordering::Relaxed) {
            let tick_start = Instant::now();

            match self.tick().await {
                Ok(()) => {
                    let tick_count = self.tick_count.fetch_add(1, Ordering::Relaxed) + 1;

                    #[cfg(feature = "metrics")]
                    counter!("shelfwatch_ticks_total").increment(1);

                    debug!("Tick {} completed", tick_count);
                }
                Err(e) => {
                    self.tick_count.fetch_add(1, Ordering::Relaxed);
                    let error_count = self.error_count.fetch_add(1, Ordering::Relaxed) + 1;
                    error!("Tick error #{}: {}", error_count, e);

                    #[cfg(feature = "metrics")]
                    counter!("shelfwatch_tick_errors_total").increment(1);
                }
            }

            self.update_stats(tick_start.elapsed());
            interval.tick().await;
        }

        if self.link.is_open() {
            if let Err(e) = self.link.close().await {
                warn!("Closing {} failed: {}", self.link.describe(), e);
            }
        }

        info!("shelfwatch engine stopped");

        #[cfg(feature = "metrics")]
        gauge!("shelfwatch_engine_running").set(0.0);

        self.stats_handle.write().running = false;
        Ok(())
    }

    /// One tick: commands, connection changes, then DEMO or LIVE work
    ///
    /// A link failure switches to DEMO before the error is returned, so the
    /// next tick runs the generator.
    pub async fn tick(&mut self) -> Result<()> {
        self.drain_commands();

        if std::mem::take(&mut self.disconnect_requested) {
            self.disconnect().await;
        }
        if std::mem::take(&mut self.connect_requested) {
            self.connect().await;
        }

        let mode = self.state.lock().mode();
        match mode {
            Mode::Demo => {
                self.outbound.clear();
                let mut state = self.state.lock();
                self.demo.step(&mut state);
                Ok(())
            }
            Mode::Live => {
                self.flush_outbound().await?;
                self.poll_link().await
            }
        }
    }

    // ========================================================================
    // OPERATOR COMMANDS
    // ========================================================================

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            debug!("Operator command: {:?}", command);
            if let Err(e) = self.apply_command(command) {
                warn!("Operator command rejected: {}", e);
                self.state.lock().log.push(format!("Command rejected: {}", e));
            }
        }
    }

    fn apply_command(&mut self, command: OperatorCommand) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let live = state.mode() == Mode::Live;

        match command {
            OperatorCommand::Acknowledge {
                severity,
                shelf,
                name,
            } => {
                if state.alarms.acknowledge(&severity, shelf, &name, &mut state.log) && live {
                    self.outbound.push(Command::acknowledge(shelf, name));
                }
            }
            OperatorCommand::AcknowledgeAll => state.alarms.acknowledge_all(&mut state.log),
            OperatorCommand::SetSetpoint { shelf, value } => {
                state.shelves.set_bounds(shelf, Some(value), None, None)?;
                state
                    .log
                    .push(format!("Setpoint S{} set to {:.1}", shelf, value));
                if live {
                    self.outbound.push(Command::set_setpoint(shelf, value));
                }
            }
            OperatorCommand::StepSetpoint { shelf, up } => {
                let step = self.config.shelves.setpoint_step;
                let demo = self.demo.config();
                let current = state.shelves.get_mut(shelf)?.setpoint;
                let delta = if up { step } else { -step };
                let next = (current + delta).clamp(demo.min_temp, demo.max_temp);
                state.shelves.set_bounds(shelf, Some(next), None, None)?;
            }
            OperatorCommand::ApplySetpoint { shelf } => {
                let setpoint = state.shelves.get_mut(shelf)?.setpoint;
                if live {
                    self.outbound.push(Command::set_setpoint(shelf, setpoint));
                    state
                        .log
                        .push(format!("Sent setpoint S{}={:.1}", shelf, setpoint));
                } else {
                    state.log.push(format!(
                        "Setpoint S{}={:.1} kept locally (not connected)",
                        shelf, setpoint
                    ));
                }
            }
            OperatorCommand::TogglePower { shelf } => {
                let on = state.shelves.toggle_power(shelf)?;
                info!("Shelf {} power {}", shelf, if on { "ON" } else { "OFF" });
                state
                    .log
                    .push(format!("Shelf {} power {}", shelf, if on { "ON" } else { "OFF" }));
            }
            OperatorCommand::SimulateAlarm {
                shelf,
                name,
                severity,
            } => {
                if shelf >= state.shelves.count() {
                    return Err(MonitorError::OutOfRange {
                        index: shelf,
                        count: state.shelves.count(),
                    });
                }
                state
                    .log
                    .push(format!("Sim request: {} on shelf {}", name, shelf));
                if live {
                    self.outbound.push(Command::simulate(shelf, name));
                } else {
                    state.alarms.raise(
                        severity,
                        shelf,
                        &name,
                        "Simulated alarm",
                        false,
                        &mut state.log,
                    );
                }
            }
            OperatorCommand::Connect { settings } => {
                if let Some(settings) = settings {
                    self.link.apply_settings(&settings);
                    self.config.serial = settings;
                }
                self.connect_requested = true;
            }
            OperatorCommand::Disconnect => {
                self.disconnect_requested = true;
                self.connect_requested = false;
            }
        }
        Ok(())
    }

    // ========================================================================
    // LINK MANAGEMENT
    // ========================================================================

    async fn connect(&mut self) {
        if self.link.is_open() {
            if let Err(e) = self.link.close().await {
                debug!("Closing stale link failed: {}", e);
            }
        }

        let target = self.link.describe();
        info!("Connecting to {}", target);

        match self.link.open().await {
            Ok(()) => {
                {
                    let mut state = self.state.lock();
                    state.set_mode(Mode::Live);
                    state.log.push(format!("Connected to {}", target));
                }
                self.outbound.insert(0, Command::GetStatus);

                #[cfg(feature = "metrics")]
                gauge!("shelfwatch_live_mode").set(1.0);
            }
            Err(e) => self.enter_demo(format!("Connect to {} failed: {}", target, e)),
        }
    }

    async fn disconnect(&mut self) {
        if let Err(e) = self.link.close().await {
            warn!("Closing {} failed: {}", self.link.describe(), e);
        }
        self.enter_demo("Disconnected".to_string());
    }

    fn enter_demo(&mut self, reason: String) {
        warn!("{}; running in DEMO mode", reason);
        self.outbound.clear();
        self.demo.reset_clock();

        let mut state = self.state.lock();
        state.set_mode(Mode::Demo);
        state.log.push(reason);

        #[cfg(feature = "metrics")]
        gauge!("shelfwatch_live_mode").set(0.0);
    }

    async fn link_lost(&mut self, e: &MonitorError) {
        if let Err(close_err) = self.link.close().await {
            debug!("Closing failed link: {}", close_err);
        }
        self.enter_demo(format!("Link lost: {}", e));
    }

    async fn flush_outbound(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.outbound);
        for command in &pending {
            if let Err(e) = self.link.send(command).await {
                self.link_lost(&e).await;
                return Err(e);
            }
            debug!("Sent {:?}", command);
        }
        Ok(())
    }

    async fn poll_link(&mut self) -> Result<()> {
        let timeout = Duration::from_millis(self.config.serial.read_timeout_ms);
        let max = self.config.engine.max_messages_per_tick;

        let outcome = self.link.read_lines(max, timeout).await;

        // Lines that arrived before a failure are still authoritative.
        if !outcome.lines.is_empty() || outcome.discarded > 0 {
            let mut state = self.state.lock();
            for _ in 0..outcome.discarded {
                self.reconciler
                    .discard_oversized(&mut state, self.config.serial.max_line_len);
            }
            let mut applied = 0usize;
            for line in &outcome.lines {
                if self.reconciler.apply_line(&mut state, line) {
                    applied += 1;
                }
            }
            debug!("Applied {}/{} lines", applied, outcome.lines.len());

            #[cfg(feature = "metrics")]
            counter!("shelfwatch_messages_applied_total").increment(applied as u64);
        }

        if let Some(e) = outcome.failure {
            self.link_lost(&e).await;
            return Err(e);
        }
        Ok(())
    }

    fn update_stats(&self, tick_duration: Duration) {
        let tick_us = tick_duration.as_micros() as u64;

        #[cfg(feature = "metrics")]
        histogram!("shelfwatch_tick_duration_us").record(tick_us as f64);

        let mode = self.state.lock().mode();
        let mut stats = self.stats_handle.write();
        stats.mode = Some(mode);
        stats.tick_count = self.tick_count.load(Ordering::Relaxed);
        stats.error_count = self.error_count.load(Ordering::Relaxed);
        stats.uptime_secs = self.start_time.elapsed().as_secs();
        stats.last_tick_us = tick_us;
        stats.max_tick_us = stats.max_tick_us.max(tick_us);
        stats.reconcile = self.reconciler.stats();
    }

    pub fn stop(&self) {
        info!("Stopping shelfwatch engine");
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> EngineStats {
        self.stats_handle.read().clone()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }
}

// ============================================================================
// ENGINE HANDLE
// ============================================================================

/// Presentation-side view of a running engine
#[derive(Clone)]
pub struct EngineHandle {
    state: SharedState,
    tx: mpsc::Sender<OperatorCommand>,
    running: Arc<AtomicBool>,
    stats: Arc<RwLock<EngineStats>>,
    rolling_window: usize,
    log_tail: usize,
}

impl EngineHandle {
    /// Queue a command without waiting
    pub fn submit(&self, command: OperatorCommand) -> Result<()> {
        self.tx
            .try_send(command)
            .map_err(|e| MonitorError::Queue(e.to_string()))
    }

    /// Queue a command, waiting for room
    pub async fn send(&self, command: OperatorCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|e| MonitorError::Queue(e.to_string()))
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.state.lock().snapshot(self.rolling_window, self.log_tail)
    }

    /// Rendered log lines containing `needle`, case-insensitive
    pub fn filter_log(&self, needle: &str) -> Vec<String> {
        self.state.lock().log.filter(needle)
    }

    pub fn mode(&self) -> Mode {
        self.state.lock().mode()
    }

    pub fn stats(&self) -> EngineStats {
        self.stats.read().clone()
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryLink;

    fn engine(auto_connect: bool) -> (Engine, MemoryLink) {
        let mut config = Config::default();
        config.serial.auto_connect = auto_connect;
        config.demo.seed = Some(1);
        let link = MemoryLink::new("unit");
        let engine = Engine::new(config, Box::new(link.clone())).unwrap();
        (engine, link)
    }

    #[tokio::test]
    async fn demo_tick_generates_samples() {
        let (mut engine, link) = engine(false);
        engine.tick().await.unwrap();
        let state = engine.state().lock();
        assert_eq!(state.mode(), Mode::Demo);
        assert_eq!(state.shelves.get(0).unwrap().history_len(), 1);
        assert_eq!(link.open_count(), 0);
    }

    #[tokio::test]
    async fn step_setpoint_clamps_to_demo_range() {
        let (mut engine, _link) = engine(false);
        engine.state().lock().shelves.set_bounds(0, Some(119.8), None, None).unwrap();
        let handle = engine.handle();
        handle.submit(OperatorCommand::StepSetpoint { shelf: 0, up: true }).unwrap();
        handle.submit(OperatorCommand::StepSetpoint { shelf: 0, up: true }).unwrap();
        engine.tick().await.unwrap();
        assert_eq!(engine.state().lock().shelves.get(0).unwrap().setpoint, 120.0);
    }

    #[tokio::test]
    async fn bad_shelf_command_is_logged_not_fatal() {
        let (mut engine, _link) = engine(false);
        let handle = engine.handle();
        handle.submit(OperatorCommand::TogglePower { shelf: 9 }).unwrap();
        engine.tick().await.unwrap();
        assert_eq!(handle.filter_log("command rejected").len(), 1);
    }

    #[tokio::test]
    async fn run_refuses_second_start() {
        let (mut engine, _link) = engine(false);
        engine.running.store(true, Ordering::Relaxed);
        assert!(matches!(engine.run().await, Err(MonitorError::Config(_))));
    }
}
