//! Orchestrates one run: establishes the board, builds the shared state and
//! the three contexts, spawns them, joins them, reads the measurement log
//! back and tears the windows down.
use std::{
    io,
    process::ExitCode,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{error, info, warn};
use thiserror::Error;

use crate::{
    config::{BoardConfig, BufferTarget, ConfigError},
    coord::{CancelToken, Coordination, StatusCell},
    rt::{IsolationPolicy, LinuxRt, PosixClock, RtController},
    soc::board::{Backend, Board, BoardError},
    task::{
        Blink, Consumer, IndicatorReport, MappingOutput, MappingReport, MappingTask, MeasurementLog,
        MeasurementSummary, ModulationMapper, Pin, Producer, Role, StartGate, Task, TaskReport,
    },
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Board(#[from] BoardError),
    #[error("spawning the {role} context: {source}")]
    Spawn {
        role: Role,
        #[source]
        source: io::Error,
    },
    #[error("the {role} context panicked")]
    ContextPanicked { role: Role },
}

impl SessionError {
    /// 2 when the run could not start; 1 when it started but failed.
    pub fn exit_status(&self) -> u8 {
        match self {
            SessionError::ContextPanicked { .. } => 1,
            _ => 2,
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.exit_status())
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub counter: u32,
    pub signals_posted: u32,
    pub producer: IndicatorReport,
    pub consumer: IndicatorReport,
    pub mapping: MappingReport,
    pub entries: Vec<u32>,
    pub teardown: Result<(), BoardError>,
}

impl RunReport {
    pub fn summary(&self) -> Option<MeasurementSummary> {
        MeasurementSummary::of(&self.entries)
    }

    /// 1 when any window failed to unmap.
    pub fn exit_status(&self) -> u8 {
        if self.teardown.is_ok() { 0 } else { 1 }
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.exit_status())
    }
}

pub struct Session {
    config: BoardConfig,
    backend: Backend,
    rt: Arc<dyn RtController>,
}

impl Session {
    pub fn new(config: BoardConfig, backend: Backend) -> Self {
        Self {
            config,
            backend,
            rt: Arc::new(LinuxRt),
        }
    }

    pub fn with_controller(mut self, rt: Arc<dyn RtController>) -> Self {
        self.rt = rt;
        self
    }

    pub fn run(self) -> Result<RunReport, SessionError> {
        let config = &self.config;
        let policy = config.isolation.policy()?;
        let board = Board::establish(config, &self.backend)?;

        let coord = Arc::new(Coordination::new(config.run.signal_every));
        let producer_token = CancelToken::new();
        let consumer_token = CancelToken::new();
        let mapping_token = CancelToken::new();
        coord.register_peer(Role::Producer, producer_token.clone());
        coord.register_peer(Role::Consumer, consumer_token.clone());

        // Every field is resolved before the first lifecycle write, so a
        // failure here leaves the board untouched.
        let tokens = [mapping_token.clone(), producer_token, consumer_token];
        let tasks = match self.contexts(&board, &coord, policy, tokens) {
            Ok(tasks) => tasks,
            Err(err) => {
                log_teardown(&board.teardown());
                return Err(err.into());
            }
        };
        board.startup(&config.lifecycle);

        let abort = Abort {
            coord: coord.clone(),
            mapping: mapping_token,
        };
        let mut handles = Vec::with_capacity(tasks.len());
        let mut spawn_error = None;
        for task in tasks {
            match spawn(task, abort.clone()) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    error!("{err}");
                    abort.trigger();
                    spawn_error = Some(err);
                    break;
                }
            }
        }

        // Mapping joins first. Cancelling its peers again is a no-op unless it
        // died before doing so itself. The producer closes the signal channel
        // on exit, so the consumer joins last after serving every signal.
        let mut reports = Vec::with_capacity(handles.len());
        let mut panicked = None;
        for (role, handle) in handles {
            match handle.join() {
                Ok(report) => reports.push(report),
                Err(_) => {
                    error!("{role} context panicked");
                    panicked = panicked.or(Some(role));
                }
            }
            if role == Role::Mapping {
                coord.cancel_peers();
            }
        }

        board.shutdown(&config.lifecycle);
        let mut producer = IndicatorReport::default();
        let mut consumer = IndicatorReport::default();
        let mut mapping = MappingReport::default();
        for report in reports {
            match report {
                TaskReport::Producer(report) => producer = report,
                TaskReport::Consumer(report) => consumer = report,
                TaskReport::Mapping(report) => mapping = report,
            }
        }
        let entries = match mapping.log.take().map(|log| log.entries()) {
            Some(Ok(entries)) => entries,
            Some(Err(err)) => {
                warn!("reading the measurement log back failed: {err}");
                Vec::new()
            }
            None => Vec::new(),
        };

        let teardown = board.teardown();
        log_teardown(&teardown);
        if let Some(err) = spawn_error {
            return Err(err);
        }
        if let Some(role) = panicked {
            return Err(SessionError::ContextPanicked { role });
        }

        let report = RunReport {
            counter: coord.counter(),
            signals_posted: coord.signals_posted(),
            producer,
            consumer,
            mapping,
            entries,
            teardown,
        };
        info!(
            "run complete: counter {}, {} signals, {} samples",
            report.counter,
            report.signals_posted,
            report.entries.len()
        );
        Ok(report)
    }

    /// Builds the mapping, producer and consumer contexts, in that order.
    fn contexts(
        &self,
        board: &Board,
        coord: &Arc<Coordination>,
        policy: IsolationPolicy,
        [mapping_token, producer_token, consumer_token]: [CancelToken; 3],
    ) -> Result<[Box<dyn Task>; 3], BoardError> {
        let run = &self.config.run;
        let roles = &self.config.roles;
        let memory = board.memory();

        let producer = Producer::new(
            coord.clone(),
            producer_token,
            Blink::new(Pin::new(board.field(&roles.producer.output)?), run.producer),
            Pin::new(board.field(&roles.producer.input)?),
        )
        .with_status(StatusCell::new(memory.window.clone(), memory.control_offset));
        let consumer = Consumer::new(
            coord.clone(),
            consumer_token,
            Blink::new(Pin::new(board.field(&roles.consumer.output)?), run.consumer),
            Pin::new(board.field(&roles.consumer.input)?),
        )
        .with_status(StatusCell::new(memory.window.clone(), memory.control_offset));

        let gate = match &run.start.button {
            Some(path) => StartGate::Button {
                pin: Pin::new(board.field(path)?),
                timeout: Duration::from_millis(run.start.timeout_ms),
                poll: Duration::from_millis(run.start.poll_ms.max(1)),
            },
            None => StartGate::Settle(Duration::from_millis(run.start.settle_ms)),
        };
        let output = match run.mapping.target {
            BufferTarget::Local => MappingOutput::Local,
            BufferTarget::OnChip => MappingOutput::OnChip {
                window: memory.window.clone(),
                offset: memory.buffer_offset,
            },
        };
        let mapping = MappingTask::new(
            coord.clone(),
            mapping_token,
            run.bound,
            Blink::new(Pin::new(board.field(&roles.mapping.indicator)?), run.mapping.blink()),
            self.rt.clone(),
            Box::new(PosixClock::new(run.clock)),
            Box::new(ModulationMapper::new(run.mapping.seed)),
            MeasurementLog::attach(memory.window.clone(), memory.array_offset, run.measurement_capacity),
        )
        .with_policy(policy)
        .with_buffer(run.mapping.buffer_words, output)
        .with_gate(gate);

        let tasks: [Box<dyn Task>; 3] = [Box::new(mapping), Box::new(producer), Box::new(consumer)];
        Ok(tasks)
    }
}

fn log_teardown(teardown: &Result<(), BoardError>) {
    if let Err(BoardError::Teardown(failures)) = teardown {
        for failure in failures {
            error!("{failure}");
        }
    }
}

/// Stops every context. Fired when a context unwinds or a spawn fails, so
/// the remaining contexts do not wait on a partner that is gone.
#[derive(Clone)]
struct Abort {
    coord: Arc<Coordination>,
    mapping: CancelToken,
}

impl Abort {
    fn trigger(&self) {
        self.mapping.cancel();
        self.coord.cancel_peers();
        self.coord.close_signal();
    }
}

struct AbortOnPanic(Abort);

impl Drop for AbortOnPanic {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.trigger();
        }
    }
}

fn spawn(mut task: Box<dyn Task>, abort: Abort) -> Result<(Role, JoinHandle<TaskReport>), SessionError> {
    let role = task.role();
    let handle = thread::Builder::new()
        .name(role.thread_name().to_string())
        .spawn(move || {
            let _guard = AbortOnPanic(abort);
            task.run()
        })
        .map_err(|source| SessionError::Spawn { role, source })?;
    Ok((role, handle))
}
