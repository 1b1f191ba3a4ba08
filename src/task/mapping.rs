//! Task three: the timing-critical context. It isolates itself, waits at the
//! start gate, then brackets the mapping computation with clock readings
//! until the shared counter reaches the bound, and finally stops the other
//! two contexts.
use std::sync::Arc;

use log::{debug, error, info, warn};

use super::{
    Blink, FaultLatch, GateOutcome, MappingComputation, MeasurementLog, Role, StartGate, Task,
    TaskReport,
};
use crate::{
    coord::{CancelToken, Coordination},
    rt::{Clock, ContextId, IsolationOutcome, IsolationPolicy, RtController, sub_second_interval},
    soc::device::{Device, DeviceResult},
};

/// Where each pass of the computation lands.
pub enum MappingOutput {
    Local,
    /// Scratch region of the on-chip memory, written inside the measured
    /// bracket.
    OnChip { window: Arc<dyn Device>, offset: usize },
}

impl MappingOutput {
    fn publish(&self, words: &[u32]) -> DeviceResult<()> {
        match self {
            MappingOutput::Local => Ok(()),
            MappingOutput::OnChip { window, offset } => words
                .iter()
                .enumerate()
                .try_for_each(|(idx, word)| window.write_u32(offset + idx * 4, *word)),
        }
    }
}

#[derive(Debug, Default)]
pub struct MappingReport {
    pub isolation: Option<IsolationOutcome>,
    pub gate: Option<GateOutcome>,
    pub iterations: u32,
    pub recorded: usize,
    pub rollover_dropped: u32,
    pub clock_failures: u32,
    pub log_full_dropped: u32,
    pub peers_cancelled: usize,
    /// Counter value seen when the loop ended.
    pub final_observed: u32,
    /// The filled log, handed back for read-out once every context joined.
    pub log: Option<MeasurementLog>,
}

pub struct MappingTask {
    coord: Arc<Coordination>,
    token: CancelToken,
    bound: u32,
    indicator: Blink,
    policy: IsolationPolicy,
    rt: Arc<dyn RtController>,
    clock: Box<dyn Clock>,
    mapper: Box<dyn MappingComputation>,
    scratch: Vec<u32>,
    output: MappingOutput,
    gate: StartGate,
    log: Option<DeviceResult<MeasurementLog>>,
}

impl MappingTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        coord: Arc<Coordination>,
        token: CancelToken,
        bound: u32,
        indicator: Blink,
        rt: Arc<dyn RtController>,
        clock: Box<dyn Clock>,
        mapper: Box<dyn MappingComputation>,
        log: DeviceResult<MeasurementLog>,
    ) -> Self {
        Self {
            coord,
            token,
            bound,
            indicator,
            policy: IsolationPolicy::default(),
            rt,
            clock,
            mapper,
            scratch: vec![0; 1024],
            output: MappingOutput::Local,
            gate: StartGate::Settle(Default::default()),
            log: Some(log),
        }
    }

    pub fn with_policy(mut self, policy: IsolationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_buffer(mut self, words: usize, output: MappingOutput) -> Self {
        self.scratch = vec![0; words];
        self.output = output;
        self
    }

    pub fn with_gate(mut self, gate: StartGate) -> Self {
        self.gate = gate;
        self
    }

    fn measured_loop(&mut self, log: &mut MeasurementLog, report: &mut MappingReport) {
        let mut publish_latch = FaultLatch::default();
        while self.coord.observed() < self.bound && !self.token.is_cancelled() {
            self.indicator.set();

            let start = self.clock.now();
            self.mapper.map(&mut self.scratch);
            let published = self.output.publish(&self.scratch);
            let end = self.clock.now();
            publish_latch.check("mapping output", published);

            match (start, end) {
                (Ok(start), Ok(end)) => match sub_second_interval(start, end) {
                    Some(nanos) => match log.record(nanos) {
                        Ok(true) => debug!("interval {}: {nanos} ns", log.len() - 1),
                        Ok(false) => report.log_full_dropped += 1,
                        Err(err) => error!("measurement log write failed: {err}"),
                    },
                    None => {
                        report.rollover_dropped += 1;
                        debug!("second rollover between readings; sample dropped");
                    }
                },
                (Err(err), _) | (_, Err(err)) => {
                    report.clock_failures += 1;
                    warn!("{err}; sample skipped");
                }
            }

            report.iterations += 1;
            if !self.indicator.hold(&self.token) {
                break;
            }
            if !self.indicator.off(&self.token) {
                break;
            }
        }
    }
}

impl Task for MappingTask {
    fn role(&self) -> Role {
        Role::Mapping
    }

    fn run(&mut self) -> TaskReport {
        let identity = ContextId::current();
        info!("{} running as {identity}", Role::Mapping);
        let mut report = MappingReport {
            isolation: Some(self.policy.apply(self.rt.as_ref(), identity)),
            ..MappingReport::default()
        };

        match self.log.take() {
            None => error!("{} context already ran", Role::Mapping),
            Some(Err(err)) => {
                error!("measurement log unavailable ({err}); skipping the measured loop");
            }
            Some(Ok(mut log)) => {
                let gate = self.gate.wait(&self.token);
                report.gate = Some(gate);
                if gate.proceeds() {
                    info!(
                        "mapping with {} over {} words until the counter reaches {}",
                        self.mapper.name(),
                        self.scratch.len(),
                        self.bound
                    );
                    self.measured_loop(&mut log, &mut report);
                }
                report.recorded = log.len();
                report.log = Some(log);
            }
        }

        report.final_observed = self.coord.observed();
        report.peers_cancelled = self.coord.cancel_peers();
        self.indicator.release();
        info!(
            "{} exiting after {} iterations, {} samples recorded, {} peers cancelled",
            Role::Mapping,
            report.iterations,
            report.recorded,
            report.peers_cancelled
        );
        TaskReport::Mapping(report)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::{
        config::BlinkConfig,
        rt::{ClockKind, RtError, RtResult, Timestamp, testing::RecordingRt},
        soc::{
            device::{DeviceError, Endianness, RamMemory},
            register::{BoundField, FieldWidth, RegisterField},
        },
        task::{ModulationMapper, Pin},
    };

    /// Replays readings and bumps the shared counter on every reading, so the
    /// loop bound is reached after a known number of iterations.
    struct ScriptedClock {
        readings: VecDeque<Option<Timestamp>>,
        coord: Arc<Coordination>,
    }

    impl Clock for ScriptedClock {
        fn now(&mut self) -> RtResult<Timestamp> {
            self.coord.with_lock(|cs| cs.increment());
            self.readings
                .pop_front()
                .flatten()
                .ok_or_else(|| RtError::ClockReadFailed {
                    clock: ClockKind::Realtime,
                    source: std::io::Error::from_raw_os_error(libc::EINVAL),
                })
        }
    }

    fn indicator(window: &Arc<dyn Device>) -> Blink {
        let field = RegisterField::new("led3", 0, 0x0800_0000, FieldWidth::U32);
        Blink::new(
            Pin::new(BoundField::new("gpio1.led3", window.clone(), field)),
            BlinkConfig { on_ms: 0, off_ms: 0 },
        )
    }

    fn peers(coord: &Coordination) -> [CancelToken; 2] {
        let tokens = [CancelToken::new(), CancelToken::new()];
        coord.register_peer(Role::Producer, tokens[0].clone());
        coord.register_peer(Role::Consumer, tokens[1].clone());
        tokens
    }

    #[test]
    fn loop_records_monotonic_pairs_and_stops_peers_at_the_bound() {
        let gpio: Arc<dyn Device> = Arc::new(RamMemory::new("gpio1", 16, Endianness::Little));
        let mem: Arc<dyn Device> = Arc::new(RamMemory::new("fpga_mem", 0x1000, Endianness::Little));
        let coord = Arc::new(Coordination::new(5));
        let tokens = peers(&coord);
        let clock = ScriptedClock {
            readings: VecDeque::from([
                Some(Timestamp::new(0, 100)),
                Some(Timestamp::new(0, 600)),
                Some(Timestamp::new(1, 999_999_000)),
                Some(Timestamp::new(2, 50)),
                None,
                Some(Timestamp::new(3, 10)),
            ]),
            coord: coord.clone(),
        };
        let log = MeasurementLog::attach(mem.clone(), 0x10, 50);
        let mut task = MappingTask::new(
            coord.clone(),
            CancelToken::new(),
            6,
            indicator(&gpio),
            Arc::new(RecordingRt::default()),
            Box::new(clock),
            Box::new(ModulationMapper::default()),
            log,
        )
        .with_buffer(16, MappingOutput::OnChip { window: mem.clone(), offset: 0x810 });

        let TaskReport::Mapping(report) = task.run() else {
            panic!("mapping task must report as mapping");
        };
        assert_eq!(report.iterations, 3, "loop ends once the counter reaches the bound");
        assert_eq!(report.recorded, 1);
        assert_eq!(report.rollover_dropped, 1);
        assert_eq!(report.clock_failures, 1);
        assert_eq!(report.log.unwrap().entries().unwrap(), [500]);
        assert_eq!(report.peers_cancelled, 2);
        assert!(tokens.iter().all(CancelToken::is_cancelled));
        assert_ne!(mem.read_u32(0x810).unwrap(), 0, "on-chip buffer received the mapped symbols");
        assert_eq!(gpio.read_u32(0).unwrap(), 0, "indicator off after the run");
    }

    #[test]
    fn unavailable_log_skips_the_loop_but_still_stops_peers() {
        let gpio: Arc<dyn Device> = Arc::new(RamMemory::new("gpio1", 16, Endianness::Little));
        let coord = Arc::new(Coordination::new(5));
        let tokens = peers(&coord);
        let clock = ScriptedClock {
            readings: VecDeque::new(),
            coord: coord.clone(),
        };
        let mut task = MappingTask::new(
            coord.clone(),
            CancelToken::new(),
            30,
            indicator(&gpio),
            Arc::new(RecordingRt::default()),
            Box::new(clock),
            Box::new(ModulationMapper::default()),
            Err(DeviceError::Unmapped {
                window: "fpga_mem".into(),
            }),
        );

        let TaskReport::Mapping(report) = task.run() else {
            panic!("mapping task must report as mapping");
        };
        assert_eq!(report.iterations, 0);
        assert_eq!(report.recorded, 0);
        assert!(report.log.is_none());
        assert_eq!(coord.counter(), 0, "clock never read without a log");
        assert_eq!(report.peers_cancelled, 2);
        assert!(tokens.iter().all(CancelToken::is_cancelled));
    }
}
