//! The three execution contexts and the pieces they share.
pub mod compute;
pub mod gate;
pub mod indicator;
pub mod input;
pub mod mapping;
pub mod measure;

use std::{fmt, time::Duration};

use log::{trace, warn};

pub use compute::{MappingComputation, ModulationMapper};
pub use gate::{GateOutcome, StartGate};
pub use indicator::Producer;
pub use input::Consumer;
pub use mapping::{MappingOutput, MappingReport, MappingTask};
pub use measure::{MeasurementLog, MeasurementSummary};

use crate::{
    config::BlinkConfig,
    coord::CancelToken,
    soc::{device::DeviceResult, register::BoundField},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Producer,
    Consumer,
    Mapping,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Producer, Role::Consumer, Role::Mapping];

    pub fn thread_name(self) -> &'static str {
        match self {
            Role::Producer => "task-one",
            Role::Consumer => "task-two",
            Role::Mapping => "task-three",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Producer => "producer",
            Role::Consumer => "consumer",
            Role::Mapping => "mapping",
        })
    }
}

/// An execution context body. Run once on its own thread.
pub trait Task: Send {
    fn role(&self) -> Role;
    fn run(&mut self) -> TaskReport;
}

/// Tally of an indicator/input context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndicatorReport {
    pub iterations: u32,
    pub increments: u32,
    pub signals: u32,
    pub wakeups: u32,
    pub presses: u32,
    pub last_status: Option<u32>,
}

#[derive(Debug)]
pub enum TaskReport {
    Producer(IndicatorReport),
    Consumer(IndicatorReport),
    Mapping(MappingReport),
}

impl TaskReport {
    pub fn role(&self) -> Role {
        match self {
            TaskReport::Producer(_) => Role::Producer,
            TaskReport::Consumer(_) => Role::Consumer,
            TaskReport::Mapping(_) => Role::Mapping,
        }
    }
}

/// Swallows repeated failures of one register access so a sentinel window
/// produces a single warning instead of one per iteration.
#[derive(Debug, Default)]
pub struct FaultLatch {
    tripped: bool,
}

impl FaultLatch {
    pub fn check<T>(&mut self, what: &str, result: DeviceResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) if !self.tripped => {
                self.tripped = true;
                warn!("{what}: {err}; further failures suppressed");
                None
            }
            Err(err) => {
                trace!("{what}: {err}");
                None
            }
        }
    }
}

/// A bound field driven or sampled by one context.
#[derive(Debug)]
pub struct Pin {
    field: BoundField,
    latch: FaultLatch,
}

impl Pin {
    pub fn new(field: BoundField) -> Self {
        Self {
            field,
            latch: FaultLatch::default(),
        }
    }

    pub fn label(&self) -> &str {
        self.field.label()
    }

    pub fn drive(&mut self, on: bool) {
        let result = self.field.drive(on);
        if self.latch.check(self.field.label(), result).is_some() {
            trace!("{} {}", self.field.label(), if on { "on" } else { "off" });
        }
    }

    /// `None` when the field cannot be read.
    pub fn is_low(&mut self) -> Option<bool> {
        let result = self.field.is_low();
        self.latch.check(self.field.label(), result)
    }
}

/// Output toggled for a fixed on phase followed by a fixed off phase.
#[derive(Debug)]
pub struct Blink {
    pin: Pin,
    timing: BlinkConfig,
}

impl Blink {
    pub fn new(pin: Pin, timing: BlinkConfig) -> Self {
        Self { pin, timing }
    }

    /// Drives the output on and holds it. False if cancelled while holding.
    pub fn on(&mut self, token: &CancelToken) -> bool {
        self.set();
        self.hold(token)
    }

    pub fn set(&mut self) {
        self.pin.drive(true);
    }

    /// Waits out the on phase without touching the output.
    pub fn hold(&mut self, token: &CancelToken) -> bool {
        rest(token, self.timing.on())
    }

    /// Drives the output off and rests. False if cancelled while resting.
    pub fn off(&mut self, token: &CancelToken) -> bool {
        self.pin.drive(false);
        rest(token, self.timing.off())
    }

    pub fn release(&mut self) {
        self.pin.drive(false);
    }

    pub fn label(&self) -> &str {
        self.pin.label()
    }
}

fn rest(token: &CancelToken, duration: Duration) -> bool {
    if duration.is_zero() {
        return !token.is_cancelled();
    }
    token.sleep(duration)
}

/// Reports a press only on the released to pressed transition of an
/// active-low input.
#[derive(Debug, Default)]
pub struct EdgeDetector {
    pressed: bool,
}

impl EdgeDetector {
    pub fn update(&mut self, low: bool) -> bool {
        let edge = low && !self.pressed;
        self.pressed = low;
        edge
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::soc::{
        device::{Device, Endianness, MmioWindow, RamMemory, WindowRange},
        register::{FieldWidth, RegisterField},
    };

    #[test]
    fn edge_detector_fires_once_per_press() {
        let mut edge = EdgeDetector::default();
        let samples = [false, true, true, false, true, false];
        let presses: Vec<bool> = samples.iter().map(|low| edge.update(*low)).collect();
        assert_eq!(presses, [false, true, false, false, true, false]);
    }

    #[test]
    fn blink_leaves_output_off_after_release() {
        let window: Arc<dyn Device> = Arc::new(RamMemory::new("gpio1", 16, Endianness::Little));
        let field = RegisterField::new("led1", 0, 0x0200_0000, FieldWidth::U32);
        let mut blink = Blink::new(
            Pin::new(BoundField::new("gpio1.led1", window.clone(), field)),
            BlinkConfig { on_ms: 0, off_ms: 0 },
        );
        let token = CancelToken::new();
        assert!(blink.on(&token));
        assert_eq!(window.read_u32(0).unwrap(), 0x0200_0000);
        blink.release();
        assert_eq!(window.read_u32(0).unwrap(), 0);
    }

    #[test]
    fn zero_length_phase_reports_cancellation() {
        let token = CancelToken::new();
        token.cancel();
        assert!(!rest(&token, Duration::ZERO));
    }

    #[test]
    fn pin_on_sentinel_window_is_quiet_and_harmless() {
        let range = WindowRange {
            base: 0xFF70_9000,
            len: 4096,
            mode: Default::default(),
        };
        let window: Arc<dyn Device> = Arc::new(MmioWindow::sentinel("gpio1", range));
        let field = RegisterField::new("key3", 0x50, 0x0200_0000, FieldWidth::U32);
        let mut pin = Pin::new(BoundField::new("gpio1.key3", window, field));
        pin.drive(true);
        assert_eq!(pin.is_low(), None);
        assert_eq!(pin.is_low(), None);
    }

    #[test]
    fn thread_names_are_distinct() {
        let names: Vec<_> = Role::ALL.iter().map(|role| role.thread_name()).collect();
        assert_eq!(names, ["task-one", "task-two", "task-three"]);
    }
}
