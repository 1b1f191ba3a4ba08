//! Task two: woken by the pacing signal, flashes its indicator once per wake
//! and checks its own button.
use std::sync::Arc;

use log::{debug, info};

use super::{Blink, EdgeDetector, FaultLatch, IndicatorReport, Pin, Role, Task, TaskReport};
use crate::{
    coord::{CancelToken, Coordination, StatusCell},
    rt::ContextId,
};

pub struct Consumer {
    coord: Arc<Coordination>,
    token: CancelToken,
    output: Blink,
    input: Pin,
    status: Option<StatusCell>,
}

impl Consumer {
    pub fn new(coord: Arc<Coordination>, token: CancelToken, output: Blink, input: Pin) -> Self {
        Self {
            coord,
            token,
            output,
            input,
            status: None,
        }
    }

    /// Reads the producer's status marker back on every counter update.
    pub fn with_status(mut self, cell: StatusCell) -> Self {
        self.status = Some(cell);
        self
    }
}

impl Task for Consumer {
    fn role(&self) -> Role {
        Role::Consumer
    }

    fn run(&mut self) -> TaskReport {
        self.coord.record_identity(Role::Consumer, ContextId::current());
        let mut report = IndicatorReport::default();
        let mut button = EdgeDetector::default();
        let mut status_latch = FaultLatch::default();

        // Runs until the producer has closed the channel and every signal it
        // posted has been served. Cancellation only shortens the flash.
        while self.coord.await_signal().is_ok() {
            report.wakeups += 1;
            self.output.on(&self.token);
            self.output.off(&self.token);

            let status = self.status.as_ref();
            let (value, observed) = self.coord.with_lock(|cs| {
                let value = cs.increment();
                let observed = status.map(|cell| cell.read(cs));
                (value, observed)
            });
            if let Some(value) = observed.and_then(|result| status_latch.check("status cell", result)) {
                report.last_status = Some(value);
            }

            report.iterations += 1;
            report.increments += 1;
            debug!("consumer action {} done, counter at {value}", report.wakeups);

            if let Some(low) = self.input.is_low() {
                if button.update(low) {
                    report.presses += 1;
                    info!("{} pressed", self.input.label());
                }
            }
        }

        self.output.release();
        info!("{} exiting after {} wake-ups", Role::Consumer, report.wakeups);
        TaskReport::Consumer(report)
    }
}
