//! Task one: blinks its indicator, watches its button and drives the pacing
//! signal through the shared counter.
use std::sync::Arc;

use log::{debug, info};

use super::{Blink, EdgeDetector, FaultLatch, IndicatorReport, Pin, Role, Task, TaskReport};
use crate::{
    coord::{CancelToken, Coordination, STATUS_MARK, StatusCell},
    rt::ContextId,
};

pub struct Producer {
    coord: Arc<Coordination>,
    token: CancelToken,
    output: Blink,
    input: Pin,
    status: Option<StatusCell>,
}

impl Producer {
    pub fn new(coord: Arc<Coordination>, token: CancelToken, output: Blink, input: Pin) -> Self {
        Self {
            coord,
            token,
            output,
            input,
            status: None,
        }
    }

    /// Publishes the status marker into `cell` on every counter update.
    pub fn with_status(mut self, cell: StatusCell) -> Self {
        self.status = Some(cell);
        self
    }
}

impl Task for Producer {
    fn role(&self) -> Role {
        Role::Producer
    }

    fn run(&mut self) -> TaskReport {
        self.coord.record_identity(Role::Producer, ContextId::current());
        let mut report = IndicatorReport::default();
        let mut button = EdgeDetector::default();
        let mut status_latch = FaultLatch::default();

        while !self.token.is_cancelled() {
            if !self.output.on(&self.token) {
                break;
            }
            if let Some(low) = self.input.is_low() {
                if button.update(low) {
                    report.presses += 1;
                    info!("{} pressed", self.input.label());
                }
            }
            if !self.output.off(&self.token) {
                break;
            }

            let status = self.status.as_ref();
            let (value, posted, published) = self.coord.with_lock(|cs| {
                let value = cs.increment();
                let posted = cs.post_due_signals();
                let published = status.map(|cell| cell.publish(cs, STATUS_MARK));
                (value, posted, published)
            });
            if let Some(result) = published {
                status_latch.check("status cell", result);
            }

            report.iterations += 1;
            report.increments += 1;
            if posted > 0 {
                report.signals += posted;
                debug!("counter at {value}, consumer signalled");
            }
        }

        // Multiples the consumer reached after our last update are still owed.
        report.signals += self.coord.with_lock(|cs| cs.post_due_signals());
        self.coord.close_signal();
        self.output.release();
        info!(
            "{} exiting after {} iterations ({} signals)",
            Role::Producer,
            report.iterations,
            report.signals
        );
        TaskReport::Producer(report)
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use super::*;
    use crate::{
        config::BlinkConfig,
        soc::{
            device::{Device, Endianness, RamMemory},
            register::{BoundField, FieldWidth, RegisterField},
        },
    };

    #[test]
    fn producer_counts_and_signals_until_cancelled() {
        let gpio: Arc<dyn Device> = Arc::new(RamMemory::new("gpio1", 0x60, Endianness::Little));
        let mem: Arc<dyn Device> = Arc::new(RamMemory::new("fpga_mem", 0x20, Endianness::Little));
        // Button released (active low).
        gpio.write_u32(0x50, 0xFFFF_FFFF).unwrap();
        let led = RegisterField::new("led1", 0, 0x0200_0000, FieldWidth::U32);
        let key = RegisterField::new("key3", 0x50, 0x0200_0000, FieldWidth::U32);

        let coord = Arc::new(Coordination::new(5));
        let token = CancelToken::new();
        coord.register_peer(Role::Producer, token.clone());
        let mut producer = Producer::new(
            coord.clone(),
            token,
            Blink::new(
                Pin::new(BoundField::new("gpio1.led1", gpio.clone(), led)),
                BlinkConfig { on_ms: 1, off_ms: 1 },
            ),
            Pin::new(BoundField::new("gpio1.key3", gpio.clone(), key)),
        )
        .with_status(StatusCell::new(mem.clone(), 0));

        let handle = thread::spawn(move || producer.run());
        while coord.observed() < 12 {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(coord.cancel_peers(), 1);
        let TaskReport::Producer(report) = handle.join().unwrap() else {
            panic!("producer must report as producer");
        };

        assert_eq!(report.increments, coord.counter(), "only the producer incremented");
        assert_eq!(report.signals, report.increments / 5);
        assert_eq!(coord.signals_posted(), report.signals);
        assert_eq!(coord.await_signal(), Ok(()));
        assert_eq!(report.presses, 0, "released button never counts as a press");
        assert_eq!(mem.read_u32(0).unwrap(), STATUS_MARK);
        assert_eq!(gpio.read_u32(0).unwrap() & 0x0200_0000, 0, "indicator left off on exit");
    }

    #[test]
    fn producer_settles_multiples_reached_by_the_consumer_on_exit() {
        let gpio: Arc<dyn Device> = Arc::new(RamMemory::new("gpio1", 0x60, Endianness::Little));
        let led = RegisterField::new("led1", 0, 0x0200_0000, FieldWidth::U32);
        let key = RegisterField::new("key3", 0x50, 0x0200_0000, FieldWidth::U32);

        let coord = Arc::new(Coordination::new(5));
        // Consumer-side increments take the counter to 5 without posting.
        for _ in 0..5 {
            coord.with_lock(|cs| cs.increment());
        }
        let token = CancelToken::new();
        token.cancel();
        let mut producer = Producer::new(
            coord.clone(),
            token,
            Blink::new(
                Pin::new(BoundField::new("gpio1.led1", gpio.clone(), led)),
                BlinkConfig { on_ms: 1, off_ms: 1 },
            ),
            Pin::new(BoundField::new("gpio1.key3", gpio, key)),
        );

        let TaskReport::Producer(report) = producer.run() else {
            panic!("producer must report as producer");
        };
        assert_eq!(report.iterations, 0);
        assert_eq!(report.signals, 1);
        assert_eq!(coord.await_signal(), Ok(()));
        assert!(coord.await_signal().is_err(), "channel closed once the producer stopped");
    }
}
