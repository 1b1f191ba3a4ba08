use std::time::{Duration, Instant};

use log::{info, warn};

use super::{EdgeDetector, Pin};
use crate::coord::CancelToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Settled,
    Pressed,
    TimedOut,
    /// The button could not be read; the gate opened without waiting.
    Unavailable,
    Cancelled,
}

impl GateOutcome {
    pub fn proceeds(self) -> bool {
        self != GateOutcome::Cancelled
    }
}

/// Bounded wait performed once before the first measured iteration.
#[derive(Debug)]
pub enum StartGate {
    Settle(Duration),
    Button {
        pin: Pin,
        timeout: Duration,
        poll: Duration,
    },
}

impl StartGate {
    pub fn wait(&mut self, token: &CancelToken) -> GateOutcome {
        match self {
            StartGate::Settle(delay) => {
                if token.sleep(*delay) {
                    GateOutcome::Settled
                } else {
                    GateOutcome::Cancelled
                }
            }
            StartGate::Button { pin, timeout, poll } => {
                info!("waiting up to {timeout:?} for {} to be pressed", pin.label());
                let deadline = Instant::now() + *timeout;
                let mut edge = EdgeDetector::default();
                loop {
                    match pin.is_low() {
                        None => {
                            warn!("start button {} unreadable; starting now", pin.label());
                            return GateOutcome::Unavailable;
                        }
                        Some(low) if edge.update(low) => return GateOutcome::Pressed,
                        Some(_) => {}
                    }
                    let now = Instant::now();
                    if now >= deadline {
                        info!("start button not pressed; starting after timeout");
                        return GateOutcome::TimedOut;
                    }
                    if !token.sleep((*poll).min(deadline - now)) {
                        return GateOutcome::Cancelled;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::soc::{
        device::{Device, Endianness, RamMemory},
        register::{BoundField, FieldWidth, RegisterField},
    };

    fn button(window: &Arc<dyn Device>) -> Pin {
        let field = RegisterField::new("key0", 0x50, 0x0010_0000, FieldWidth::U32);
        Pin::new(BoundField::new("gpio2.key0", window.clone(), field))
    }

    #[test]
    fn asserted_button_opens_the_gate() {
        let window: Arc<dyn Device> = Arc::new(RamMemory::new("gpio2", 0x60, Endianness::Little));
        // Active low: all-zero register reads as pressed.
        let mut gate = StartGate::Button {
            pin: button(&window),
            timeout: Duration::from_secs(5),
            poll: Duration::from_millis(1),
        };
        assert_eq!(gate.wait(&CancelToken::new()), GateOutcome::Pressed);
    }

    #[test]
    fn released_button_times_out() {
        let window: Arc<dyn Device> = Arc::new(RamMemory::new("gpio2", 0x60, Endianness::Little));
        window.write_u32(0x50, 0xFFFF_FFFF).unwrap();
        let mut gate = StartGate::Button {
            pin: button(&window),
            timeout: Duration::from_millis(20),
            poll: Duration::from_millis(5),
        };
        let outcome = gate.wait(&CancelToken::new());
        assert_eq!(outcome, GateOutcome::TimedOut);
        assert!(outcome.proceeds());
    }

    #[test]
    fn cancelled_settle_does_not_proceed() {
        let token = CancelToken::new();
        token.cancel();
        let outcome = StartGate::Settle(Duration::from_secs(10)).wait(&token);
        assert_eq!(outcome, GateOutcome::Cancelled);
        assert!(!outcome.proceeds());
    }
}
