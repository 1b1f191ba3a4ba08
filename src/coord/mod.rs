//! State shared by the three contexts: a lock-guarded event counter, a
//! counting signal for producer to consumer pacing, and the peer registry the
//! mapping context uses to stop the others.
pub mod cancel;
pub mod semaphore;

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicU32, Ordering},
};

use log::{debug, info, warn};
use smallvec::SmallVec;

pub use cancel::CancelToken;
pub use semaphore::{Closed, SignalChannel};

use crate::{
    rt::ContextId,
    soc::device::{Device, DeviceResult},
    task::Role,
};

/// Value written to the status cell by the producer on each iteration.
pub const STATUS_MARK: u32 = 0xEEFF;

struct SharedState {
    counter: u32,
    signal_every: u32,
    /// Multiples of `signal_every` already answered with a signal.
    signalled: u32,
}

/// Access to the shared state while the lock is held. Only obtainable through
/// [`Coordination::with_lock`].
pub struct Critical<'a> {
    state: &'a mut SharedState,
    coord: &'a Coordination,
}

impl Critical<'_> {
    pub fn counter(&self) -> u32 {
        self.state.counter
    }

    /// Increments the counter and returns the new value.
    pub fn increment(&mut self) -> u32 {
        self.state.counter = self.state.counter.wrapping_add(1);
        self.state.counter
    }

    /// Posts one signal for every multiple of the pacing interval the counter
    /// has reached since the last call, before the lock is released. Multiples
    /// reached by another context's increments are caught up here. Returns
    /// the number posted.
    pub fn post_due_signals(&mut self) -> u32 {
        let due = self.state.counter / self.state.signal_every;
        let fresh = due.saturating_sub(self.state.signalled);
        for _ in 0..fresh {
            self.coord.signal();
        }
        self.state.signalled = self.state.signalled.max(due);
        fresh
    }
}

struct Peer {
    role: Role,
    token: CancelToken,
    identity: Option<ContextId>,
}

pub struct Coordination {
    state: Mutex<SharedState>,
    /// Counter value as of the last release of the lock.
    observed: AtomicU32,
    posted: AtomicU32,
    signal: SignalChannel,
    peers: Mutex<SmallVec<[Peer; 2]>>,
}

impl Coordination {
    /// `signal_every` must be non-zero; configuration validation enforces it.
    pub fn new(signal_every: u32) -> Self {
        Self {
            state: Mutex::new(SharedState {
                counter: 0,
                signal_every: signal_every.max(1),
                signalled: 0,
            }),
            observed: AtomicU32::new(0),
            posted: AtomicU32::new(0),
            signal: SignalChannel::new(),
            peers: Mutex::new(SmallVec::new()),
        }
    }

    /// Runs `f` with exclusive access to the shared state. The lock is
    /// released on every exit path, including unwinding; a poisoned lock is
    /// recovered since the counter is always left consistent.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut Critical<'_>) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let out = f(&mut Critical {
            state: &mut guard,
            coord: self,
        });
        self.observed.store(guard.counter, Ordering::Release);
        out
    }

    /// Counter read under the lock.
    pub fn counter(&self) -> u32 {
        self.with_lock(|cs| cs.counter())
    }

    /// Lock-free read of the counter as last published. Used by the mapping
    /// context, which must not contend for the lock.
    pub fn observed(&self) -> u32 {
        self.observed.load(Ordering::Acquire)
    }

    pub fn signal(&self) {
        self.posted.fetch_add(1, Ordering::Relaxed);
        self.signal.signal();
    }

    /// Waits for the next signal. Fails once the signalling side has closed
    /// the channel and every posted signal has been served.
    pub fn await_signal(&self) -> Result<(), Closed> {
        self.signal.await_signal()
    }

    /// Called by the signalling context when it stops posting.
    pub fn close_signal(&self) {
        self.signal.close();
    }

    pub fn signals_posted(&self) -> u32 {
        self.posted.load(Ordering::Relaxed)
    }

    pub fn signals_pending(&self) -> u32 {
        self.signal.pending()
    }

    /// Registers a context that the mapping context may later cancel.
    pub fn register_peer(&self, role: Role, token: CancelToken) {
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Peer {
                role,
                token,
                identity: None,
            });
    }

    /// Records the OS identity a context captured on entry.
    pub fn record_identity(&self, role: Role, identity: ContextId) {
        info!("{role} running as {identity}");
        let mut peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(peer) = peers.iter_mut().find(|peer| peer.role == role) {
            peer.identity = Some(identity);
        }
    }

    /// Requests cancellation of every registered peer. Each peer is cancelled
    /// at most once; returns how many were cancelled by this call. A waiting
    /// consumer keeps serving signals until the producer closes the channel.
    pub fn cancel_peers(&self) -> usize {
        let peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner);
        peers
            .iter()
            .filter(|peer| {
                let fresh = peer.token.cancel();
                if fresh {
                    match peer.identity {
                        Some(id) => debug!("cancelling {} ({id})", peer.role),
                        None => warn!("cancelling {} before it reported its identity", peer.role),
                    }
                }
                fresh
            })
            .count()
    }
}

/// Single word in on-chip memory exchanged between producer and consumer.
/// Both accessors demand a [`Critical`], so the cell is only touched under
/// the coordination lock.
pub struct StatusCell {
    window: Arc<dyn Device>,
    offset: usize,
}

impl StatusCell {
    pub fn new(window: Arc<dyn Device>, offset: usize) -> Self {
        Self { window, offset }
    }

    pub fn publish(&self, _cs: &Critical<'_>, value: u32) -> DeviceResult<()> {
        self.window.write_u32(self.offset, value)
    }

    pub fn read(&self, _cs: &Critical<'_>) -> DeviceResult<u32> {
        self.window.read_u32(self.offset)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::soc::device::{Endianness, RamMemory};

    #[test]
    fn concurrent_increments_are_not_lost() {
        let coord = Arc::new(Coordination::new(5));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let coord = coord.clone();
                thread::spawn(move || {
                    for _ in 0..250 {
                        coord.with_lock(|cs| {
                            cs.increment();
                            cs.post_due_signals();
                        });
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(coord.counter(), 1000);
        assert_eq!(coord.observed(), 1000);
        assert_eq!(coord.signals_posted(), 200, "one signal per multiple of five");
        assert_eq!(coord.signals_pending(), 200);
    }

    #[test]
    fn signal_fires_on_multiples_only() {
        let coord = Coordination::new(3);
        let posted: Vec<u32> = (0..7)
            .map(|_| {
                coord.with_lock(|cs| {
                    cs.increment();
                    cs.post_due_signals()
                })
            })
            .collect();
        assert_eq!(posted, [0, 0, 1, 0, 0, 1, 0]);
    }

    #[test]
    fn increments_alone_never_post() {
        let coord = Coordination::new(1);
        for _ in 0..4 {
            coord.with_lock(|cs| cs.increment());
        }
        assert_eq!(coord.signals_posted(), 0);
        assert_eq!(coord.signals_pending(), 0);
    }

    #[test]
    fn multiples_reached_by_other_increments_are_caught_up() {
        let coord = Coordination::new(5);
        // Another context takes the counter across 5 without posting.
        for _ in 0..5 {
            coord.with_lock(|cs| cs.increment());
        }
        let posted = coord.with_lock(|cs| {
            cs.increment();
            cs.post_due_signals()
        });
        assert_eq!(posted, 1);
        assert_eq!(coord.with_lock(|cs| cs.post_due_signals()), 0, "each multiple is answered once");
        assert_eq!(coord.signals_posted(), 1);
    }

    #[test]
    fn lock_is_recovered_after_a_panic_inside() {
        let coord = Arc::new(Coordination::new(5));
        let panicking = coord.clone();
        let _ = thread::spawn(move || {
            panicking.with_lock(|cs| {
                cs.increment();
                if cs.counter() == 1 {
                    panic!("context failed inside the critical section");
                }
            })
        })
        .join();
        assert_eq!(coord.with_lock(|cs| cs.increment()), 2);
    }

    #[test]
    fn peers_are_cancelled_exactly_once() {
        let coord = Coordination::new(5);
        let producer = CancelToken::new();
        let consumer = CancelToken::new();
        coord.register_peer(Role::Producer, producer.clone());
        coord.register_peer(Role::Consumer, consumer.clone());
        coord.record_identity(Role::Producer, ContextId::current());

        assert_eq!(coord.cancel_peers(), 2);
        assert!(producer.is_cancelled() && consumer.is_cancelled());
        assert_eq!(coord.cancel_peers(), 0, "repeat cancellation is a no-op");
    }

    #[test]
    fn closing_the_channel_wakes_a_waiting_consumer() {
        let coord = Arc::new(Coordination::new(5));
        let waiter = {
            let coord = coord.clone();
            thread::spawn(move || coord.await_signal())
        };
        thread::sleep(std::time::Duration::from_millis(10));
        coord.cancel_peers();
        coord.close_signal();
        assert_eq!(waiter.join().unwrap(), Err(Closed));
    }

    #[test]
    fn status_cell_round_trips_under_the_lock() {
        let window: Arc<dyn Device> = Arc::new(RamMemory::new("fpga_mem", 64, Endianness::Little));
        let cell = StatusCell::new(window.clone(), 0);
        let coord = Coordination::new(5);
        coord.with_lock(|cs| cell.publish(cs, STATUS_MARK)).unwrap();
        assert_eq!(coord.with_lock(|cs| cell.read(cs)).unwrap(), STATUS_MARK);
        assert_eq!(window.read_u8(0).unwrap(), 0xFF);
    }
}
