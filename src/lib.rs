//! Real-time coordination of three execution contexts over memory-mapped
//! board registers: an indicator producer, a signal-paced consumer and a
//! timing-critical mapping context that measures its own computation.
pub mod config;
pub mod coord;
pub mod rt;
pub mod session;
pub mod soc;
pub mod task;
