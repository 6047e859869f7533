//! Audio engine - fixed processing graph and its control surface
//!
//! - AudioEngine: audio-thread owner of transport, stretch and EQ stages
//! - EngineAtomics: lock-free parameters written by the control thread
//! - EngineCommand: wait-free queue for ownership transfers and seeks
//! - gc: deferred deallocation of replaced sources

mod atomics;
mod command;
mod engine;
mod gc;

pub use atomics::*;
pub use command::*;
pub use engine::*;
pub use gc::gc_handle;
