//! Control → audio command queue
//!
//! Continuous parameters (tempo, pitch, loop points, EQ) live in
//! [`EngineAtomics`](super::EngineAtomics). Only operations that hand over
//! ownership or must happen at a block boundary go through this queue: the
//! control thread pushes, the audio thread drains at the start of every
//! block. Both ends are wait-free.

use crate::transport::SourceHandle;

/// Commands processed by the audio thread before each block
pub enum EngineCommand {
    /// Replace the current source (the old one is dropped on the GC thread)
    LoadSource(SourceHandle),
    /// Remove the current source and stop
    UnloadSource,
    /// Move the playhead (seconds, clamped to the source)
    Seek(f64),
    /// Return the playhead to 0
    Stop,
}

impl std::fmt::Debug for EngineCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LoadSource(_) => f.write_str("LoadSource"),
            Self::UnloadSource => f.write_str("UnloadSource"),
            Self::Seek(seconds) => f.debug_tuple("Seek").field(seconds).finish(),
            Self::Stop => f.write_str("Stop"),
        }
    }
}

/// Capacity of the command queue
pub const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Control-thread end of the command queue
pub struct CommandSender {
    producer: rtrb::Producer<EngineCommand>,
}

impl CommandSender {
    /// Queue a command (non-blocking)
    ///
    /// Returns the command back if the queue is full.
    pub fn send(&mut self, cmd: EngineCommand) -> Result<(), EngineCommand> {
        self.producer.push(cmd).map_err(|e| match e {
            rtrb::PushError::Full(value) => value,
        })
    }

    /// Whether another command fits right now
    pub fn has_space(&self) -> bool {
        self.producer.slots() > 0
    }
}

/// Create the command queue
///
/// The sender stays with the control thread; the consumer is handed to
/// [`AudioEngine::new`](super::AudioEngine::new).
pub fn command_channel() -> (CommandSender, rtrb::Consumer<EngineCommand>) {
    let (producer, consumer) = rtrb::RingBuffer::new(COMMAND_QUEUE_CAPACITY);
    (CommandSender { producer }, consumer)
}
