//! Hardware audio output over cpal
//!
//! The control thread keeps the engine behind an `Arc<Mutex<_>>` and hands
//! a clone to [`start_audio_output`]. While the stream runs, only the device
//! callback touches the engine; parameters reach it through
//! [`EngineAtomics`](crate::engine::EngineAtomics) and the command queue.
//!
//! ```ignore
//! let handle = start_audio_output(&AudioConfig::default(), Arc::clone(&engine))?;
//! println!("{}Hz, {:.1}ms", handle.sample_rate(), handle.latency_ms());
//! drop(handle); // stops the stream, engine.stopped() runs
//! ```

mod config;
mod cpal_backend;
mod device;
mod error;

pub use config::{
    AudioConfig, BufferSize, DeviceId, DEFAULT_BUFFER_SIZE, DEFAULT_SAMPLE_RATE,
    MAX_BUFFER_FRAMES, MIN_BUFFER_FRAMES,
};
pub use cpal_backend::{start_audio_output, AudioHandle};
pub use device::{default_device, find_device, output_devices, OutputDevice};
pub use error::{AudioError, AudioResult};
