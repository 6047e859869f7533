//! Deferred deallocation for sources dropped on the audio thread
//!
//! A loaded track can be hundreds of megabytes of decoded audio. When the
//! engine replaces or unloads a source it drops an [`Owned`] handle, which
//! only enqueues the pointer; the memory is actually freed on the
//! `riff-gc` thread where a slow `munmap` cannot cause an underrun.
//!
//! ```ignore
//! use basedrop::Owned;
//! use riff_core::engine::gc_handle;
//!
//! let handle = gc_handle().ok_or(...)?;
//! let source = Owned::new(&handle, Box::new(track) as Box<dyn Decoder>);
//! ```
//!
//! [`Owned`]: basedrop::Owned

use basedrop::{Collector, Handle};
use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

/// How often the collector thread reclaims queued drops
const COLLECT_INTERVAL: Duration = Duration::from_millis(100);

static GC_HANDLE: OnceLock<Option<Handle>> = OnceLock::new();

fn init_gc() -> Option<Handle> {
    let (tx, rx) = mpsc::channel();

    let spawned = thread::Builder::new()
        .name("riff-gc".to_string())
        .spawn(move || {
            // Collector is !Sync, so it lives and dies on this thread
            let mut collector = Collector::new();
            if tx.send(collector.handle()).is_err() {
                return;
            }
            log::info!("Audio GC thread started");

            loop {
                collector.collect();
                thread::sleep(COLLECT_INTERVAL);
            }
        });

    if let Err(e) = spawned {
        log::error!("Failed to spawn audio GC thread: {}", e);
        return None;
    }

    rx.recv().ok()
}

/// Handle for creating deferred-drop allocations
///
/// The collector thread is started on first use. `None` only if that
/// thread could not be spawned.
pub fn gc_handle() -> Option<Handle> {
    GC_HANDLE.get_or_init(init_gc).clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use basedrop::Owned;

    #[test]
    fn test_handle_is_shared() {
        let first = gc_handle();
        let second = gc_handle();
        assert!(first.is_some());
        assert!(second.is_some());
    }

    #[test]
    fn test_owned_drop_is_deferred_safely() {
        let handle = gc_handle().unwrap();
        let owned = Owned::new(&handle, vec![0.0f32; 1 << 16]);
        assert_eq!(owned.len(), 1 << 16);
        drop(owned);
    }
}
