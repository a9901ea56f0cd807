use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use crate::async_stream::AsyncStream;
use crate::context::Capture;

static NEXT_THREAD_ID: AtomicU32 = AtomicU32::new(1);

/// Stream of this thread for one context. Dropping it (thread exit) retires the stream; the
/// server drops it after sending what is left.
struct StreamHandle {
    context_id: u64,
    stream: Arc<AsyncStream>,
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.stream.retire();
    }
}

thread_local! {
    static THREAD_ID: Cell<u32> = const { Cell::new(0) };
    static STREAMS: RefCell<Vec<StreamHandle>> = const { RefCell::new(Vec::new()) };
    /// Set by `thread_name`, takes precedence over the OS thread name
    static THREAD_NAME: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Small sequential ID of the calling thread, stable for the thread's lifetime.
pub fn current_thread_id() -> u32 {
    THREAD_ID.with(|id| {
        if id.get() == 0 {
            id.set(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed));
        }
        id.get()
    })
}

fn new_stream(capture: &Capture) -> Arc<AsyncStream> {
    let thread_name = THREAD_NAME
        .try_with(|name| name.borrow().clone())
        .ok()
        .flatten()
        .or_else(|| thread::current().name().map(str::to_string));
    let stream = Arc::new(AsyncStream::new(
        current_thread_id(),
        thread_name,
        capture.config.stream,
        capture.connection.clone(),
    ));
    capture.streams.register(stream.clone());
    stream
}

/// Names the calling thread. Renames its existing stream for `capture`; streams created later
/// start with this name. Never creates a stream.
pub fn set_thread_name(capture: &Capture, name: &str) {
    let _ = THREAD_NAME.try_with(|pending| *pending.borrow_mut() = Some(name.to_string()));
    let _ = STREAMS.try_with(|streams| {
        if let Some(handle) = streams.borrow().iter().find(|h| h.context_id == capture.id) {
            handle.stream.set_thread_name(name);
        }
    });
}

/// Returns the calling thread's stream for `capture`, creating it on first use.
///
/// `None` while the thread is being torn down and its thread-locals are gone.
pub fn acquire(capture: &Capture) -> Option<Arc<AsyncStream>> {
    STREAMS
        .try_with(|streams| {
            let mut streams = streams.borrow_mut();
            if let Some(handle) = streams.iter().find(|h| h.context_id == capture.id) {
                return handle.stream.clone();
            }
            // contexts that were shut down hold no other reference to their streams
            streams.retain(|h| Arc::strong_count(&h.stream) > 1);

            let stream = new_stream(capture);
            streams.push(StreamHandle {
                context_id: capture.id,
                stream: stream.clone(),
            });
            stream
        })
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_ids_are_distinct_and_stable() {
        let main = current_thread_id();
        assert_eq!(main, current_thread_id());
        let other = thread::spawn(current_thread_id).join().unwrap();
        assert_ne!(main, other);
    }
}
