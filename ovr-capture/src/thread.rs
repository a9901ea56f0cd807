//! Background threads with cooperative, join-based shutdown.

use std::io;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use log::{debug, error};

/// Shared quit flag. Waiting on it doubles as an interruptible sleep.
#[derive(Clone, Default)]
pub struct QuitSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl QuitSignal {
    pub fn set(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn is_set(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps for `dur` or until the signal is set. Returns `true` if the signal is set.
    pub fn wait_timeout(&self, dur: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = cvar
            .wait_timeout_while(guard, dur, |quit| !*quit)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

pub struct Task {
    name: String,
    quit: QuitSignal,
    handle: Option<JoinHandle<()>>,
}

impl Task {
    pub fn spawn<F>(name: &str, f: F) -> io::Result<Self>
    where
        F: FnOnce(QuitSignal) + Send + 'static,
    {
        let quit = QuitSignal::default();
        let thread_quit = quit.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || f(thread_quit))?;
        debug!("[capture] Started thread '{}'", name);

        Ok(Self {
            name: name.to_string(),
            quit,
            handle: Some(handle),
        })
    }

    pub fn quit_signal(&self) -> &QuitSignal {
        &self.quit
    }

    /// Sets the quit signal and joins the thread. Safe to call more than once.
    pub fn quit_and_wait(&mut self) {
        self.quit.set();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            match handle.join() {
                Ok(()) => debug!("[capture] Thread '{}' finished", self.name),
                Err(e) => error!("[capture] Error while joining thread '{}': {:?}", self.name, e),
            }
        }
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        self.quit_and_wait();
    }
}
