use std::fmt;
use std::sync::{Arc, Mutex};

type Callback = Arc<dyn Fn() + Send + Sync>;

/// A timeout observer shared between a request/response handle and its connection.
///
/// Registering a callback claims the connection's idle timeout: when the timer fires, the
/// connection runs the callback instead of destroying the socket.
#[derive(Clone, Default)]
pub(crate) struct TimeoutHook {
    callback: Arc<Mutex<Option<Callback>>>,
}

impl TimeoutHook {
    pub(crate) fn set<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        if let Ok(mut guard) = self.callback.lock() {
            *guard = Some(Arc::new(f));
        }
    }

    /// Runs the registered callback, returns false when nothing is registered.
    ///
    /// The lock is released before the callback runs, so it may register a new one.
    pub(crate) fn fire(&self) -> bool {
        let callback = match self.callback.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        };

        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for TimeoutHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registered = self.callback.lock().map(|guard| guard.is_some()).unwrap_or(false);
        f.debug_struct("TimeoutHook").field("registered", &registered).finish()
    }
}
