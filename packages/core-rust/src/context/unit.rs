//! Identification of the current concurrent unit of work.

use std::fmt;

/// Opaque identifier of "whatever is executing right now".
///
/// Inside a tokio task this is the runtime's native task id; outside a task
/// (blocking code, tests on the main thread) it falls back to the OS thread
/// id. The id is only ever used as a lookup key: the runtime may reuse it
/// for unrelated later work once the original task completes, which is why
/// context entries carry a TTL instead of being tied to task lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitId(String);

impl UnitId {
    /// Returns the id of the calling unit of execution.
    #[must_use]
    pub fn current() -> Self {
        match tokio::task::try_id() {
            Some(id) => Self(format!("task:{id}")),
            None => Self(format!("thread:{:?}", std::thread::current().id())),
        }
    }

    /// The id as a string key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
