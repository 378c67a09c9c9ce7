//! Process-wide network runtime.
//!
//! The runtime is initialized on first use and lives for the rest of the
//! process. On Windows the standard library performs WSA startup the first
//! time a socket is created, so the runtime here only pins down the
//! initialization point and hosts the error-code helpers; the accessor is
//! still touched before every `socket()` call so initialization ordering is
//! explicit.

use once_cell::sync::Lazy;
use std::io;

static RUNTIME: Lazy<NetRuntime> = Lazy::new(NetRuntime::initialize);

/// Access the process-wide runtime, initializing it on first call.
///
/// Safe to call from any thread once the first call has returned.
pub fn runtime() -> &'static NetRuntime {
    &RUNTIME
}

/// Platform network state and error-code helpers.
pub struct NetRuntime {
    _private: (),
}

impl NetRuntime {
    fn initialize() -> Self {
        tracing::trace!("network runtime initialized");
        Self { _private: () }
    }

    /// Human-readable description of the most recent OS network error on
    /// this thread.
    #[must_use]
    pub fn last_error(&self) -> String {
        io::Error::last_os_error().to_string()
    }

    /// Raw platform error code of the most recent OS error on this thread.
    #[must_use]
    pub fn last_error_code(&self) -> i32 {
        io::Error::last_os_error().raw_os_error().unwrap_or(0)
    }

    /// Convert a platform error code to a human-readable string.
    /// Thread-safe.
    #[must_use]
    pub fn errno_to_string(&self, code: i32) -> String {
        io::Error::from_raw_os_error(code).to_string()
    }
}
