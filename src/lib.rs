pub mod error;
pub mod gateway;

pub use error::{DirectoryReport, StorageError, StorageResult};
pub use gateway::Gateway;

// Debug-only printing helper: expands to eprintln! in tests and debug builds.
// Usage: tprintln!("debug: {}", value);
#[cfg(any(test, debug_assertions))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ( eprintln!($($arg)*) );
}

// Release builds keep the format checks but emit nothing.
#[cfg(not(any(test, debug_assertions)))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ({
        if false { let _ = format!($($arg)*); }
    });
}
