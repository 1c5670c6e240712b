//! Marker lines of the script output protocol.
//!
//! Wrapped scripts print these on standard output. They are part of the
//! stable wire convention between the wrapper template and the parser.

/// Prefix of a line naming an entity the script created.
pub const ENTITY_CREATED: &str = "ENTITY_CREATED:";

/// Prefix of a line describing an error.
pub const ERROR: &str = "ERROR:";

/// Prefix of a line describing a non-fatal warning.
pub const WARNING: &str = "WARNING:";

/// Line printed once the script and its commit step completed.
pub const EXECUTION_SUCCESS: &str = "EXECUTION_SUCCESS";

/// Stderr noise emitted by CAD hosts on startup that is never an error.
pub const DEFAULT_BENIGN_STDERR: &[&str] = &[
    "QStandardPaths:",
    "XDG_RUNTIME_DIR",
    "Qt: Session management error",
    "qt.qpa.",
    "libGL error",
    "libEGL warning",
    "MESA-LOADER",
    "DeprecationWarning",
];
