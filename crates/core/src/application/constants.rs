// Invoker constants (ADR: No magic values)
use std::time::Duration;

/// Upper bound for a single version probe (30s)
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default budget for a tool run (None = unbounded)
pub const DEFAULT_RUN_TIMEOUT: Option<Duration> = None;

/// Working directory used for version probes
pub const PROBE_WORKING_DIR: &str = ".";
