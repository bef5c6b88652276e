//! System-wide constants, default timings, and environment variable names.

use std::time::Duration;

/// Overrides the base directory under which environment directories are created.
pub const TMP_DIR_ENV: &str = "RIGGING_TMP_DIR";

/// When set to `1` or `true`, environment directories survive `close`.
pub const KEEP_DIR_ENV: &str = "RIGGING_KEEP_DIR";

/// When set to `1` or `true`, workload output is logged at `info` level.
pub const VERBOSE_ENV: &str = "RIGGING_VERBOSE";

/// Overrides the host address used to build docker external endpoints.
pub const DOCKER_HOST_ADDRESS_ENV: &str = "RIGGING_DOCKER_HOST";

/// Host address used for docker published ports.
pub const DEFAULT_DOCKER_HOST_ADDRESS: &str = "127.0.0.1";

/// Sentinel returned by `endpoint` for a declared port of a stopped runnable.
pub const STOPPED_ENDPOINT: &str = "stopped";

/// Label attached to every docker network and container owned by an environment.
pub const SCOPE_LABEL: &str = "rigging.scope";

/// Mount point of the environment's shared directory inside kind pods.
pub const KIND_SHARED_MOUNT: &str = "/shared";

/// Path of the environment's shared directory on the kind node.
pub const KIND_NODE_SHARED_PATH: &str = "/rigging-shared";

/// Subdirectory of the environment directory holding workload logs.
pub const LOGS_DIR: &str = "logs";

/// Longest allowed scope or runnable name (a DNS label).
pub const MAX_NAME_LENGTH: usize = 63;

/// Minimum delay of the default readiness backoff.
pub const READY_BACKOFF_MIN: Duration = Duration::from_millis(300);
/// Maximum delay of the default readiness backoff.
pub const READY_BACKOFF_MAX: Duration = Duration::from_millis(600);
/// Attempt ceiling of the default readiness backoff.
pub const READY_BACKOFF_RETRIES: u32 = 100;

/// Minimum delay of the default metric wait backoff.
pub const METRICS_BACKOFF_MIN: Duration = Duration::from_millis(300);
/// Maximum delay of the default metric wait backoff.
pub const METRICS_BACKOFF_MAX: Duration = Duration::from_millis(600);
/// Attempt ceiling of the default metric wait backoff.
pub const METRICS_BACKOFF_RETRIES: u32 = 50;

/// Timeout of a single HTTP or TCP readiness probe attempt.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Timeout of a single metrics scrape.
pub const SCRAPE_TIMEOUT: Duration = Duration::from_secs(5);

/// Grace period given to a workload on `stop`.
pub const STOP_GRACE: Duration = Duration::from_secs(30);

/// Application name used as a prefix for directories and default scopes.
pub const APP_NAME: &str = "rigging";
