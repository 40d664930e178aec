use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use concerto_state::Tunables;
use concerto_state::queue_db_path;

pub const CONCERTO_HOME_ENV: &str = "CONCERTO_HOME";
const DEFAULT_ROOT: &str = ".concerto";

/// Engine configuration: the root directory layout plus every timing and
/// retry knob the worker honors. Tests shrink the durations; production
/// uses the defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the persisted layout (`runs/`, `workspaces/`, `queue.db`).
    pub root: PathBuf,
    pub lease_timeout: Duration,
    pub poll_interval: Duration,
    pub requeue_sleep: Duration,
    pub heartbeat_interval: Duration,
    /// Operational claim budget per job; the attempt beyond this fails.
    pub max_attempts: i64,
    pub max_plan_retries: u32,
    pub max_implementor_retries: u32,
    pub max_review_retries: u32,
    /// Prefix for work branches, e.g. `concerto/fix-the-parser`.
    pub branch_prefix: String,
    pub default_test_command: Option<String>,
    pub default_test_framework: Option<String>,
}

impl Config {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            lease_timeout: Duration::from_secs(5 * 60),
            poll_interval: Duration::from_secs(1),
            requeue_sleep: Duration::from_millis(200),
            heartbeat_interval: Duration::from_secs(15),
            max_attempts: 3,
            max_plan_retries: 2,
            max_implementor_retries: 3,
            max_review_retries: 3,
            branch_prefix: "concerto".to_string(),
            default_test_command: None,
            default_test_framework: None,
        }
    }

    /// Root resolution for the CLI: explicit flag, then `CONCERTO_HOME`,
    /// then `.concerto` under the current directory.
    pub fn resolve_root(explicit: Option<PathBuf>) -> PathBuf {
        if let Some(root) = explicit {
            return root;
        }
        if let Some(home) = std::env::var_os(CONCERTO_HOME_ENV).filter(|value| !value.is_empty()) {
            return PathBuf::from(home);
        }
        PathBuf::from(DEFAULT_ROOT)
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runs_dir().join(run_id)
    }

    pub fn workspaces_dir(&self) -> PathBuf {
        self.root.join("workspaces")
    }

    pub fn workspace_dir(&self, run_id: &str) -> PathBuf {
        self.workspaces_dir().join(run_id)
    }

    pub fn queue_db(&self) -> PathBuf {
        queue_db_path(self.root.as_path())
    }

    pub fn tunables(&self) -> Tunables {
        Tunables {
            lease_timeout: self.lease_timeout,
        }
    }
}

impl AsRef<Path> for Config {
    fn as_ref(&self) -> &Path {
        self.root.as_path()
    }
}
