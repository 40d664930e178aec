// Integration suite for the queue-and-dispatch engine: real worker,
// real SQLite-backed store, scripted executors and workspace.
mod cancellation;
mod crash_recovery;
mod failures;
mod happy_path;
mod parallel_runs;
mod review_flow;
