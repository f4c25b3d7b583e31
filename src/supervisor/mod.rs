//! Supervision of device work that may hang.
//!
//! Capture jobs, probes and power-off requests run in isolated workers so a
//! stuck device call can be abandoned without blocking the caller.
//!
//! ```text
//!  JobRetrySupervisor::execute ──launch──▶ Worker (thread | process)
//!            │   wait(deadline)                 │
//!            │◀────────── Finished ─────────────┘
//!            └── StillRunning ─▶ terminate ─▶ settle ─▶ next attempt
//! ```

pub mod probe;
pub mod retry;
pub mod worker;

pub use probe::{power_off_device, probe_device, ConnectivitySupervisor, POWER_OFF_SETTLE};
pub use retry::{ExecutionReport, JobRetrySupervisor, JobStatus};
pub use worker::{
    ProcessWorker, ThreadWorker, WaitOutcome, Worker, WorkerProgram, WorkerReply, WorkerSpawner,
    WorkerTask,
};
