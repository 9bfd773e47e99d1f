//! tierform-health: target health for the entry point's target group.
//!
//! A target receives traffic only while it is `Healthy`. New targets start
//! `Unknown` and become healthy after `healthy_threshold` consecutive
//! successful probes; a target becomes unhealthy after
//! `unhealthy_threshold` consecutive failures.
//!
//! # Architecture
//!
//! ```text
//! TargetHealthMonitor
//!   ├── Per-target background task
//!   │   ├── http_probe() → ProbeResult
//!   │   ├── TargetGroup::record (HealthTracker per target)
//!   │   └── TargetRecord in StateStore on status change
//!   └── watch channel per task for shutdown
//! ```

pub mod checker;
pub mod error;
pub mod monitor;
pub mod target;

pub use checker::{HealthTracker, ProbeResult, http_probe};
pub use error::{HealthError, HealthResult};
pub use monitor::{TargetHealthMonitor, sync_registrations};
pub use target::{Target, TargetGroup, TargetView};
