pub mod context;
pub mod decider;
pub mod executor;
pub mod geo;
pub mod reminders;
pub mod scheduler;
pub mod time_window;

pub use context::{EngineContext, SyncTrigger};
pub use decider::{DayStatus, DaySummary, Decision};
pub use executor::{PunchExecutor, PunchOutcome};
pub use scheduler::{AutoPunchScheduler, TickOutcome, every, every_after};
