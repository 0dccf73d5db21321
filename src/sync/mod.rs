pub mod monitor;
pub mod reconciler;
pub mod remote;

pub use monitor::ConnectivityMonitor;
pub use reconciler::{InflightGuard, PullSummary, PushSummary, Reconciler};
pub use remote::{HttpRemoteClient, PunchSubmission, RemoteAttendanceClient, RemoteRecord};
