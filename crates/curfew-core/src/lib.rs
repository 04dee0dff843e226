pub mod blocker;
pub mod clock;
pub mod config;
pub mod critical_section;
pub mod daemon;
pub mod domain;
pub mod engine;
pub mod format;
pub mod host;
pub mod ipc;
pub mod limits;
pub mod monitor;
pub mod notifications;
pub mod policy;
pub mod reset;
pub mod router;
pub mod session_manager;
pub mod store;

pub use blocker::{BlockDecision, BlockDecisionEngine, BlockReason};
pub use clock::{Clock, ManualClock, SystemClock};
pub use daemon::Daemon;
pub use engine::Engine;
pub use host::{BrowserHost, CommandQueue, HostCommand, HostError, TabId};
pub use notifications::{NotificationEngine, Notifier};
pub use router::{ActiveTabContext, BrowserEvent, EventRouter, TabInfo};
pub use session_manager::{SessionManager, UsageSnapshot};
pub use store::{MemoryStore, UsageStore};
