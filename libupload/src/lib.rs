pub mod channel;
pub mod config;
pub mod error;
pub mod gc;
pub mod listener;
pub mod lock;
pub mod monitor;
pub mod state;
pub mod store;
pub mod topology;
pub mod url;

// re-export selected public API
pub use channel::{AgentChannel, CommandListener};
pub use config::{MonitorConfig, load_config};
pub use error::UploadMonitorError;
pub use monitor::UploadMonitor;
pub use store::{MemorySessionStore, SessionStore};
