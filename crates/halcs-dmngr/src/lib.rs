//! Device-manager supervisor: endpoint discovery, the child registry, and
//! the reap/respawn supervision loop.

pub mod config;
pub mod discovery;
pub mod error;
pub mod registry;
pub mod spawn;
pub mod supervisor;

pub use config::DmngrConfig;
pub use error::{DmngrError, DmngrResult};
pub use registry::{ChildEntry, Registry};
pub use spawn::{ProcessSpawner, SpawnHook};
pub use supervisor::{ReapSource, Supervisor, WaitpidReaper};
