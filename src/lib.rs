pub mod cache;
pub mod core;
pub mod gc;
pub mod hub;
pub mod launcher;
pub mod persistence;
pub mod shared;
pub mod state;
pub mod taskfile;

pub use cache::{CacheLimits, CacheSnapshot, Clock, ManualClock, MemoryCache, SystemClock};
pub use crate::core::config::HubConfig;
pub use crate::core::logging::{init_logging, LoggingGuards};
pub use gc::{GcConfig, GcOutcome, GcReport, GcScheduler, MemoryProbe, MemorySample};
pub use hub::TaskHub;
pub use launcher::{
    CancelToken, CommandExecutor, DryRunExecutor, ExecutionOutcome, LaunchError, LaunchHandle,
    LaunchPool, LaunchReport, LaunchRequest, ShellExecutor,
};
pub use persistence::{ConfigDocument, ConfigFile};
pub use shared::errors::{ConfigIoError, ValidationError};
pub use state::sync::LegacySelection;
pub use state::types::{GlobalState, RunStatus, RuntimePatch, RuntimeRecord};
pub use state::StateStore;
pub use taskfile::{
    load_task_file, TaskDefinitionReader, TaskDescriptor, TaskfileError, YamlTaskfileReader,
};
