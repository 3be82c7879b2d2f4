pub use executor::{
    BoundedExecutor, ExecutorSettings, ExecutorStats, InlineExecutor, Work, WorkExecutor,
};
pub use profile::*;
pub use scheduler::{ScheduledTask, Scheduler};
pub use work_manager::WorkManager;

mod executor;
mod profile;
mod scheduler;
mod work_manager;
