pub mod loader;
pub mod maintenance;
pub mod tasks;
pub mod workflow;

pub use loader::{LoadReport, Loader, LoaderOptions};
pub use maintenance::{CleanUpOutcome, Maintenance, PURGE_INTERVAL_DAYS};
pub use tasks::{
    add_gen_files, complete_external, run_task, CommandOutcome, ExternalCommand, Phase,
    PhasePlan, Task, TaskDefinition, TaskRegistry, DEFAULT_PRIORITY,
};
pub use workflow::{apply_transition, phase_of, Advance, Transition, Workflow};
