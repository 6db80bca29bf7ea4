mod state;
mod supervisor;
#[cfg(test)]
mod tests;

pub use state::{PipelineState, SupervisorReport};
pub use supervisor::{PipelineSupervisor, SupervisorSettings};
