pub mod batch;
pub mod debounce;
pub mod loader;
pub mod mutation;
pub mod scheduler;

pub use batch::BatchQueue;
pub use debounce::ToggleDebouncer;
pub use loader::{LessonLoader, LoadOutcome, LoadTarget};
pub use mutation::{MutationEngine, ToggleOutcome, ToggleState, UpdatePublisher};
pub use scheduler::SweepScheduler;
