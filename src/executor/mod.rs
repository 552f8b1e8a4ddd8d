mod commit;
mod executor;
mod session;
mod state_machine;

pub use commit::Commit;
pub use session::Session;
pub use session::Sessions;
pub use state_machine::HandlerError;
pub use state_machine::StateMachine;
pub use state_machine::StateMachineExecutor;

pub(crate) use executor::Applied;
pub(crate) use executor::Completion;
pub(crate) use executor::DeliveryTarget;
pub(crate) use executor::Executor;
pub(crate) use executor::ExecutorError;
pub(crate) use session::EventBatch;
