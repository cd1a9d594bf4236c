//! Background worker: the polling job scheduler.

pub mod scheduler;

pub use scheduler::JobScheduler;
