pub mod clock;
pub mod commands;
pub mod config;
pub mod cron;
pub mod description;
pub mod error;
pub mod executor;
pub mod instance;
pub mod io;
pub mod lifecycle;
pub mod paths;
pub mod register;
pub mod scheduler;
pub mod step;
pub mod store;

pub use error::{OrchestrationError, Result};
