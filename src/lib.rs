pub mod api;
pub mod command;
pub mod config;
pub mod database;
pub mod dispatcher;
pub mod error;
pub mod locks;
pub mod provisioner;
pub mod runner;
pub mod tenant;

pub use dispatcher::{Dispatcher, DispatcherConfig, MigrationOutcome, MigrationRequest};
pub use error::DispatchError;
