pub mod activity;
pub mod config;
pub mod conn;
mod dispatcher;
pub mod errors;
pub mod models;
mod protocol;
mod reader;
pub mod strategy;
mod writer;

pub use activity::ActivityTracker;
pub use config::Config;
pub use conn::{dial, Conn};
pub use errors::*;
pub use models::{HostWithResponse, Op, PendingRequest};
