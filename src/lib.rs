pub mod bubble;
pub mod cli;
pub mod config;
pub mod driver;
pub mod forward;
pub mod inputs;
pub mod model;
pub mod payload;
pub mod reconcile;
pub mod report;
pub mod upload;
