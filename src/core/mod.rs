//! Core module - Lifecycle engine, registry, history, and configuration

mod app_state;
mod controllers;
pub mod entry;
pub mod error;
mod guard;
pub mod history;
mod monitor;
pub mod operation;
mod process;
pub mod registry;
mod runner;
mod sequencer;
pub mod settings;
mod undo;

#[cfg(test)]
pub mod testing;

pub use app_state::{AppState, Update};
pub use operation::OperationKind;
pub use settings::Settings;
