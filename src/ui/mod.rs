//! User interface module - Terminal command loop

mod console;

pub use console::run;
