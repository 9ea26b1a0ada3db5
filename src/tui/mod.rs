//! TUI module for terminal user interfaces

mod run_view;

pub use run_view::RunApp;
