//! TUI module for the live validation dashboard

mod dashboard;

pub use dashboard::Dashboard;
