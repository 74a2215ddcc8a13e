pub mod config;
pub mod events;
pub mod models;
pub mod runs;
pub mod spec;
