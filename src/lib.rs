pub mod app;
pub mod config;
pub mod registration;
pub mod state;
pub mod token;
