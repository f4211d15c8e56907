pub mod app;
pub mod config;
pub mod io;
pub mod repository;
pub mod state;
