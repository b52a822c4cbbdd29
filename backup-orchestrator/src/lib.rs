pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod platform;
pub mod services;
pub mod state;

#[cfg(test)]
mod testing;
