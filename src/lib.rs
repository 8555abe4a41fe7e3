//! Library crate for arcade-relay, exposing modules for binaries and integration tests.

pub mod config;
pub mod controller;
mod dto;
mod error;
pub mod protocol;
pub mod routes;
pub mod scheduler;
pub mod services;
pub mod state;
#[cfg(test)]
mod testing;
