//! Library crate for ctf-realtime, exposing modules for binaries and integration tests.

pub mod config;
pub mod dao;
pub mod dto;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod routes;
pub mod scoring;
pub mod services;
pub mod state;
