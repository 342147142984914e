pub mod broker;
pub mod buffers;
pub mod config;
pub mod decoder;
pub mod embedded;
pub mod pipeline;
pub mod repository;
pub mod telemetry;
