pub mod auth;
pub mod config;
pub mod db;
pub mod email;
pub mod error;
pub mod improvement;
pub mod jobs;
pub mod models;
pub mod notifications;
pub mod permissions;
pub mod render;
pub mod routes;
pub mod schema;
pub mod state;
pub mod storage;
pub mod validation;
pub mod workers;
pub mod workflow;

pub use workers::{default_handlers, Worker};
