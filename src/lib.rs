pub mod app;
pub mod auth;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod maintenance;
pub mod messages;
pub mod oauth;
pub mod state;
pub mod users;
