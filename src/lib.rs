pub mod auth;
pub mod backend;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod shell;
pub mod state;
pub mod views;
