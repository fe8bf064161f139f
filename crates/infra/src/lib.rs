pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod db;
pub mod discord;
pub mod guild;
pub mod logging;
pub mod repositories;
