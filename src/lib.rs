pub mod alias;
pub mod api;
pub mod config;
pub mod memory_repo;
mod orm;
pub mod url_repo;
pub mod url_service;
pub mod visit_worker;
