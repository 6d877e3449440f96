pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod indexer;
pub mod llm;
pub mod models;
pub mod rag;
pub mod routes;
pub mod session;
