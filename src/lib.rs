//! Maintenance ticket backend: filterable ticket views, board counts, ticket writes and
//! the offline inventory queue, served from a Lambda over DynamoDB and S3.

pub mod auth;
pub mod config;
pub mod counts;
pub mod db_utils;
pub mod filters;
pub mod handlers;
pub mod http;
pub mod models;
pub mod offline;
pub mod query;
pub mod realtime;
pub mod services;
pub mod store;
