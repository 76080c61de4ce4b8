pub mod auth;
pub mod error;
pub mod gateway;
pub mod keys;
pub mod middleware;
pub mod routes;
pub mod status;
