//! HTTP surface: the WebSocket endpoint and the health probe

pub mod routes;

pub use routes::build_router;
