pub mod api;
pub mod camera;
pub mod config;
pub mod credential_store;
pub mod http_client;
pub mod mjpeg;
pub mod network_stack;
pub mod services;
pub mod stream_server;

pub use services::connectivity;
