pub mod api;
pub mod config;
pub mod error;
pub mod geo;
pub mod lifecycle;
pub mod links;
pub mod models;
pub mod normalize;
pub mod observability;
pub mod refresh;
pub mod state;
pub mod store;
