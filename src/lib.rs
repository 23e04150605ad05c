pub mod auth;
pub mod booking;
pub mod config;
pub mod detector;
pub mod limits;
pub mod model;
pub mod observability;
pub mod sequence;
pub mod store;
