pub mod cache;
pub mod cli;
pub mod config;
pub mod model;
pub mod probe;
pub mod resolver;
pub mod scheme;
pub mod store;

mod api;
mod flock;

pub use api::{Pijulfetch, PijulfetchBuilder};
