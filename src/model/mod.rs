pub mod attrs;
pub mod input;
