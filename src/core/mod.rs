pub mod names;
pub mod op;
pub mod types;
