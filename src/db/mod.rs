pub mod models;
pub mod stores;

pub mod memory;
pub mod postgres;
