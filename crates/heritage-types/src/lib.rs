pub mod legacy;
pub mod models;
