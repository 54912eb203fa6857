// src/services/mod.rs
pub mod conversation;
pub mod model;
