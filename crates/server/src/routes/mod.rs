//! HTTP route handlers

pub mod chat;
pub mod misc;
pub mod models;
pub mod speech;
pub mod stt;
