// Antigravity OpenAI Proxy - OpenAI-compatible front for the Cloud Code backend

pub mod api;
pub mod auth;
pub mod config;
