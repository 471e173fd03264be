pub mod broadcast;
pub mod config;
pub mod constants;
pub mod dates;
pub mod details;
pub mod facebook;
pub mod fetchers;
pub mod insights;
pub mod manifest;
pub mod models;
pub mod output;
pub mod pusher;
pub mod rate_limit;
pub mod webhook;
pub mod whatsapp;
