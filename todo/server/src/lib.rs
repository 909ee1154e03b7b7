pub mod auth;
pub mod config;
pub mod entities;
pub mod task;
pub mod user;
pub mod validation;
pub mod web;
