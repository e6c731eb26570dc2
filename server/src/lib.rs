pub mod auth;
pub mod config;
pub mod engine;
pub mod web;

#[cfg(test)]
mod integration_tests;
