#[macro_use]
extern crate derive_builder;

pub mod config;
pub mod document;
pub mod handler;
pub mod service;
pub mod store;
pub mod wire;
