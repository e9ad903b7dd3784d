// cartos_core/src/lib.rs

// This file defines the public modules of the library.
pub mod config;
pub mod engine;
pub mod error;
pub mod frames;
pub mod mapping;
pub mod maps;
pub mod messages;
pub mod prelude;
pub mod provider;
pub mod publishing;
pub mod topics;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;
