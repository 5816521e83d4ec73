pub mod bato;
pub mod buffers;
pub mod error;
pub mod library;
pub mod loader;
pub mod provider;
pub mod window;

#[cfg(test)]
pub(crate) mod mock;
