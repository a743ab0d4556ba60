//! Bundled domain mods: threaded messaging and shared documents.
//!
//! Each mod implements [`crate::mod_pipeline::Mod`] and owns its own
//! state behind an internal lock; the [`crate::network::Network`] facade
//! registers them with the [`crate::mod_pipeline::ModPipeline`] at startup
//! in the order declared by [`crate::config::NetworkConfig::mods`].

pub mod shared_document;
pub mod thread_messaging;

pub use shared_document::SharedDocumentMod;
pub use thread_messaging::ThreadMessagingMod;
