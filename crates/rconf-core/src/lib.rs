//! Core model for rconf: the in-memory remote/section map and the pluggable
//! formats that transcode it. Nothing here touches disk or key material.

pub mod provider;
pub mod remote;

pub use provider::{Provider, ProviderDefinition, ProviderError, ProviderRegistry};
pub use remote::{RemoteConfig, Section};
