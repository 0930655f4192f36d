//! Transport-agnostic request surface over the coordination core.

mod service;

pub use service::{GroupSpec, MeshApi};
