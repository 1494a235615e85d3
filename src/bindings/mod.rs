//! Host front-ends. Each submodule adapts the core's `PixelSink`/
//! `KeyProvider` seams to one concrete host environment; the core itself
//! knows nothing about any of them.

#[cfg(target_arch = "wasm32")]
pub mod wasm;
