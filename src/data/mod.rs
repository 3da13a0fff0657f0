//! Data layer: core types, decoding, and batch loading.
//!
//! Architecture:
//! ```text
//!   ObjectStore (list / get)
//!        │
//!        ▼
//!   ┌──────────┐
//!   │  batch    │  filter by suffix + required names, fetch sequentially
//!   └──────────┘
//!        │ bytes
//!        ▼
//!   ┌──────────┐     .parquet   ┌───────────┐   ┌───────────┐
//!   │  loader   │ ─────────────▶ │ columnar  │ ─▶│ normalize │
//!   └──────────┘                 └───────────┘   └───────────┘
//!        │  .xlsx / .csv / .txt / .geojson decoded in place
//!        ▼
//!   ┌──────────────┐
//!   │ ModuleDataset │  tables + load timestamps, keyed by base name
//!   └──────────────┘
//! ```
//!
//! Failures never escape this layer: they are collected as [`diagnostics`].

pub mod batch;
pub mod columnar;
pub mod diagnostics;
pub mod loader;
pub mod model;
pub mod normalize;
