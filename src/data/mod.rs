/// Data layer: the container tree and its on-disk store.
///
/// Architecture:
/// ```text
///   Container
///   ├── attrs          instrument metadata
///   ├── Group ...      insertion-ordered children
///   │    ├── Dataset   axis (1-D) or channel (n-D, one axis ref per dim)
///   │    └── Group ... nested; axis refs resolve upward
///   └── provenance     append-only ProvenanceRecord list
///        │
///        ▼
///   ┌─────────┐
///   │  store   │  Container ⇄ .parquet (one row per node)
///   └─────────┘
/// ```

pub mod container;
pub mod group;
pub mod model;
pub mod store;
