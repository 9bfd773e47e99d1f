//! tierform-graph: the provisioning dependency graph.
//!
//! Builds a DAG from resource descriptors. Edges come from explicit
//! `depends_on` entries and from `${resource.attribute}` references inside
//! property values. The graph is validated up front: duplicate names,
//! unknown targets, self references and cycles are structural errors raised
//! before anything is provisioned.
//!
//! # Architecture
//!
//! ```text
//! Vec<ResourceSpec>
//!   └── DependencyGraph::build (validate, infer edges, detect cycles)
//!         ├── create_order / create_waves / delete_order
//!         ├── blocked_by (transitive dependents of a failed node)
//!         └── Schedule (incremental ready-set for concurrent dispatch)
//! ```

pub mod error;
pub mod graph;
pub mod schedule;

pub use error::{GraphError, GraphResult};
pub use graph::{DependencyGraph, Edge, EdgeOrigin};
pub use schedule::Schedule;
