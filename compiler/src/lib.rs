// stencilopt — stencil optimizer
//
// Library root. Race repair, stage graph construction and greedy stage
// reordering over the stencil IIR, plus the pipeline that sequences them.

pub mod access_graph;
pub mod conflict;
pub mod diag;
pub mod dot;
pub mod error;
pub mod extent;
pub mod field_versioning;
pub mod id;
pub mod iir;
pub mod logging;
pub mod metadata;
pub mod pass;
pub mod pipeline;
pub mod rename;
pub mod reorder;
pub mod stage_graph;
