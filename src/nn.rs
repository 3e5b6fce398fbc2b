pub mod inits;
pub mod ops;

mod typed_graph;
pub use typed_graph::{GraphKind, TypedGraph};

mod rgcn;
pub use rgcn::{Aggr, Rgcn, RgcnConv, RgcnParams, RgcnStackParams};
