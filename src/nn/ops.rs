//! Fused heterogeneous-graph aggregation kernels.
//!
//! Kernels are looked up by name at forward time rather than at layer
//! construction, so a layer can be built (and its parameters loaded) on a
//! machine that lacks the backend it was configured with.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use candle_core::Tensor;
use tracing::debug;

use super::typed_graph::TypedGraph;
use crate::error::{Error, Result};

#[cfg(feature = "native-ops")]
mod native;
#[cfg(feature = "native-ops")]
pub use native::NativeAggregator;

/// Name under which the built-in candle kernel is registered.
pub const NATIVE: &str = "native";

pub trait HgAggregator: Send + Sync {
    /// Node-to-node aggregation over a relation-typed graph, with the basis
    /// combination applied after aggregation.
    ///
    /// For every destination node `i` the output row is the concatenation of
    /// `in`-wide blocks:
    /// - one block per relation `r`: the sum of `x[j]` over edges `j -> i` of
    ///   type `r` (or, with `comp` of shape `(R, B)`, one block per basis `b`:
    ///   `sum_r comp[r, b] * agg_r`),
    /// - `x[i]` as the last block when `concat_own` is set.
    ///
    /// With `norm_by_out_degree` every relation block is divided by the number
    /// of edges it summed over.
    fn agg_hg_basis_n2n_post(
        &self,
        x: &Tensor,
        comp: Option<&Tensor>,
        graph: &TypedGraph,
        concat_own: bool,
        norm_by_out_degree: bool,
    ) -> Result<Tensor>;
}

type Registry = RwLock<HashMap<String, Arc<dyn HgAggregator>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        #[allow(unused_mut)]
        let mut kernels: HashMap<String, Arc<dyn HgAggregator>> = HashMap::new();
        #[cfg(feature = "native-ops")]
        kernels.insert(NATIVE.to_owned(), Arc::new(NativeAggregator));
        RwLock::new(kernels)
    })
}

/// Registers (or replaces) the kernel served under `name`.
pub fn register_kernel(name: &str, kernel: Arc<dyn HgAggregator>) {
    debug!(name, "registering aggregation kernel");
    registry()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(name.to_owned(), kernel);
}

pub fn resolve_kernel(name: &str) -> Result<Arc<dyn HgAggregator>> {
    let kernel = registry()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
        .cloned();
    match kernel {
        Some(kernel) => {
            debug!(name, "resolved aggregation kernel");
            Ok(kernel)
        }
        None => Err(Error::MissingKernel(name.to_owned())),
    }
}
