use candle_core::{Tensor, D};

use super::HgAggregator;
use crate::error::{shape_bail, Result};
use crate::nn::typed_graph::TypedGraph;

/// Scatter/gather implementation on plain candle ops; runs on every candle
/// device and is differentiable end to end.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeAggregator;

impl HgAggregator for NativeAggregator {
    fn agg_hg_basis_n2n_post(
        &self,
        x: &Tensor,
        comp: Option<&Tensor>,
        graph: &TypedGraph,
        concat_own: bool,
        norm_by_out_degree: bool,
    ) -> Result<Tensor> {
        let (num_nodes, in_channels) = x.dims2()?;
        if num_nodes != graph.num_src_nodes() {
            shape_bail!(
                "x has {} rows but the graph has {} source nodes",
                num_nodes,
                graph.num_src_nodes()
            );
        }
        let num_dst = graph.num_dst_nodes();
        let num_relations = graph.num_edge_types();

        // one (dst, relation) segment per row
        let mut agg = Tensor::zeros((num_dst * num_relations, in_channels), x.dtype(), x.device())?;
        if graph.num_edges() > 0 {
            let messages = x.index_select(graph.row(), 0)?;
            agg = agg.index_add(graph.segment(), &messages, 0)?;
        }
        if norm_by_out_degree {
            let degree = graph
                .segment_degree()
                .to_dtype(x.dtype())?
                .maximum(1.0)?
                .unsqueeze(D::Minus1)?;
            agg = agg.broadcast_div(&degree)?;
        }

        let blocks = match comp {
            None => agg.reshape((num_dst, num_relations * in_channels))?,
            Some(comp) => {
                let (comp_relations, num_bases) = comp.dims2()?;
                if comp_relations != num_relations {
                    shape_bail!(
                        "comp has {} rows but the graph has {} relations",
                        comp_relations,
                        num_relations
                    );
                }
                // (dst * in, R) x (R, B) -> (dst, B * in)
                agg.reshape((num_dst, num_relations, in_channels))?
                    .transpose(1, 2)?
                    .contiguous()?
                    .reshape((num_dst * in_channels, num_relations))?
                    .matmul(comp)?
                    .reshape((num_dst, in_channels, num_bases))?
                    .transpose(1, 2)?
                    .contiguous()?
                    .reshape((num_dst, num_bases * in_channels))?
            }
        };

        if !concat_own {
            return Ok(blocks);
        }
        if num_dst > num_nodes {
            shape_bail!(
                "cannot concatenate own features of {} targets from {} source nodes",
                num_dst,
                num_nodes
            );
        }
        Ok(Tensor::cat(&[&blocks, &x.narrow(0, 0, num_dst)?], 1)?)
    }
}
