use candle_core::{Device, Tensor};
use itertools::Itertools;
use tracing::trace;

use crate::error::{shape_bail, Result};
use crate::utils::index_values;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphKind {
    /// Source and destination nodes are the same set.
    Full,
    /// Message-flow graph: the first `num_dst_nodes` source nodes are the
    /// destination nodes. `max_num_neighbors` is a sizing hint for kernels
    /// that preallocate per-target neighbour buffers; the native kernel does
    /// not need it.
    Bipartite { max_num_neighbors: usize },
}

/// A relation-typed graph in CSC layout, built once per forward call.
#[derive(Debug, Clone)]
pub struct TypedGraph {
    kind: GraphKind,
    num_src_nodes: usize,
    num_dst_nodes: usize,
    num_edge_types: usize,
    row: Tensor,
    colptr: Tensor,
    edge_type: Tensor,
    // (dst * num_edge_types + type) for every edge, in CSC order
    segment: Tensor,
    // number of edges in every (dst, type) segment
    segment_degree: Tensor,
}

impl TypedGraph {
    pub fn new(
        num_src_nodes: usize,
        (row, colptr): (&Tensor, &Tensor),
        edge_type: &Tensor,
        num_edge_types: usize,
        max_num_neighbors: Option<usize>,
    ) -> Result<Self> {
        let device = row.device();
        let row_ = index_vec("row", row)?;
        let colptr_ = index_vec("colptr", colptr)?;
        let edge_type_ = index_vec("edge_type", edge_type)?;

        let num_edges = row_.len();
        let Some(num_dst_nodes) = colptr_.len().checked_sub(1) else {
            shape_bail!("colptr must hold at least one entry");
        };
        if colptr_[0] != 0 {
            shape_bail!("colptr must start at 0, got {}", colptr_[0]);
        }
        if colptr_[num_dst_nodes] as usize != num_edges {
            shape_bail!(
                "colptr ends at {} but row holds {} edges",
                colptr_[num_dst_nodes],
                num_edges
            );
        }
        if edge_type_.len() != num_edges {
            shape_bail!(
                "edge_type holds {} entries but there are {} edges",
                edge_type_.len(),
                num_edges
            );
        }
        let Some(degrees) = colptr_
            .iter()
            .tuple_windows()
            .map(|(&lo, &hi)| hi.checked_sub(lo).map(|d| d as usize))
            .collect::<Option<Vec<usize>>>()
        else {
            shape_bail!("colptr must be non-decreasing");
        };
        if let Some(&r) = row_.iter().find(|&&r| r as usize >= num_src_nodes) {
            shape_bail!("row index {} out of range for {} source nodes", r, num_src_nodes);
        }
        if let Some(&t) = edge_type_.iter().find(|&&t| t as usize >= num_edge_types) {
            shape_bail!("edge type {} out of range for {} relations", t, num_edge_types);
        }

        let kind = if num_src_nodes == num_dst_nodes {
            GraphKind::Full
        } else {
            let max_degree = degrees.iter().copied().max().unwrap_or(0);
            let max_num_neighbors = match max_num_neighbors {
                Some(hint) if hint < max_degree => shape_bail!(
                    "max_num_neighbors={} but a target node has {} neighbors",
                    hint,
                    max_degree
                ),
                Some(hint) => hint,
                None => max_degree,
            };
            GraphKind::Bipartite { max_num_neighbors }
        };

        let mut segment = Vec::with_capacity(num_edges);
        let mut segment_degree = vec![0u32; num_dst_nodes * num_edge_types];
        for (dst, &degree) in degrees.iter().enumerate() {
            let start = colptr_[dst] as usize;
            for &t in &edge_type_[start..start + degree] {
                let s = dst * num_edge_types + t as usize;
                segment.push(s as u32);
                segment_degree[s] += 1;
            }
        }

        trace!(
            num_src_nodes,
            num_dst_nodes,
            num_edges,
            num_edge_types,
            ?kind,
            "built typed graph"
        );
        Ok(Self {
            kind,
            num_src_nodes,
            num_dst_nodes,
            num_edge_types,
            row: Tensor::from_vec(row_, num_edges, device)?,
            colptr: Tensor::from_vec(colptr_, num_dst_nodes + 1, device)?,
            edge_type: Tensor::from_vec(edge_type_, num_edges, device)?,
            segment: Tensor::from_vec(segment, num_edges, device)?,
            segment_degree: Tensor::from_vec(
                segment_degree,
                num_dst_nodes * num_edge_types,
                device,
            )?,
        })
    }

    /// Like [`TypedGraph::new`], with `num_edge_types = max(edge_type) + 1`.
    pub fn with_inferred_types(
        num_src_nodes: usize,
        csc: (&Tensor, &Tensor),
        edge_type: &Tensor,
        max_num_neighbors: Option<usize>,
    ) -> Result<Self> {
        let num_edge_types = index_vec("edge_type", edge_type)?
            .into_iter()
            .max()
            .map_or(0, |t| t as usize + 1);
        Self::new(
            num_src_nodes,
            csc,
            edge_type,
            num_edge_types,
            max_num_neighbors,
        )
    }

    pub fn kind(&self) -> GraphKind {
        self.kind
    }
    pub fn num_src_nodes(&self) -> usize {
        self.num_src_nodes
    }
    pub fn num_dst_nodes(&self) -> usize {
        self.num_dst_nodes
    }
    pub fn num_edges(&self) -> usize {
        self.row.dims1().unwrap_or(0)
    }
    pub fn num_edge_types(&self) -> usize {
        self.num_edge_types
    }
    pub fn row(&self) -> &Tensor {
        &self.row
    }
    pub fn colptr(&self) -> &Tensor {
        &self.colptr
    }
    pub fn edge_type(&self) -> &Tensor {
        &self.edge_type
    }
    pub fn segment(&self) -> &Tensor {
        &self.segment
    }
    pub fn segment_degree(&self) -> &Tensor {
        &self.segment_degree
    }
    pub fn device(&self) -> &Device {
        self.row.device()
    }
}

fn index_vec(name: &str, t: &Tensor) -> Result<Vec<u32>> {
    if t.rank() != 1 {
        shape_bail!("{} must be one-dimensional, got {:?}", name, t.dims());
    }
    index_values(name, t)
}

#[cfg(test)]
mod tests {
    use candle_core::DType;

    use super::*;

    fn csc(device: &Device) -> Result<(Tensor, Tensor, Tensor)> {
        // 3 nodes; node 0 <- {1 (type 1), 2 (type 0)}, node 2 <- {0 (type 1)}
        let row = Tensor::new(&[1u32, 2, 0], device)?;
        let colptr = Tensor::new(&[0u32, 2, 2, 3], device)?;
        let edge_type = Tensor::new(&[1u32, 0, 1], device)?;
        Ok((row, colptr, edge_type))
    }

    #[test]
    fn full_graph_segments() -> Result<()> {
        let device = Device::Cpu;
        let (row, colptr, edge_type) = csc(&device)?;
        let graph = TypedGraph::new(3, (&row, &colptr), &edge_type, 2, Some(1))?;
        assert_eq!(graph.kind(), GraphKind::Full);
        assert_eq!(graph.num_dst_nodes(), 3);
        assert_eq!(graph.num_edges(), 3);
        assert_eq!(graph.segment().to_vec1::<u32>()?, vec![1, 0, 5]);
        assert_eq!(
            graph.segment_degree().to_vec1::<u32>()?,
            vec![1, 1, 0, 0, 0, 1]
        );
        Ok(())
    }

    #[test]
    fn bipartite_graph_infers_max_neighbors() -> Result<()> {
        let device = Device::Cpu;
        let (row, colptr, edge_type) = csc(&device)?;
        let graph = TypedGraph::new(5, (&row, &colptr), &edge_type, 2, None)?;
        assert_eq!(
            graph.kind(),
            GraphKind::Bipartite {
                max_num_neighbors: 2
            }
        );
        let graph = TypedGraph::new(5, (&row, &colptr), &edge_type, 2, Some(8))?;
        assert_eq!(
            graph.kind(),
            GraphKind::Bipartite {
                max_num_neighbors: 8
            }
        );
        assert!(TypedGraph::new(5, (&row, &colptr), &edge_type, 2, Some(1)).is_err());
        Ok(())
    }

    #[test]
    fn infers_edge_types() -> Result<()> {
        let device = Device::Cpu;
        let (row, colptr, edge_type) = csc(&device)?;
        let edge_type = edge_type.to_dtype(DType::I64)?;
        let graph = TypedGraph::with_inferred_types(3, (&row, &colptr), &edge_type, None)?;
        assert_eq!(graph.num_edge_types(), 2);
        Ok(())
    }

    #[test]
    fn reports_negative_indices_unwrapped() -> Result<()> {
        let device = Device::Cpu;
        let (row, colptr, edge_type) = csc(&device)?;
        let negative = Tensor::new(&[1i64, -1, 0], &device)?;

        let err = TypedGraph::new(3, (&negative, &colptr), &edge_type, 2, None).unwrap_err();
        assert!(matches!(err, crate::Error::Shape(ref msg) if msg.contains("row") && msg.contains("-1")));
        let err = TypedGraph::new(3, (&row, &colptr), &negative, 2, None).unwrap_err();
        assert!(matches!(err, crate::Error::Shape(ref msg) if msg.contains("edge_type") && msg.contains("-1")));
        Ok(())
    }

    #[test]
    fn rejects_malformed_csc() -> Result<()> {
        let device = Device::Cpu;
        let (row, colptr, edge_type) = csc(&device)?;

        let short_types = Tensor::new(&[1u32, 0], &device)?;
        let bad_colptr = Tensor::new(&[0u32, 2, 1, 3], &device)?;
        let bad_row = Tensor::new(&[1u32, 2, 7], &device)?;
        let float_row = row.to_dtype(DType::F32)?;
        let cases = [
            TypedGraph::new(3, (&row, &colptr), &short_types, 2, None),
            TypedGraph::new(3, (&row, &bad_colptr), &edge_type, 2, None),
            TypedGraph::new(3, (&bad_row, &colptr), &edge_type, 2, None),
            TypedGraph::new(3, (&float_row, &colptr), &edge_type, 2, None),
            TypedGraph::new(3, (&row, &colptr), &edge_type, 1, None),
        ];
        for case in cases {
            assert!(matches!(case, Err(crate::Error::Shape(_))));
        }
        Ok(())
    }
}
