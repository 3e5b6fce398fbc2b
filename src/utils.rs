use candle_core::{DType, Device, Tensor};
use itertools::Itertools;

use crate::error::{shape_bail, Result};

/// One-hot node identities, used as input features for graphs without any.
pub fn identity(n: usize, dtype: DType, device: &Device) -> Result<Tensor> {
    let idx = Tensor::arange(0u32, n as u32, device)?;
    Ok(idx
        .unsqueeze(1)?
        .broadcast_eq(&idx.unsqueeze(0)?)?
        .to_dtype(dtype)?)
}

/// Converts an `edge_index` of shape `(2, num_edges)` into the `(row, colptr)`
/// pair consumed by [`crate::nn::RgcnConv::forward`].
///
/// Edges are stably sorted by target node (`edge_index[1]`), and `edge_attr`
/// (typically the edge types) is permuted alongside them. The number of target
/// nodes is `size.1` if given, otherwise `max(edge_index[1]) + 1`.
pub fn to_csc(
    edge_index: &Tensor,
    size: Option<(usize, usize)>,
    edge_attr: Option<&Tensor>,
) -> Result<((Tensor, Tensor), Option<Tensor>)> {
    let (two, num_edges) = edge_index.dims2()?;
    if two != 2 {
        shape_bail!(
            "edge_index must have shape (2, num_edges), got {:?}",
            edge_index.dims()
        );
    }
    if let Some(edge_attr) = edge_attr {
        if edge_attr.dims().first() != Some(&num_edges) {
            shape_bail!(
                "edge_attr has {:?} rows but there are {} edges",
                edge_attr.dims().first(),
                num_edges
            );
        }
    }
    let device = edge_index.device();
    let values = index_values("edge_index", edge_index)?;
    let (row, col) = values.split_at(num_edges);
    if let Some((num_sources, _)) = size {
        if let Some(&r) = row.iter().find(|&&r| r as usize >= num_sources) {
            shape_bail!("source node {} out of range for {} sources", r, num_sources);
        }
    }

    let num_targets = match size {
        Some((_, num_targets)) => num_targets,
        None => col.iter().max().map_or(0, |&c| c as usize + 1),
    };
    if let Some(&c) = col.iter().find(|&&c| c as usize >= num_targets) {
        shape_bail!("target node {} out of range for {} targets", c, num_targets);
    }

    let mut counts = vec![0u32; num_targets];
    for &c in col {
        counts[c as usize] += 1;
    }
    let colptr: Vec<u32> = std::iter::once(0)
        .chain(counts.iter().scan(0u32, |acc, &n| {
            *acc += n;
            Some(*acc)
        }))
        .collect();
    let colptr = Tensor::from_vec(colptr, num_targets + 1, device)?;

    if num_edges == 0 {
        let row = Tensor::from_vec(Vec::<u32>::new(), 0, device)?;
        return Ok(((row, colptr), edge_attr.cloned()));
    }
    // sorted_by_key is stable, so parallel edges keep their relative order
    let perm: Vec<u32> = (0..num_edges as u32)
        .sorted_by_key(|&e| col[e as usize])
        .collect();
    let row: Vec<u32> = perm.iter().map(|&e| row[e as usize]).collect();
    let row = Tensor::from_vec(row, num_edges, device)?;
    let perm = Tensor::from_vec(perm, num_edges, device)?;
    let edge_attr = edge_attr
        .map(|attr| attr.index_select(&perm, 0))
        .transpose()?;
    Ok(((row, colptr), edge_attr))
}

/// Reads an integer index tensor of any rank into host-side `u32`s, in
/// row-major order. Negative or float indices are rejected.
pub(crate) fn index_values(name: &str, t: &Tensor) -> Result<Vec<u32>> {
    let t = t.flatten_all()?;
    match t.dtype() {
        DType::U8 | DType::U32 => Ok(t.to_dtype(DType::U32)?.to_vec1::<u32>()?),
        DType::I64 => {
            let values = t.to_vec1::<i64>()?;
            let mut out = Vec::with_capacity(values.len());
            for v in values {
                match u32::try_from(v) {
                    Ok(v) => out.push(v),
                    Err(_) => shape_bail!("{} holds index {} outside the u32 range", name, v),
                }
            }
            Ok(out)
        }
        dtype => shape_bail!("{} must hold integer indices, got {:?}", name, dtype),
    }
}

#[cfg(test)]
mod tests {
    use candle_core::IndexOp;

    use super::*;

    #[test]
    fn identity_is_one_hot() -> Result<()> {
        let eye = identity(3, DType::F32, &Device::Cpu)?;
        assert_eq!(
            eye.to_vec2::<f32>()?,
            vec![
                vec![1.0, 0.0, 0.0],
                vec![0.0, 1.0, 0.0],
                vec![0.0, 0.0, 1.0]
            ]
        );
        Ok(())
    }

    #[test]
    fn to_csc_groups_edges_by_target() -> Result<()> {
        let device = Device::Cpu;
        // edges: 0->2, 1->0, 2->2, 0->1
        let edge_index = Tensor::new(&[[0u32, 1, 2, 0], [2, 0, 2, 1]], &device)?;
        let edge_type = Tensor::new(&[3u32, 1, 4, 2], &device)?;
        let ((row, colptr), edge_type) = to_csc(&edge_index, None, Some(&edge_type))?;
        assert_eq!(row.to_vec1::<u32>()?, vec![1, 0, 0, 2]);
        assert_eq!(colptr.to_vec1::<u32>()?, vec![0, 1, 2, 4]);
        assert_eq!(edge_type.unwrap().to_vec1::<u32>()?, vec![1, 2, 3, 4]);
        Ok(())
    }

    #[test]
    fn to_csc_respects_explicit_size() -> Result<()> {
        let device = Device::Cpu;
        let edge_index = Tensor::new(&[[0u32, 1], [0, 0]], &device)?;
        let ((row, colptr), attr) = to_csc(&edge_index, Some((2, 3)), None)?;
        assert_eq!(row.to_vec1::<u32>()?, vec![0, 1]);
        assert_eq!(colptr.to_vec1::<u32>()?, vec![0, 2, 2, 2]);
        assert!(attr.is_none());

        let err = to_csc(&edge_index.i((.., ..1))?, Some((2, 0)), None).unwrap_err();
        assert!(matches!(err, crate::Error::Shape(_)));
        Ok(())
    }

    #[test]
    fn to_csc_rejects_float_indices() -> Result<()> {
        let edge_index = Tensor::new(&[[0f32, 1.0], [0.9, 1.9]], &Device::Cpu)?;
        for size in [None, Some((2, 2))] {
            let err = to_csc(&edge_index, size, None).unwrap_err();
            assert!(matches!(err, crate::Error::Shape(_)));
        }
        Ok(())
    }

    #[test]
    fn to_csc_rejects_negative_indices() -> Result<()> {
        let edge_index = Tensor::new(&[[0i64, 1], [0, -1]], &Device::Cpu)?;
        for size in [None, Some((2, 2))] {
            let err = to_csc(&edge_index, size, None).unwrap_err();
            assert!(matches!(err, crate::Error::Shape(ref msg) if msg.contains("-1")));
        }
        Ok(())
    }

    #[test]
    fn to_csc_checks_sources_against_size() -> Result<()> {
        let edge_index = Tensor::new(&[[0u32, 3], [0, 1]], &Device::Cpu)?;
        let err = to_csc(&edge_index, Some((3, 2)), None).unwrap_err();
        assert!(matches!(err, crate::Error::Shape(ref msg) if msg.contains("source node 3")));
        assert!(to_csc(&edge_index, Some((4, 2)), None).is_ok());
        Ok(())
    }

    #[test]
    fn index_values_accepts_i64() -> Result<()> {
        let t = Tensor::new(&[[2i64, 0], [1, 5]], &Device::Cpu)?;
        assert_eq!(index_values("t", &t)?, vec![2, 0, 1, 5]);
        Ok(())
    }

    #[test]
    fn to_csc_rejects_bad_edge_index() -> Result<()> {
        let edge_index = Tensor::zeros((3, 2), DType::U32, &Device::Cpu)?;
        assert!(matches!(
            to_csc(&edge_index, None, None),
            Err(crate::Error::Shape(_))
        ));
        Ok(())
    }
}
