use candle_core::{DType, Device, Tensor, D};
use candle_nn::{loss, Optimizer, VarBuilder, VarMap};
use tracing_subscriber::EnvFilter;

use candle_rgcn::nn::{Rgcn, RgcnParams, RgcnStackParams};
use candle_rgcn::utils::to_csc;

// RUST_LOG=candle_rgcn=debug cargo run --example rgcn
//
// A toy relational node classification task: every node's label is the type
// of the last edge pointing at it, so only a relation-aware model can fit it.
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let device = Device::cuda_if_available(0)?;

    let num_nodes = 64;
    let num_relations = 3;
    let num_edges = 256;

    let src = Tensor::rand(0f32, num_nodes as f32, num_edges, &device)?.to_dtype(DType::U32)?;
    let dst = Tensor::rand(0f32, num_nodes as f32, num_edges, &device)?.to_dtype(DType::U32)?;
    let edge_type =
        Tensor::rand(0f32, num_relations as f32, num_edges, &device)?.to_dtype(DType::U32)?;
    let edge_index = Tensor::stack(&[&src, &dst], 0)?;
    let ((row, colptr), edge_type) =
        to_csc(&edge_index, Some((num_nodes, num_nodes)), Some(&edge_type))?;
    let edge_type = edge_type.ok_or_else(|| anyhow::anyhow!("to_csc dropped the edge types"))?;

    let colptr_host = colptr.to_vec1::<u32>()?;
    let types_host = edge_type.to_vec1::<u32>()?;
    let labels: Vec<u32> = colptr_host
        .windows(2)
        .map(|w| if w[1] > w[0] { types_host[w[1] as usize - 1] } else { 0 })
        .collect();
    let labels = Tensor::from_vec(labels, num_nodes, &device)?;

    let varmap = VarMap::new();
    let vs = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let params = RgcnStackParams {
        layer: RgcnParams {
            num_bases: Some(2),
            ..RgcnParams::default().with_aggr("sum")?
        },
        dropout_rate: 0.1,
        ..Default::default()
    };
    let model = Rgcn::with_params(&[num_nodes, 32, num_relations], num_relations, params, vs)?;
    println!("{}", model.layers()[0]);

    let mut optimizer = candle_nn::AdamW::new(
        varmap.all_vars(),
        candle_nn::ParamsAdamW {
            lr: 0.01,
            ..Default::default()
        },
    )?;
    for epoch in 0..100 {
        let logits = model.forward_t(None, (&row, &colptr), &edge_type, true)?;
        let loss = loss::cross_entropy(&logits, &labels)?;
        optimizer.backward_step(&loss)?;

        let logits = model.forward_t(None, (&row, &colptr), &edge_type, false)?;
        let accuracy = logits
            .argmax(D::Minus1)?
            .eq(&labels)?
            .to_dtype(DType::F32)?
            .mean_all()?
            .to_scalar::<f32>()?;
        println!(
            "epoch={} train_loss={}; train_acc={}",
            epoch,
            loss.to_scalar::<f32>()?,
            accuracy
        );
    }
    Ok(())
}
