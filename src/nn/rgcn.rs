use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use candle_core::{Tensor, D};
use candle_nn::{Activation, Dropout, Init, Module, VarBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::inits::{glorot, glorot_init, glorot_narrow, zeros};
use super::ops::{resolve_kernel, HgAggregator, NATIVE};
use super::typed_graph::TypedGraph;
use crate::error::{Error, Result};
use crate::utils::identity;

/// Neighbourhood reduction; `"add"` is accepted as an alias of `"sum"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggr {
    #[serde(alias = "add")]
    Sum,
    Mean,
}
impl FromStr for Aggr {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sum" | "add" => Ok(Aggr::Sum),
            "mean" => Ok(Aggr::Mean),
            _ => Err(Error::InvalidAggregation(s.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RgcnParams {
    pub num_bases: Option<usize>,
    pub aggr: Aggr,
    pub root_weight: bool,
    pub bias: bool,
    /// Name of the aggregation kernel, resolved on the first forward call.
    pub kernel: String,
}
impl Default for RgcnParams {
    fn default() -> Self {
        Self {
            num_bases: None,
            aggr: Aggr::Mean,
            root_weight: true,
            bias: true,
            kernel: NATIVE.to_owned(),
        }
    }
}
impl RgcnParams {
    pub fn with_aggr(self, aggr: &str) -> Result<Self> {
        Ok(Self {
            aggr: aggr.parse()?,
            ..self
        })
    }
}

enum Projection {
    /// One weight slice per relation.
    Direct,
    /// `num_bases` shared slices mixed per relation by `comp`.
    Basis { comp: Tensor },
}

/// https://arxiv.org/abs/1703.06103
/// - Relation-Based Transformation, optionally basis-decomposed
/// - Root is transformed by the last weight slice
pub struct RgcnConv {
    in_channels: usize,
    out_channels: usize,
    num_relations: usize,
    aggr: Aggr,
    root_weight: bool,
    weight: Tensor,
    projection: Projection,
    bias: Option<Tensor>,
    kernel_name: String,
    kernel: OnceLock<Arc<dyn HgAggregator>>,
}
impl RgcnConv {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        num_relations: usize,
        params: RgcnParams,
        vs: VarBuilder,
    ) -> Result<Self> {
        let dim_root_weight = usize::from(params.root_weight);
        let num_blocks = params.num_bases.unwrap_or(num_relations) + dim_root_weight;

        let weight = vs.get_with_hints(
            (num_blocks, in_channels, out_channels),
            "weight",
            glorot_init(in_channels, out_channels),
        )?;
        let projection = match params.num_bases {
            Some(num_bases) => Projection::Basis {
                comp: vs.get_with_hints(
                    (num_relations, num_bases),
                    "comp",
                    glorot_init(num_relations, num_bases),
                )?,
            },
            None => Projection::Direct,
        };
        let bias = if params.bias {
            Some(vs.get_with_hints(out_channels, "bias", Init::Const(0.0))?)
        } else {
            None
        };
        debug!(
            in_channels,
            out_channels,
            num_relations,
            num_bases = ?params.num_bases,
            aggr = ?params.aggr,
            root_weight = params.root_weight,
            bias = params.bias,
            kernel = %params.kernel,
            "created RgcnConv"
        );
        Ok(Self {
            in_channels,
            out_channels,
            num_relations,
            aggr: params.aggr,
            root_weight: params.root_weight,
            weight,
            projection,
            bias,
            kernel_name: params.kernel,
            kernel: OnceLock::new(),
        })
    }

    /// Re-draws every parameter in place: Glorot for the relation (or basis)
    /// slices, the root slice and `comp`; zeros for the bias.
    pub fn reset_parameters(&self) -> Result<()> {
        let num_blocks = self.weight.dim(0)?;
        let end = if self.root_weight {
            num_blocks - 1
        } else {
            num_blocks
        };
        glorot_narrow(&self.weight, 0, end)?;
        if let Some(comp) = self.comp() {
            glorot(comp)?;
        }
        if self.root_weight {
            glorot_narrow(&self.weight, end, 1)?;
        }
        if let Some(bias) = &self.bias {
            zeros(bias)?;
        }
        Ok(())
    }

    /// `csc` is the `(row, colptr)` pair of [`crate::utils::to_csc`] and
    /// `edge_type` is aligned with `row`. Without `x`, nodes are one-hot
    /// encoded, so the graph must have `in_channels` source nodes.
    ///
    /// `max_num_neighbors` only matters for bipartite graphs; when omitted it
    /// is computed from `colptr`.
    pub fn forward(
        &self,
        x: Option<&Tensor>,
        csc: (&Tensor, &Tensor),
        edge_type: &Tensor,
        max_num_neighbors: Option<usize>,
    ) -> Result<Tensor> {
        let x = match x {
            Some(x) => x.clone(),
            None => identity(self.in_channels, self.weight.dtype(), edge_type.device())?,
        };
        let graph = TypedGraph::new(
            x.dim(0)?,
            csc,
            edge_type,
            self.num_relations,
            max_num_neighbors,
        )?;
        let out = self.kernel()?.agg_hg_basis_n2n_post(
            &x,
            self.comp(),
            &graph,
            self.root_weight,
            self.aggr == Aggr::Mean,
        )?;
        let out = out.matmul(&self.weight.reshape(((), self.out_channels))?)?;
        match &self.bias {
            Some(bias) => Ok(out.broadcast_add(bias)?),
            None => Ok(out),
        }
    }

    fn kernel(&self) -> Result<&Arc<dyn HgAggregator>> {
        if let Some(kernel) = self.kernel.get() {
            return Ok(kernel);
        }
        let kernel = resolve_kernel(&self.kernel_name)?;
        Ok(self.kernel.get_or_init(|| kernel))
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }
    pub fn out_channels(&self) -> usize {
        self.out_channels
    }
    pub fn num_relations(&self) -> usize {
        self.num_relations
    }
    pub fn num_bases(&self) -> Option<usize> {
        self.comp().and_then(|comp| comp.dim(D::Minus1).ok())
    }
    pub fn aggr(&self) -> Aggr {
        self.aggr
    }
    pub fn root_weight(&self) -> bool {
        self.root_weight
    }
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }
    pub fn comp(&self) -> Option<&Tensor> {
        match &self.projection {
            Projection::Direct => None,
            Projection::Basis { comp } => Some(comp),
        }
    }
    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }
}
impl fmt::Display for RgcnConv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RgcnConv({}, {}, num_relations={})",
            self.in_channels, self.out_channels, self.num_relations
        )
    }
}

pub struct RgcnStackParams {
    pub layer: RgcnParams,
    pub dropout_rate: f32,
    pub activation_fn: Activation,
}
impl Default for RgcnStackParams {
    fn default() -> Self {
        Self {
            layer: RgcnParams::default(),
            dropout_rate: 0.0,
            activation_fn: Activation::Relu,
        }
    }
}

pub struct Rgcn {
    layers: Vec<RgcnConv>,
    dropout: Dropout,
    activation_fn: Activation,
}
impl Rgcn {
    pub fn new(sizes: &[usize], num_relations: usize, vs: VarBuilder) -> Result<Self> {
        Self::with_params(sizes, num_relations, RgcnStackParams::default(), vs)
    }
    pub fn with_params(
        sizes: &[usize],
        num_relations: usize,
        params: RgcnStackParams,
        vs: VarBuilder,
    ) -> Result<Self> {
        let mut layers = Vec::new();
        for i in 1..sizes.len() {
            let name = format!("layer_{}", i);
            layers.push(RgcnConv::new(
                sizes[i - 1],
                sizes[i],
                num_relations,
                params.layer.clone(),
                vs.pp(name),
            )?);
        }
        Ok(Self {
            layers,
            dropout: Dropout::new(params.dropout_rate),
            activation_fn: params.activation_fn,
        })
    }
    pub fn layers(&self) -> &[RgcnConv] {
        &self.layers
    }
    pub fn forward_t(
        &self,
        x: Option<&Tensor>,
        csc: (&Tensor, &Tensor),
        edge_type: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let Some((first, rest)) = self.layers.split_first() else {
            return match x {
                Some(x) => Ok(x.clone()),
                None => Err(Error::Shape("an empty Rgcn needs input features".to_owned())),
            };
        };
        let mut h = first.forward(x, csc, edge_type, None)?;
        for layer in rest {
            h = self.dropout.forward(&h, train)?;
            h = self.activation_fn.forward(&h)?;
            h = layer.forward(Some(&h), csc, edge_type, None)?;
        }
        Ok(h)
    }
}
