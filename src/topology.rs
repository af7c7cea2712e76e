//! Data-driven description of the network: a list of convolution blocks
//! followed by a list of dense layers.

use serde::Serialize;

use crate::config::{Config, Padding};

pub const BLOCK_COUNT: usize = 3;
pub const CONVS_PER_BLOCK: usize = 3;
pub const POOL_SIZE: (usize, usize) = (2, 2);

/// Convolutions sharing a filter count and kernel, closed by a max pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConvBlockSpec {
    pub filters: usize,
    pub kernel_size: (usize, usize),
    pub convolutions: usize,
    pub padding: Padding,
    pub pool_size: (usize, usize),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DenseSpec {
    pub units: usize,
    pub dropout: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Topology {
    pub blocks: Vec<ConvBlockSpec>,
    pub hidden: Vec<DenseSpec>,
    pub classes: usize,
}

impl Topology {
    /// Block `i` uses `base_filters * 2^i` filters and a kernel of
    /// `base_kernel * 2^i` in both dimensions.
    pub fn geometric(
        base_filters: usize,
        base_kernel: (usize, usize),
        depth: usize,
        padding: Padding,
        hidden: Vec<DenseSpec>,
        classes: usize,
    ) -> Self {
        let blocks = (0..depth)
            .map(|i| {
                let scale = 1 << i;
                ConvBlockSpec {
                    filters: base_filters * scale,
                    kernel_size: (base_kernel.0 * scale, base_kernel.1 * scale),
                    convolutions: CONVS_PER_BLOCK,
                    padding,
                    pool_size: POOL_SIZE,
                }
            })
            .collect();

        Topology { blocks, hidden, classes }
    }

    /// The three-block network with two dropout-regularised dense layers
    pub fn from_config(config: &Config, dropout: f32) -> Self {
        let hidden = vec![
            DenseSpec {
                units: config.dense_units,
                dropout,
            };
            2
        ];
        Self::geometric(
            config.nb_filters,
            config.kernel_size,
            BLOCK_COUNT,
            config.padding,
            hidden,
            config.nb_classes,
        )
    }
}
