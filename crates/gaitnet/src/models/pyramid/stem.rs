//! # Input Stem
//!
//! Silhouette input stem: a single 3x3 stride-1 conv/norm/relu,
//! followed by an optional 3x3 stride-2 max pool. Unlike the 7x7
//! stride-2 ImageNet stem, the full input resolution reaches the first
//! convolution; gait silhouettes are small.

use crate::layers::blocks::conv_norm::{ConvNorm2d, ConvNorm2dConfig, ConvNorm2dMeta};
use crate::models::pyramid::util::stride_div_output_resolution;
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::nn::conv::Conv2dConfig;
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{PaddingConfig2d, Relu};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`PyramidStem`] Meta trait.
pub trait PyramidStemMeta {
    /// The number of input channels.
    fn in_channels(&self) -> usize;

    /// The number of output channels.
    fn out_channels(&self) -> usize;

    /// Whether the stem ends in a stride-2 max pool.
    fn pooled(&self) -> bool;

    /// The effective stride of the stem; 2 when pooled, else 1.
    fn stride(&self) -> usize {
        if self.pooled() { 2 } else { 1 }
    }

    /// Get the output resolution for a given input resolution.
    ///
    /// # Panics
    ///
    /// If the input resolution is not a multiple of the stride.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        stride_div_output_resolution(input_resolution, self.stride())
    }
}

/// [`PyramidStem`] Config.
///
/// Implements [`PyramidStemMeta`].
#[derive(Config, Debug)]
pub struct PyramidStemConfig {
    /// The number of input channels.
    pub in_channels: usize,

    /// The number of output channels.
    pub out_channels: usize,

    /// Whether to end the stem in a stride-2 max pool.
    #[config(default = true)]
    pub maxpool: bool,
}

impl PyramidStemMeta for PyramidStemConfig {
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn out_channels(&self) -> usize {
        self.out_channels
    }

    fn pooled(&self) -> bool {
        self.maxpool
    }
}

impl PyramidStemConfig {
    /// Initialize a [`PyramidStem`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> PyramidStem<B> {
        let cn: ConvNorm2dConfig = Conv2dConfig::new([self.in_channels, self.out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .into();

        let pool = self.maxpool.then(|| {
            MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init()
        });

        PyramidStem {
            cn: cn.init(device),
            act: Relu::new(),
            pool,
        }
    }
}

/// Input stem.
///
/// Implements [`PyramidStemMeta`].
#[derive(Module, Debug)]
pub struct PyramidStem<B: Backend> {
    /// The 3x3 Conv/Norm pair.
    pub cn: ConvNorm2d<B>,

    /// Stem activation.
    pub act: Relu,

    /// Optional stride-2 max pool.
    pub pool: Option<MaxPool2d>,
}

impl<B: Backend> PyramidStemMeta for PyramidStem<B> {
    fn in_channels(&self) -> usize {
        self.cn.in_channels()
    }

    fn out_channels(&self) -> usize {
        self.cn.out_channels()
    }

    fn pooled(&self) -> bool {
        self.pool.is_some()
    }
}

impl<B: Backend> PyramidStem<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_channels, out_height, out_width]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        static INPUT_CONTRACT: ShapeContract = shape_contract![
            "batch",
            "in_channels",
            "in_height" = "out_height" * "stride",
            "in_width" = "out_width" * "stride"
        ];
        let [batch, out_height, out_width] = INPUT_CONTRACT.unpack_shape(
            &input,
            &["batch", "out_height", "out_width"],
            &[
                ("in_channels", self.in_channels()),
                ("stride", self.stride()),
            ],
        );

        let x = self.cn.forward(input);
        let x = self.act.forward(x);
        let x = match &self.pool {
            Some(pool) => pool.forward(x),
            None => x,
        };

        static OUTPUT_CONTRACT: ShapeContract =
            shape_contract!["batch", "out_channels", "out_height", "out_width"];
        run_every_nth!(OUTPUT_CONTRACT.assert_shape(
            &x,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        ));

        x
    }
}
