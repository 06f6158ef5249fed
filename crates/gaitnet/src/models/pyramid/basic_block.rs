//! # Basic Residual Block
//!
//! [`BasicBlock`] is the two-convolution residual unit: two 3x3
//! conv/norm pairs with a relu between, an identity (or 1x1 downsample)
//! shortcut, and a relu on the sum.
//!
//! [`BasicBlockMeta`] defines a common meta API for [`BasicBlock`]
//! and [`BasicBlockConfig`].

use crate::layers::blocks::conv_norm::{ConvNorm2d, ConvNorm2dConfig, ConvNorm2dMeta};
use crate::models::pyramid::downsample::{ConvDownsample, ConvDownsampleConfig};
use crate::models::pyramid::util::stride_div_output_resolution;
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::nn::conv::Conv2dConfig;
use burn::nn::{PaddingConfig2d, Relu};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`BasicBlock`] Meta trait.
pub trait BasicBlockMeta {
    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The configured width of the block.
    fn planes(&self) -> usize;

    /// The number of output feature planes.
    ///
    /// The basic block has an expansion factor of 1,
    /// so ``out_planes == planes``.
    fn out_planes(&self) -> usize {
        self.planes()
    }

    /// The stride of the first convolution.
    ///
    /// Affects downsample behavior.
    fn stride(&self) -> usize;

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

/// [`BasicBlock`] Config.
///
/// Implements [`BasicBlockMeta`].
#[derive(Config, Debug)]
pub struct BasicBlockConfig {
    /// The number of input feature planes.
    pub in_planes: usize,

    /// The configured width of the block.
    pub planes: usize,

    /// The stride of the first convolution.
    #[config(default = 1)]
    pub stride: usize,
}

impl BasicBlockMeta for BasicBlockConfig {
    fn in_planes(&self) -> usize {
        self.in_planes
    }

    fn planes(&self) -> usize {
        self.planes
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

impl BasicBlockConfig {
    /// Initialize a [`BasicBlock`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> BasicBlock<B> {
        let in_planes = self.in_planes();
        let out_planes = self.out_planes();
        let stride = self.stride();

        let downsample = if stride != 1 || in_planes != out_planes {
            Some(ConvDownsampleConfig::new(in_planes, out_planes).with_stride(stride))
        } else {
            None
        };

        let cn1: ConvNorm2dConfig = Conv2dConfig::new([in_planes, self.planes], [3, 3])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .into();

        let cn2: ConvNorm2dConfig = Conv2dConfig::new([self.planes, out_planes], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .into();

        BasicBlock {
            downsample: downsample.as_ref().map(|cfg| cfg.init(device)),
            cn1: cn1.init(device),
            cn2: cn2.init(device),
            act: Relu::new(),
        }
    }
}

/// Basic residual block.
///
/// Implements [`BasicBlockMeta`].
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    /// Optional downsample layer for the residual connection.
    pub downsample: Option<ConvDownsample<B>>,

    /// First 3x3 Conv/Norm, carries the stride.
    pub cn1: ConvNorm2d<B>,

    /// Second 3x3 Conv/Norm.
    pub cn2: ConvNorm2d<B>,

    /// Shared activation.
    pub act: Relu,
}

impl<B: Backend> BasicBlockMeta for BasicBlock<B> {
    fn in_planes(&self) -> usize {
        self.cn1.in_channels()
    }

    fn planes(&self) -> usize {
        self.cn1.out_channels()
    }

    fn out_planes(&self) -> usize {
        self.cn2.out_channels()
    }

    fn stride(&self) -> usize {
        self.cn1.stride()[0]
    }
}

impl<B: Backend> BasicBlock<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_planes, in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_planes, out_height, out_width]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        static INPUT_CONTRACT: ShapeContract = shape_contract![
            "batch",
            "in_planes",
            "in_height" = "out_height" * "stride",
            "in_width" = "out_width" * "stride"
        ];
        let [batch, out_height, out_width] = INPUT_CONTRACT.unpack_shape(
            &input,
            &["batch", "out_height", "out_width"],
            &[("in_planes", self.in_planes()), ("stride", self.stride())],
        );

        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(input.clone()),
            None => input.clone(),
        };

        let x = self.cn1.forward(input);
        let x = self.act.forward(x);
        let x = self.cn2.forward(x);

        let x = self.act.forward(x + identity);

        static OUTPUT_CONTRACT: ShapeContract =
            shape_contract!["batch", "out_planes", "out_height", "out_width"];
        run_every_nth!(OUTPUT_CONTRACT.assert_shape(
            &x,
            &[
                ("batch", batch),
                ("out_planes", self.out_planes()),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        ));

        x
    }
}
