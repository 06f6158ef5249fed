//! # Bottleneck Residual Block
//!
//! [`BottleneckBlock`] is the three-convolution residual unit:
//! a 1x1 reduce, a 3x3 carrying the stride, and a 1x1 expand to
//! ``planes * 4``, with an identity (or 1x1 downsample) shortcut and a
//! relu on the sum.
//!
//! The stride rides on the 3x3 convolution, matching the layout of the
//! upstream pretrained weights.
//!
//! [`BottleneckBlockMeta`] defines a common meta API for
//! [`BottleneckBlock`] and [`BottleneckBlockConfig`].

use crate::layers::blocks::conv_norm::{ConvNorm2d, ConvNorm2dConfig, ConvNorm2dMeta};
use crate::models::pyramid::downsample::{ConvDownsample, ConvDownsampleConfig};
use crate::models::pyramid::util::stride_div_output_resolution;
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::nn::conv::Conv2dConfig;
use burn::nn::{PaddingConfig2d, Relu};
use burn::prelude::{Backend, Config, Module, Tensor};

/// Channel expansion factor of the bottleneck block.
pub const BOTTLENECK_EXPANSION: usize = 4;

/// [`BottleneckBlock`] Meta trait.
pub trait BottleneckBlockMeta {
    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The configured width of the block.
    fn planes(&self) -> usize;

    /// The number of output feature planes.
    ///
    /// ``out_planes = planes * 4``
    fn out_planes(&self) -> usize {
        self.planes() * BOTTLENECK_EXPANSION
    }

    /// The stride of the 3x3 convolution.
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

/// [`BottleneckBlock`] Config.
///
/// Implements [`BottleneckBlockMeta`].
#[derive(Config, Debug)]
pub struct BottleneckBlockConfig {
    /// The number of input feature planes.
    pub in_planes: usize,

    /// The configured width of the block.
    pub planes: usize,

    /// The stride of the 3x3 convolution.
    #[config(default = 1)]
    pub stride: usize,
}

impl BottleneckBlockMeta for BottleneckBlockConfig {
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

impl BottleneckBlockConfig {
    /// Initialize a [`BottleneckBlock`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> BottleneckBlock<B> {
        let in_planes = self.in_planes();
        let planes = self.planes();
        let out_planes = self.out_planes();
        let stride = self.stride();

        let downsample = if stride != 1 || in_planes != out_planes {
            Some(ConvDownsampleConfig::new(in_planes, out_planes).with_stride(stride))
        } else {
            None
        };

        let cn1: ConvNorm2dConfig = Conv2dConfig::new([in_planes, planes], [1, 1])
            .with_padding(PaddingConfig2d::Explicit(0, 0))
            .with_bias(false)
            .into();

        let cn2: ConvNorm2dConfig = Conv2dConfig::new([planes, planes], [3, 3])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .into();

        let cn3: ConvNorm2dConfig = Conv2dConfig::new([planes, out_planes], [1, 1])
            .with_padding(PaddingConfig2d::Explicit(0, 0))
            .with_bias(false)
            .into();

        BottleneckBlock {
            downsample: downsample.as_ref().map(|cfg| cfg.init(device)),
            cn1: cn1.init(device),
            cn2: cn2.init(device),
            cn3: cn3.init(device),
            act: Relu::new(),
        }
    }
}

/// Bottleneck residual block.
///
/// Implements [`BottleneckBlockMeta`].
#[derive(Module, Debug)]
pub struct BottleneckBlock<B: Backend> {
    /// Optional downsample layer for the residual connection.
    pub downsample: Option<ConvDownsample<B>>,

    /// 1x1 reduce Conv/Norm.
    pub cn1: ConvNorm2d<B>,

    /// 3x3 Conv/Norm, carries the stride.
    pub cn2: ConvNorm2d<B>,

    /// 1x1 expand Conv/Norm.
    pub cn3: ConvNorm2d<B>,

    /// Shared activation.
    pub act: Relu,
}

impl<B: Backend> BottleneckBlockMeta for BottleneckBlock<B> {
    fn in_planes(&self) -> usize {
        self.cn1.in_channels()
    }

    fn planes(&self) -> usize {
        self.cn1.out_channels()
    }

    fn out_planes(&self) -> usize {
        self.cn3.out_channels()
    }

    fn stride(&self) -> usize {
        self.cn2.stride()[0]
    }
}

impl<B: Backend> BottleneckBlock<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_planes, in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_planes=planes*4, out_height, out_width]`` tensor.
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
        let x = self.act.forward(x);
        let x = self.cn3.forward(x);

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

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    static BLOCK_OUTPUT_CONTRACT: ShapeContract =
        shape_contract!["batch", "out_planes", "out_height", "out_width"];

    #[test]
    fn test_bottleneck_block_config() {
        let config = BottleneckBlockConfig::new(16, 32);
        assert_eq!(config.in_planes(), 16);
        assert_eq!(config.planes(), 32);
        assert_eq!(config.out_planes(), 128);
        assert_eq!(config.stride(), 1);

        let config = config.with_stride(2);
        assert_eq!(config.stride(), 2);
        assert_eq!(config.output_resolution([16, 16]), [8, 8]);
    }

    #[test]
    fn test_bottleneck_block_meta() {
        type B = NdArray<f32>;
        let device = Default::default();

        let block: BottleneckBlock<B> = BottleneckBlockConfig::new(8, 4).init(&device);
        // 8 != 4 * 4, so a channel-matching shortcut is still needed.
        assert!(block.downsample.is_some());
        assert_eq!(block.in_planes(), 8);
        assert_eq!(block.planes(), 4);
        assert_eq!(block.out_planes(), 16);
        assert_eq!(block.stride(), 1);
    }

    #[test]
    fn test_bottleneck_block_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let block: BottleneckBlock<B> =
            BottleneckBlockConfig::new(8, 4).with_stride(2).init(&device);

        let input = Tensor::ones([2, 8, 8, 8], &device);
        let output = block.forward(input);

        BLOCK_OUTPUT_CONTRACT.assert_shape(
            &output,
            &[
                ("batch", 2),
                ("out_planes", 16),
                ("out_height", 4),
                ("out_width", 4),
            ],
        );
    }

    #[test]
    fn test_bottleneck_block_forward_no_shortcut() {
        type B = NdArray<f32>;
        let device = Default::default();

        let block: BottleneckBlock<B> = BottleneckBlockConfig::new(16, 4).init(&device);
        assert!(block.downsample.is_none());

        let input = Tensor::ones([2, 16, 8, 8], &device);
        let output = block.forward(input);

        BLOCK_OUTPUT_CONTRACT.assert_shape(
            &output,
            &[
                ("batch", 2),
                ("out_planes", 16),
                ("out_height", 8),
                ("out_width", 8),
            ],
        );
    }
}
