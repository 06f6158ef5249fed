//! # SE-Gated Pyramid Backbone
//!
//! [`PyramidBackbone`] chains a silhouette stem and four residual
//! stages; each stage's output passes through its own
//! [`SqueezeExcitation`] gate, is projected to a common fusion width by
//! a dedicated 1x1 convolution, aligned to the coarsest level by
//! repeated nearest-neighbor half-scale resampling, and summed into a
//! single fused feature map.
//!
//! [`PyramidBackboneConfig`] carries the upstream configuration
//! surface: block kind, per-stage channels / block counts / strides,
//! stem pooling, gate reduction, and fusion width. A stage with zero
//! blocks degenerates to an identity pass-through, and its gate and
//! projection are sized to the width that actually flows through it.

use crate::layers::se::{SqueezeExcitation, SqueezeExcitationConfig};
use crate::models::pyramid::residual_block::BlockKind;
use crate::models::pyramid::stage::{Stage, StageConfig, StageMeta};
use crate::models::pyramid::stem::{PyramidStem, PyramidStemConfig, PyramidStemMeta};
use crate::models::pyramid::util::{pyramid_halving_steps, stride_div_output_resolution};
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::prelude::{Backend, Config, Module, Tensor};
use burn::tensor::module::interpolate;
use burn::tensor::ops::{InterpolateMode, InterpolateOptions};

/// Downscale a feature map by repeated nearest-neighbor halving.
///
/// Each step maps ``[batch, channels, height, width]`` to
/// ``[batch, channels, height / 2, width / 2]``.
pub fn half_scale_nearest<B: Backend>(
    input: Tensor<B, 4>,
    steps: usize,
) -> Tensor<B, 4> {
    let mut x = input;
    for _ in 0..steps {
        let [_, _, height, width] = x.dims();
        x = interpolate(
            x,
            [height / 2, width / 2],
            InterpolateOptions::new(InterpolateMode::Nearest),
        );
    }
    x
}

/// [`PyramidBackbone`] Meta trait.
pub trait PyramidBackboneMeta {
    /// The number of input channels.
    fn in_channels(&self) -> usize;

    /// The common channel width of the fused output.
    fn fusion_width(&self) -> usize;

    /// The cumulative stride from input to fused output.
    ///
    /// The fused map sits at the resolution of the last pyramid level:
    /// stem stride times the product of the stage strides.
    fn stride(&self) -> usize;

    /// Get the fused output resolution for a given input resolution.
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

/// [`PyramidBackbone`] Config.
///
/// Implements [`PyramidBackboneMeta`].
#[derive(Config, Debug)]
pub struct PyramidBackboneConfig {
    /// Residual block variant.
    pub block: BlockKind,

    /// Per-stage channel widths (pre-expansion).
    #[config(default = "[64, 128, 256, 512]")]
    pub channels: [usize; 4],

    /// The number of input channels; 1 for silhouettes.
    #[config(default = 1)]
    pub in_channels: usize,

    /// Per-stage residual block counts; 0 skips a stage.
    #[config(default = "[1, 2, 2, 1]")]
    pub layers: [usize; 4],

    /// Per-stage strides.
    #[config(default = "[1, 2, 2, 1]")]
    pub strides: [usize; 4],

    /// Whether the stem ends in a stride-2 max pool.
    #[config(default = true)]
    pub maxpool: bool,

    /// Reduction factor of the squeeze-and-excitation gates.
    #[config(default = 16)]
    pub se_reduction: usize,

    /// The common channel width the pyramid levels are projected to.
    #[config(default = 512)]
    pub fusion_width: usize,
}

impl PyramidBackboneMeta for PyramidBackboneConfig {
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn fusion_width(&self) -> usize {
        self.fusion_width
    }

    fn stride(&self) -> usize {
        let stem_stride = if self.maxpool { 2 } else { 1 };
        self.strides.iter().product::<usize>() * stem_stride
    }
}

impl PyramidBackboneConfig {
    /// The reference configuration of the gait backbone.
    ///
    /// Bottleneck blocks, channels ``[64, 128, 256, 512]``, block
    /// counts ``[1, 2, 2, 1]``, strides ``[1, 2, 2, 1]``, pooled stem.
    pub fn gait_mul3_se() -> Self {
        Self::new(BlockKind::Bottleneck)
    }

    /// Build the four stage configs, threading the running input width.
    ///
    /// A zero-block stage leaves the width unchanged.
    pub fn stage_configs(&self) -> [StageConfig; 4] {
        let mut in_planes = self.channels[0];
        let mut build = |level: usize| {
            let config = StageConfig::build(
                self.block,
                in_planes,
                self.channels[level],
                self.layers[level],
                self.strides[level],
            );
            in_planes = config.out_planes_for(in_planes);
            config
        };
        [build(0), build(1), build(2), build(3)]
    }

    /// The actual output width of each stage.
    ///
    /// Sizes the gates and projections; accounts for block expansion
    /// and for skipped stages.
    pub fn stage_out_planes(&self) -> [usize; 4] {
        let mut planes = self.channels[0];
        let mut step = |level: usize| {
            if self.layers[level] > 0 {
                planes = self.channels[level] * self.block.expansion();
            }
            planes
        };
        [step(0), step(1), step(2), step(3)]
    }

    /// Check if the config is valid.
    ///
    /// # Returns
    ///
    /// A `Result<(), String>`
    pub fn try_validate(&self) -> Result<(), String> {
        for (level, config) in self.stage_configs().iter().enumerate() {
            config
                .try_validate()
                .map_err(|err| format!("stage {}: {}", level + 1, err))?;
        }
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        match self.try_validate() {
            Ok(_) => (),
            Err(err) => panic!("{}", err),
        }
    }

    /// Initialize a [`PyramidBackbone`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> PyramidBackbone<B> {
        let stem = PyramidStemConfig::new(self.in_channels, self.channels[0])
            .with_maxpool(self.maxpool)
            .init(device);

        let [stage1, stage2, stage3, stage4] = self.stage_configs();
        let [width1, width2, width3, width4] = self.stage_out_planes();

        let se = |width: usize| {
            SqueezeExcitationConfig::new(width)
                .with_reduction(self.se_reduction)
                .init(device)
        };
        let proj = |width: usize| {
            Conv2dConfig::new([width, self.fusion_width], [1, 1])
                .with_bias(false)
                .init(device)
        };

        PyramidBackbone {
            stem,

            stage1: stage1.init(device),
            stage2: stage2.init(device),
            stage3: stage3.init(device),
            stage4: stage4.init(device),

            se1: se(width1),
            se2: se(width2),
            se3: se(width3),
            se4: se(width4),

            proj1: proj(width1),
            proj2: proj(width2),
            proj3: proj(width3),
            proj4: proj(width4),

            halving_steps: pyramid_halving_steps(self.strides),
        }
    }
}

/// SE-gated residual backbone with feature-pyramid fusion.
///
/// Implements [`PyramidBackboneMeta`].
#[derive(Module, Debug)]
pub struct PyramidBackbone<B: Backend> {
    /// Input stem.
    pub stem: PyramidStem<B>,

    /// First residual stage.
    pub stage1: Stage<B>,
    /// Second residual stage.
    pub stage2: Stage<B>,
    /// Third residual stage.
    pub stage3: Stage<B>,
    /// Fourth residual stage.
    pub stage4: Stage<B>,

    /// Channel gate on stage 1.
    pub se1: SqueezeExcitation<B>,
    /// Channel gate on stage 2.
    pub se2: SqueezeExcitation<B>,
    /// Channel gate on stage 3.
    pub se3: SqueezeExcitation<B>,
    /// Channel gate on stage 4.
    pub se4: SqueezeExcitation<B>,

    /// 1x1 projection of level 1 to the fusion width.
    pub proj1: Conv2d<B>,
    /// 1x1 projection of level 2 to the fusion width.
    pub proj2: Conv2d<B>,
    /// 1x1 projection of level 3 to the fusion width.
    pub proj3: Conv2d<B>,
    /// 1x1 projection of level 4 to the fusion width.
    pub proj4: Conv2d<B>,

    /// Half-scale steps aligning each level to the last.
    pub halving_steps: [usize; 4],
}

impl<B: Backend> PyramidBackboneMeta for PyramidBackbone<B> {
    fn in_channels(&self) -> usize {
        self.stem.in_channels()
    }

    fn fusion_width(&self) -> usize {
        self.proj4.weight.shape().dims[0]
    }

    fn stride(&self) -> usize {
        self.stem.stride()
            * self.stage1.stride()
            * self.stage2.stride()
            * self.stage3.stride()
            * self.stage4.stride()
    }
}

impl<B: Backend> PyramidBackbone<B> {
    /// Compute the four gated pyramid features.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``.
    ///
    /// # Returns
    ///
    /// The gated stage outputs ``[c1, c2, c3, c4]``, each at its own
    /// resolution and channel width.
    pub fn forward_features(
        &self,
        input: Tensor<B, 4>,
    ) -> [Tensor<B, 4>; 4] {
        let x = self.stem.forward(input);

        let c1 = self.se1.forward(self.stage1.forward(x));
        let c2 = self.se2.forward(self.stage2.forward(c1.clone()));
        let c3 = self.se3.forward(self.stage3.forward(c2.clone()));
        let c4 = self.se4.forward(self.stage4.forward(c3.clone()));

        [c1, c2, c3, c4]
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// The fused feature map, a
    /// ``[batch, fusion_width, out_height, out_width]`` tensor at the
    /// resolution of the last pyramid level.
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

        let [c1, c2, c3, c4] = self.forward_features(input);

        let p1 = half_scale_nearest(self.proj1.forward(c1), self.halving_steps[0]);
        let p2 = half_scale_nearest(self.proj2.forward(c2), self.halving_steps[1]);
        let p3 = half_scale_nearest(self.proj3.forward(c3), self.halving_steps[2]);
        let p4 = half_scale_nearest(self.proj4.forward(c4), self.halving_steps[3]);

        let fused = p1 + p2 + p3 + p4;

        static FUSED_CONTRACT: ShapeContract =
            shape_contract!["batch", "fusion_width", "out_height", "out_width"];
        run_every_nth!(FUSED_CONTRACT.assert_shape(
            &fused,
            &[
                ("batch", batch),
                ("fusion_width", self.fusion_width()),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        ));

        fused
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::pyramid::residual_block::ResidualBlockMeta;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    static FEATURE_CONTRACT: ShapeContract =
        shape_contract!["batch", "channels", "height", "width"];

    static FUSED_CONTRACT: ShapeContract =
        shape_contract!["batch", "fusion_width", "out_height", "out_width"];

    #[test]
    fn test_half_scale_nearest() {
        type B = NdArray<f32>;
        let device = Default::default();

        let input: Tensor<B, 4> =
            Tensor::random([2, 3, 8, 8], Distribution::Default, &device);

        let output = half_scale_nearest(input.clone(), 0);
        assert_eq!(output.into_data(), input.clone().into_data());

        let output = half_scale_nearest(input, 2);
        FEATURE_CONTRACT.assert_shape(
            &output,
            &[("batch", 2), ("channels", 3), ("height", 2), ("width", 2)],
        );
    }

    #[test]
    fn test_backbone_config() {
        let config = PyramidBackboneConfig::gait_mul3_se();
        config.expect_valid();

        assert_eq!(config.block, BlockKind::Bottleneck);
        assert_eq!(config.channels, [64, 128, 256, 512]);
        assert_eq!(config.in_channels(), 1);
        assert_eq!(config.layers, [1, 2, 2, 1]);
        assert_eq!(config.strides, [1, 2, 2, 1]);
        assert!(config.maxpool);
        assert_eq!(config.se_reduction, 16);
        assert_eq!(config.fusion_width(), 512);

        assert_eq!(config.stride(), 8);
        assert_eq!(config.output_resolution([128, 128]), [16, 16]);
        assert_eq!(config.stage_out_planes(), [256, 512, 1024, 2048]);

        let stages = config.stage_configs();
        assert_eq!(stages[0].len(), 1);
        assert_eq!(stages[1].len(), 2);
        assert_eq!(stages[3].out_planes_for(1024), 2048);
    }

    #[test]
    fn test_backbone_config_skipped_stage_widths() {
        let config = PyramidBackboneConfig::gait_mul3_se().with_layers([0, 2, 2, 1]);
        config.expect_valid();

        // Stage 1 is identity; its gate and projection see stem width.
        assert_eq!(config.stage_out_planes(), [64, 512, 1024, 2048]);

        let stages = config.stage_configs();
        assert!(stages[0].is_empty());
        assert_eq!(stages[1].blocks[0].in_planes(), 64);
    }

    #[test]
    fn test_backbone_forward_reference_config() {
        type B = NdArray<f32>;
        let device = Default::default();

        let backbone: PyramidBackbone<B> =
            PyramidBackboneConfig::gait_mul3_se().init(&device);

        assert_eq!(backbone.in_channels(), 1);
        assert_eq!(backbone.fusion_width(), 512);
        assert_eq!(backbone.stride(), 8);
        assert_eq!(backbone.halving_steps, [2, 1, 0, 0]);

        let input = Tensor::ones([2, 1, 128, 128], &device);
        let output = backbone.forward(input);

        FUSED_CONTRACT.assert_shape(
            &output,
            &[
                ("batch", 2),
                ("fusion_width", 512),
                ("out_height", 16),
                ("out_width", 16),
            ],
        );
    }

    #[test]
    fn test_backbone_forward_skipped_stage() {
        type B = NdArray<f32>;
        let device = Default::default();

        let backbone: PyramidBackbone<B> = PyramidBackboneConfig::gait_mul3_se()
            .with_layers([0, 2, 2, 1])
            .init(&device);

        let input = Tensor::ones([2, 1, 128, 128], &device);

        // c1 keeps the stem's shape exactly; the gate only rescales.
        let [c1, _, _, c4] = backbone.forward_features(input.clone());
        FEATURE_CONTRACT.assert_shape(
            &c1,
            &[("batch", 2), ("channels", 64), ("height", 64), ("width", 64)],
        );
        FEATURE_CONTRACT.assert_shape(
            &c4,
            &[
                ("batch", 2),
                ("channels", 2048),
                ("height", 16),
                ("width", 16),
            ],
        );

        let output = backbone.forward(input);
        FUSED_CONTRACT.assert_shape(
            &output,
            &[
                ("batch", 2),
                ("fusion_width", 512),
                ("out_height", 16),
                ("out_width", 16),
            ],
        );
    }

    #[test]
    fn test_backbone_forward_basic_narrow() {
        type B = NdArray<f32>;
        let device = Default::default();

        let config = PyramidBackboneConfig::new(BlockKind::Basic)
            .with_channels([4, 8, 16, 32])
            .with_layers([1, 1, 1, 1])
            .with_se_reduction(4)
            .with_fusion_width(32);
        config.expect_valid();
        assert_eq!(config.stage_out_planes(), [4, 8, 16, 32]);

        let backbone: PyramidBackbone<B> = config.init(&device);

        let input: Tensor<B, 4> =
            Tensor::random([2, 1, 32, 32], Distribution::Default, &device);
        let output = backbone.forward(input);

        FUSED_CONTRACT.assert_shape(
            &output,
            &[
                ("batch", 2),
                ("fusion_width", 32),
                ("out_height", 4),
                ("out_width", 4),
            ],
        );
    }

    #[test]
    fn test_backbone_forward_unpooled_unit_strides() {
        type B = NdArray<f32>;
        let device = Default::default();

        // No stem pool and all-unit strides: the fused map keeps the
        // input resolution, and no level is resampled.
        let config = PyramidBackboneConfig::new(BlockKind::Basic)
            .with_channels([4, 4, 4, 4])
            .with_layers([1, 1, 1, 1])
            .with_strides([1, 1, 1, 1])
            .with_maxpool(false)
            .with_se_reduction(2)
            .with_fusion_width(8);

        let backbone: PyramidBackbone<B> = config.init(&device);
        assert_eq!(backbone.stride(), 1);
        assert_eq!(backbone.halving_steps, [0, 0, 0, 0]);

        let input = Tensor::ones([1, 1, 16, 16], &device);
        let output = backbone.forward(input);

        FUSED_CONTRACT.assert_shape(
            &output,
            &[
                ("batch", 1),
                ("fusion_width", 8),
                ("out_height", 16),
                ("out_width", 16),
            ],
        );
    }
}
