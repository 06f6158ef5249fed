//! # Residual Stage
//!
//! A [`Stage`] is a sequential chain of [`ResidualBlock`]s at one
//! pyramid level: the first block carries the stage stride and channel
//! change, the rest are width-preserving.
//!
//! A stage with zero blocks is legal and degenerates to an identity
//! pass-through with no parameters; the backbone uses this to skip a
//! level.

use crate::models::pyramid::residual_block::{
    BlockKind, ResidualBlock, ResidualBlockConfig, ResidualBlockMeta,
};
use crate::models::pyramid::util::stride_div_output_resolution;
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::config::Config;
use burn::prelude::{Backend, Module, Tensor};

/// [`Stage`] Meta API.
pub trait StageMeta {
    /// The number of blocks.
    fn len(&self) -> usize;

    /// Check if the stage is an identity pass-through.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of output feature planes, given the input planes.
    ///
    /// An identity stage has no intrinsic width; its output planes are
    /// whatever flows in.
    fn out_planes_for(
        &self,
        in_planes: usize,
    ) -> usize;

    /// Get the effective stride of the stage.
    ///
    /// An identity stage has stride 1.
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

/// [`Stage`] Configuration.
#[derive(Config, Debug)]
pub struct StageConfig {
    /// The component blocks.
    pub blocks: Vec<ResidualBlockConfig>,
}

impl From<Vec<ResidualBlockConfig>> for StageConfig {
    fn from(blocks: Vec<ResidualBlockConfig>) -> Self {
        Self { blocks }
    }
}

impl StageMeta for StageConfig {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn out_planes_for(
        &self,
        in_planes: usize,
    ) -> usize {
        match self.blocks.last() {
            Some(block) => block.out_planes(),
            None => in_planes,
        }
    }

    fn stride(&self) -> usize {
        self.blocks
            .iter()
            .fold(1, |acc, block| acc * block.stride())
    }
}

impl StageConfig {
    /// Build a stage config.
    ///
    /// The first block maps `in_planes` to `planes` at `stride`; the
    /// remaining blocks are `planes * expansion -> planes` at stride 1.
    ///
    /// `num_blocks == 0` builds an identity stage.
    pub fn build(
        kind: BlockKind,
        in_planes: usize,
        planes: usize,
        num_blocks: usize,
        stride: usize,
    ) -> Self {
        let blocks = (0..num_blocks)
            .map(|b| {
                if b == 0 {
                    ResidualBlockConfig::build(kind, in_planes, planes, stride)
                } else {
                    ResidualBlockConfig::build(kind, planes * kind.expansion(), planes, 1)
                }
            })
            .collect();

        Self { blocks }
    }

    /// Check if the config is valid.
    ///
    /// An empty stage is valid; a non-empty stage must be channel
    /// continuous from block to block.
    ///
    /// # Returns
    ///
    /// A `Result<(), String>`
    pub fn try_validate(&self) -> Result<(), String> {
        for idx in 1..self.blocks.len() {
            let prev = &self.blocks[idx - 1];
            let curr = &self.blocks[idx];
            if prev.out_planes() != curr.in_planes() {
                return Err(format!(
                    "block[{}].out_planes({}) != block[{}].in_planes({})\n{:#?}",
                    idx - 1,
                    prev.out_planes(),
                    idx,
                    curr.in_planes(),
                    self,
                ));
            }
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

    /// Initialize a new [`Stage`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> Stage<B> {
        self.expect_valid();

        Stage {
            blocks: self
                .blocks
                .into_iter()
                .map(|block| block.init(device))
                .collect(),
        }
    }
}

/// Residual stage.
#[derive(Module, Debug)]
pub struct Stage<B: Backend> {
    /// Internal blocks; may be empty.
    pub blocks: Vec<ResidualBlock<B>>,
}

impl<B: Backend> StageMeta for Stage<B> {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn out_planes_for(
        &self,
        in_planes: usize,
    ) -> usize {
        match self.blocks.last() {
            Some(block) => block.out_planes(),
            None => in_planes,
        }
    }

    fn stride(&self) -> usize {
        self.blocks
            .iter()
            .fold(1, |acc, block| acc * block.stride())
    }
}

impl<B: Backend> Stage<B> {
    /// Apply the stage.
    ///
    /// An identity stage returns its input unchanged.
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
        let [batch, in_planes, out_height, out_width] = INPUT_CONTRACT.unpack_shape(
            &input,
            &["batch", "in_planes", "out_height", "out_width"],
            &[("stride", self.stride())],
        );

        let x = self.blocks.iter().fold(input, |x, block| block.forward(x));

        static OUTPUT_CONTRACT: ShapeContract =
            shape_contract!["batch", "out_planes", "out_height", "out_width"];
        run_every_nth!(OUTPUT_CONTRACT.assert_shape(
            &x,
            &[
                ("batch", batch),
                ("out_planes", self.out_planes_for(in_planes)),
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
    use crate::models::pyramid::basic_block::BasicBlockConfig;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    #[test]
    fn test_stage_config_build_basic() {
        let config = StageConfig::build(BlockKind::Basic, 16, 32, 2, 2);
        config.expect_valid();
        assert_eq!(config.len(), 2);
        assert!(!config.is_empty());
        assert_eq!(config.out_planes_for(16), 32);
        assert_eq!(config.stride(), 2);
        assert_eq!(config.output_resolution([12, 24]), [6, 12]);

        let block1 = &config.blocks[0];
        assert_eq!(block1.in_planes(), 16);
        assert_eq!(block1.out_planes(), 32);
        assert_eq!(block1.stride(), 2);

        let block2 = &config.blocks[1];
        assert_eq!(block2.in_planes(), 32);
        assert_eq!(block2.out_planes(), 32);
        assert_eq!(block2.stride(), 1);
    }

    #[test]
    fn test_stage_config_build_bottleneck() {
        let config = StageConfig::build(BlockKind::Bottleneck, 64, 128, 3, 2);
        config.expect_valid();
        assert_eq!(config.len(), 3);
        assert_eq!(config.out_planes_for(64), 512);
        assert_eq!(config.stride(), 2);

        // Trailing blocks consume the expanded width.
        assert_eq!(config.blocks[1].in_planes(), 512);
        assert_eq!(config.blocks[1].out_planes(), 512);
    }

    #[test]
    fn test_stage_config_discontinuous_channels() {
        let config = StageConfig::from(vec![
            BasicBlockConfig::new(16, 32).into(),
            BasicBlockConfig::new(64, 64).into(),
        ]);
        assert!(config.try_validate().is_err());
    }

    #[test]
    fn test_empty_stage_is_identity() {
        type B = NdArray<f32>;
        let device = Default::default();

        let config = StageConfig::build(BlockKind::Bottleneck, 64, 64, 0, 2);
        config.expect_valid();
        assert!(config.is_empty());
        assert_eq!(config.stride(), 1);
        assert_eq!(config.out_planes_for(64), 64);

        let stage: Stage<B> = config.init(&device);
        assert!(stage.is_empty());
        assert_eq!(stage.stride(), 1);

        let input: Tensor<B, 4> =
            Tensor::random([2, 64, 8, 8], Distribution::Default, &device);
        let output = stage.forward(input.clone());

        // Exact pass-through, not merely shape-preserving.
        assert_eq!(output.into_data(), input.into_data());
    }

    #[test]
    pub fn test_stage_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let config = StageConfig::build(BlockKind::Basic, 8, 16, 2, 2);
        let stage: Stage<B> = config.init(&device);

        assert_eq!(stage.len(), 2);
        assert_eq!(stage.out_planes_for(8), 16);
        assert_eq!(stage.stride(), 2);
        assert_eq!(stage.output_resolution([12, 24]), [6, 12]);

        let input = Tensor::ones([2, 8, 12, 24], &device);
        let output = stage.forward(input);

        static OUTPUT_CONTRACT: ShapeContract =
            shape_contract!["batch", "out_planes", "out_height", "out_width"];
        OUTPUT_CONTRACT.assert_shape(
            &output,
            &[
                ("batch", 2),
                ("out_planes", 16),
                ("out_height", 6),
                ("out_width", 12),
            ],
        );
    }
}
