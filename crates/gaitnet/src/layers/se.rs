//! # Squeeze-and-Excitation Gate
//!
//! [`SqueezeExcitation`] computes a per-channel scalar gate from the
//! global spatial average of a feature map, and rescales the map
//! channel-wise.
//!
//! [`SqueezeExcitationMeta`] defines a common meta API for
//! [`SqueezeExcitation`] and [`SqueezeExcitationConfig`].

use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::nn::{Linear, LinearConfig, Relu, Sigmoid};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`SqueezeExcitation`] Meta trait.
pub trait SqueezeExcitationMeta {
    /// The number of channels the gate is bound to.
    fn channels(&self) -> usize;

    /// The bottleneck reduction factor.
    fn reduction(&self) -> usize;

    /// Width of the squeeze bottleneck.
    ///
    /// ``hidden_channels = channels // reduction``
    ///
    /// A `reduction` which does not divide `channels` truncates here
    /// rather than erroring; mirrors the upstream checkpoint layout.
    fn hidden_channels(&self) -> usize {
        self.channels() / self.reduction()
    }
}

/// [`SqueezeExcitation`] Config.
///
/// Implements [`SqueezeExcitationMeta`].
#[derive(Config, Debug)]
pub struct SqueezeExcitationConfig {
    /// The number of channels the gate is bound to.
    pub channels: usize,

    /// The bottleneck reduction factor.
    #[config(default = 16)]
    pub reduction: usize,
}

impl SqueezeExcitationMeta for SqueezeExcitationConfig {
    fn channels(&self) -> usize {
        self.channels
    }

    fn reduction(&self) -> usize {
        self.reduction
    }
}

impl SqueezeExcitationConfig {
    /// Initialize a [`SqueezeExcitation`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> SqueezeExcitation<B> {
        let channels = self.channels();
        let hidden = self.hidden_channels();

        SqueezeExcitation {
            reduction: self.reduction,
            avg_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc1: LinearConfig::new(channels, hidden).init(device),
            act: Relu::new(),
            fc2: LinearConfig::new(hidden, channels).init(device),
            gate: Sigmoid::new(),
        }
    }
}

/// Squeeze-and-Excitation channel gate.
///
/// The excitation weights are [`Linear`] layers, not 1x1 convolutions;
/// the distinction matters for weight-name compatibility with the
/// upstream checkpoints.
///
/// Implements [`SqueezeExcitationMeta`].
#[derive(Module, Debug)]
pub struct SqueezeExcitation<B: Backend> {
    /// The bottleneck reduction factor.
    pub reduction: usize,

    /// Global average pool; the "squeeze".
    pub avg_pool: AdaptiveAvgPool2d,

    /// Squeeze projection, ``channels -> channels // reduction``.
    pub fc1: Linear<B>,

    /// Bottleneck activation.
    pub act: Relu,

    /// Excite projection, ``channels // reduction -> channels``.
    pub fc2: Linear<B>,

    /// Gate squashing to ``(0, 1)``.
    pub gate: Sigmoid,
}

impl<B: Backend> SqueezeExcitationMeta for SqueezeExcitation<B> {
    fn channels(&self) -> usize {
        self.fc1.weight.shape().dims[0]
    }

    fn reduction(&self) -> usize {
        self.reduction
    }

    fn hidden_channels(&self) -> usize {
        self.fc1.weight.shape().dims[1]
    }
}

impl<B: Backend> SqueezeExcitation<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: a ``[batch, channels, height, width]`` tensor.
    ///
    /// # Returns
    ///
    /// The input rescaled per-channel, same shape.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        static SHAPE_CONTRACT: ShapeContract =
            shape_contract!["batch", "channels", "height", "width"];
        let [batch, height, width] = SHAPE_CONTRACT.unpack_shape(
            &input,
            &["batch", "height", "width"],
            &[("channels", self.channels())],
        );

        let y = self.avg_pool.forward(input.clone());
        let y: Tensor<B, 2> = y.reshape([batch, self.channels()]);

        let y = self.fc1.forward(y);
        let y = self.act.forward(y);
        let y = self.fc2.forward(y);
        let y = self.gate.forward(y);

        let y: Tensor<B, 4> = y.reshape([batch, self.channels(), 1, 1]);
        let out = input * y;

        run_every_nth!(SHAPE_CONTRACT.assert_shape(
            &out,
            &[
                ("batch", batch),
                ("channels", self.channels()),
                ("height", height),
                ("width", width)
            ]
        ));

        out
    }
}
