//! # SE-Gated Pyramid Backbone
//!
//! A four-stage residual feature extractor for silhouette input; each
//! stage's output passes through its own squeeze-and-excitation gate,
//! and the four gated maps are projected to a common width, aligned to
//! the coarsest resolution, and summed into one fused feature map.

pub mod backbone;
pub mod basic_block;
pub mod bottleneck;
pub mod downsample;
pub mod residual_block;
pub mod stage;
pub mod stem;
pub mod util;
