#![warn(missing_docs)]
//!# gaitnet - Burn Gait Recognition Backbones
//!
//! ## Notable Components
//!
//! * [`layers`] - reusable neural network modules.
//!   * [`layers::blocks::conv_norm`] - ``Conv2d + BatchNorm2d`` block.
//!   * [`layers::se`] - squeeze-and-excitation channel gate.
//! * [`models`] - complete model families.
//!   * [`models::pyramid`] - SE-gated residual backbone with
//!     feature-pyramid fusion, the silhouette feature extractor used
//!     by gait embedding heads.

extern crate core;
/// Test-only macro import.
#[cfg(test)]
#[allow(unused_imports)]
#[macro_use]
extern crate hamcrest;

pub mod layers;
pub mod models;
