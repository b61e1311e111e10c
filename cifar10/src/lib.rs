//! Train a small convolutional network to classify the CIFAR-10 images.
//!
//! The network, optimizer and augmentation come from `convnet`; this crate
//! loads the data, declares the network and wires the pieces together.

pub mod architecture;
pub mod config;
pub mod dataset;
pub mod training;
