#![doc = include_str!("../README.md")]
pub mod configuration;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod navigator;
pub mod observer;
pub mod pid;
pub mod pilot;
pub mod pose;
pub mod simulation;
