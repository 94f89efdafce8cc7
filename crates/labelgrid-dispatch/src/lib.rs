#![doc = include_str!("../README.md")]

pub mod coordinator;
pub mod engine;
pub mod worker;
