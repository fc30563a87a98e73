//! objio-s3: S3-compatible storage driver for objio
//!
//! This crate provides the implementation of the StorageDriver trait
//! using the aws-sdk-s3 crate. It is the only crate that directly
//! depends on the AWS SDK.

pub mod capability;
pub mod client;
pub mod factory;

pub use client::S3Driver;
pub use factory::{S3Factory, S3Settings};
