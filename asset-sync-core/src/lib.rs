#![doc = "asset-sync-core: core logic library for sync-assets."]

//! This crate contains the whole asset sync pipeline: manifest model and
//! validation, the fetch and image-processing contracts, their default
//! implementations, and the bounded [`synchronise`](synchronise::synchronise)
//! runner that ties them together.
//!
//! # Usage
//! The `sync-assets` binary crate only parses flags and files, then calls into
//! this crate. Tests substitute the traits in [`contract`] with fakes or with
//! the `mockall` mocks exported under the `test-export-mocks` feature.

pub mod cancel;
pub mod config;
pub mod contract;
pub mod fetch;
pub mod manifest;
pub mod normalize;
pub mod report;
pub mod retry;
pub mod synchronise;
