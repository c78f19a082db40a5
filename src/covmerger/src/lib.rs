// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#[macro_use]
extern crate anyhow;

#[macro_use]
extern crate log;

pub mod aggregate;
pub mod checkout;
pub mod correlate;
pub mod merge;
pub mod provider;
pub mod record;
pub mod repo;
pub mod source;

pub use merge::{merge_csv_data, Config, Merger};
pub use repo::RepoCommit;
pub use source::{Count, Line, MergeResult};
