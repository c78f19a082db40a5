// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One version of a whole source tree.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct RepoCommit {
    pub repo: String,
    pub commit: String,
}

impl RepoCommit {
    pub fn new(repo: impl Into<String>, commit: impl Into<String>) -> Self {
        let repo = repo.into();
        let commit = commit.into();

        Self { repo, commit }
    }
}

impl fmt::Display for RepoCommit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.repo, self.commit)
    }
}
