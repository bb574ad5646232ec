// Copyright 2024-Present vusb-analyzer Contributors
// SPDX-License-Identifier: Apache-2.0

/// The one terminal error kind at this layer (§7 `IOFailure`): the parser
/// input stream closed unexpectedly. The `Follower` pushes a
/// [`vusb_model::Termination::Io`] event onto the bus and stops; it never
/// propagates this as a `panic` or process exit on its own.
#[derive(Debug, thiserror::Error)]
pub enum FollowerError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
