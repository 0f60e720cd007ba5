// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Typed repositories over the file store.

pub mod attestations;
pub mod vaults;

pub use attestations::AttestationRepository;
pub use vaults::{EntitlementKind, VaultRecord, VaultRepository};
