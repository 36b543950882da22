// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

pub mod ledger;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock_ledger;
pub mod nonce;
pub mod provider;
