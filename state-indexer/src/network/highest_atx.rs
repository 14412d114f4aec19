// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use spacemesh_state_types::Atx;

/// Highest ATX not authored by a malfeasant node
///
/// Height is `base_tick + tick_count`. On equal height the lexicographically
/// smallest ATX id wins, so the result does not depend on input order.
pub fn select_highest_atx<'a>(atxs: &'a [Atx], malfeasant: &HashSet<String>) -> Option<&'a Atx> {
    atxs.iter()
        .filter(|atx| !malfeasant.contains(&atx.node_id))
        .max_by(|a, b| {
            a.height()
                .cmp(&b.height())
                .then_with(|| b.atx_id.cmp(&a.atx_id))
        })
}

/// Standard base64 of a hex ATX id; empty id maps to empty string
pub fn encode_atx_id(hex_id: &str) -> Result<String, hex::FromHexError> {
    let bytes = hex::decode(hex_id)?;
    Ok(STANDARD.encode(bytes))
}
