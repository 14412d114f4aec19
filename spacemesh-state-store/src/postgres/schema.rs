// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

diesel::table! {
    atxs (atx_id) {
        atx_id -> Text,
        node_id -> Text,
        coinbase -> Text,
        base_tick -> Int8,
        tick_count -> Int8,
        effective_num_units -> Int8,
        weight -> Nullable<Int8>,
        epoch -> Int8,
    }
}

diesel::table! {
    layers (layer_id) {
        layer_id -> Int8,
        status -> Int4,
    }
}

diesel::table! {
    malfeasance_nodes (node_id) {
        node_id -> Text,
    }
}

diesel::table! {
    rewards (layer, node_id) {
        layer -> Int8,
        node_id -> Text,
        coinbase -> Text,
        amount -> Int8,
        layer_reward -> Int8,
        atx_id -> Nullable<Text>,
    }
}

diesel::table! {
    transactions (id) {
        id -> Text,
        principal -> Nullable<Text>,
        template -> Nullable<Text>,
        method -> Nullable<Int2>,
        nonce -> Nullable<Int8>,
        layer -> Nullable<Int8>,
        block -> Nullable<Text>,
        status -> Nullable<Int2>,
        message -> Nullable<Text>,
        fee -> Nullable<Int8>,
        raw -> Nullable<Text>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    atxs,
    layers,
    malfeasance_nodes,
    rewards,
    transactions,
);
