// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0
pub mod broker;
pub mod config;
pub mod epoch;
pub mod metrics;
pub mod network;
pub mod price;
pub mod sink;
