// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Upstream feed: the single WebSocket session and its supervisor.

pub mod link;
pub mod supervisor;
