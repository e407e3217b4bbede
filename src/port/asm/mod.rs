//! Selects the appropriate context-switch assembly for the target's ABI.

// Copyright (c) 2025 The pets Authors
// SPDX-License-Identifier: GPL-3.0-or-later

#[cfg(all(
    arm_abi = "eabi",
    any(arm_architecture = "v6-m", arm_architecture = "v8-m.base")
))]
mod eabi_v6;
#[cfg(all(
    arm_abi = "eabi",
    any(arm_architecture = "v6-m", arm_architecture = "v8-m.base")
))]
pub(crate) use eabi_v6::build_initial_frame;

#[cfg(all(
    arm_abi = "eabi",
    not(any(arm_architecture = "v6-m", arm_architecture = "v8-m.base"))
))]
mod eabi;
#[cfg(all(
    arm_abi = "eabi",
    not(any(arm_architecture = "v6-m", arm_architecture = "v8-m.base"))
))]
pub(crate) use eabi::build_initial_frame;

#[cfg(arm_abi = "eabihf")]
mod eabihf;
#[cfg(arm_abi = "eabihf")]
pub(crate) use eabihf::build_initial_frame;
