/*
 * SPDX-FileCopyrightText: 2023 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! mbpatcher is primarily an application and not a library. The semver
//! versioning covers the CLI only; all Rust APIs can change at any time, even
//! in patch releases.
//!
//! The CLI source files use concrete types wherever possible for simplicity,
//! while the "library"-style source files aim to be generic.

pub mod cli;
pub mod device;
pub mod format;
pub mod patch;
pub mod stream;
pub mod util;
