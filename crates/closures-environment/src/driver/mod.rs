// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Driver module - script runtimes behind one contract.
//!
//! | Runtime id | Driver | Engine |
//! |------------|--------|--------|
//! | `js`, `nodejs-embedded` | [`JsDriver`] | Embedded QuickJS, one thread per invocation |
//! | `nodejs` | [`ProcessDriver`] | External `node` process |
//! | `python` | [`ProcessDriver`] | External `python3` process |
//! | any | [`MockDriver`] | Test double |

pub mod codec;
pub mod mock;
pub mod process;
pub mod quickjs;
mod traits;

pub use mock::MockDriver;
pub use process::{ProcessDriver, ProcessLanguage};
pub use quickjs::JsDriver;
pub use traits::*;
