// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Manifest-driven installation engine.
//!
//! An __install manifest__ declares a list of file system mutations, called
//! __decrees__, together with the payload assets they need. Misfit applies
//! those decrees to files owned by some other application, e.g., an editor's
//! settings and stylesheets, without leaving them corrupted or
//! unrecoverable.
//!
//! # Safety Net
//!
//! Every original is archived before it gets touched, so the latest install
//! of an application can always be rolled back through [`backup::restore`].
//! Marker blocks make re-patching replace instead of stack. Validation of
//! the whole manifest happens before the first mutation.
//!
//! # Builder Role
//!
//! The same executable can also assemble a distributable bundle holding a
//! manifest, its payloads, and a renamed copy of itself, through
//! [`build::Builder`].

pub mod backup;
pub mod build;
pub mod config;
pub mod fs_utils;
pub mod install;
pub mod keypath;
pub mod patch;
pub mod path;
pub mod progress;
pub mod prompt;
