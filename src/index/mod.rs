//-
// Copyright (c) 2026, Mailstead developers
//
// This file is part of Mailstead.
//
// Mailstead is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mailstead is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along
// with Mailstead. If not, see <http://www.gnu.org/licenses/>.

//! The binary index and cache subsystem.
//!
//! Everything persisted by this module goes through explicit encode and
//! decode functions over byte slices with bounds-checked cursors; no byte
//! buffer is ever reinterpreted as a typed struct. Malformed input is
//! always a recoverable decode error, never undefined behaviour.

pub mod cache;
pub mod codec;
pub mod file;
pub mod seq_array;
