// SPDX-License-Identifier: MIT
pub mod header;
pub mod score;
