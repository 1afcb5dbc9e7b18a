// SPDX-License-Identifier: MIT
pub mod paced;
