// SPDX-License-Identifier: GPL-3.0-only
pub mod traits;
pub mod fs;

pub use traits::PackageStore;
pub use fs::FsPackageStore;
