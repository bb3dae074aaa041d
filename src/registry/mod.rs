// SPDX-License-Identifier: GPL-3.0-only
pub mod models;
pub mod traits;
pub mod sqlite;

pub use models::PackageEntry;
pub use traits::Registry;
pub use sqlite::SqliteRegistry;
