// SPDX-License-Identifier: GPL-3.0-only
pub mod error;
pub mod traits;
pub mod http;

pub use error::RemoteError;
pub use traits::{RemoteExecutor, ResultStream};
pub use http::HttpJobExecutor;
