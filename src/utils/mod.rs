// SPDX-License-Identifier: GPL-3.0-only
pub mod checksum;
pub mod path_sanitizer;
pub mod url_validator;

pub use checksum::calculate_file_md5;
pub use path_sanitizer::{
    sanitize_package_name, sanitize_filename, validate_path_within_base,
    validate_path_within_base_new,
};
pub use url_validator::{validate_url, validate_result_locator, is_internal_host};
