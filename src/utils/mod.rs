pub mod sequence_reset;

use anyhow::{Context, Result};
use std::path::PathBuf;
use url::Url;
use which::which;

/// Finds an executable in the system PATH.
pub fn find_executable(program: &str) -> Result<PathBuf> {
    which(program).with_context(|| {
        format!(
            "{} executable not found in PATH. Please ensure it is installed and in your PATH.",
            program
        )
    })
}

/// Database URL with the password masked, safe to print.
pub fn redact_url(database_url: &str) -> String {
    match Url::parse(database_url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("****"));
            }
            parsed.to_string()
        }
        Err(_) => "<unparseable database url>".to_string(),
    }
}
