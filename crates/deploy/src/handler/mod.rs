//! The request handler deployed into the compute function.
//!
//! The handler ships as a Python template embedded at build time. It is
//! rendered with the table name, then packaged as a zip archive holding a
//! single `handler.py` entry.

use std::io::{Cursor, Write};

use anyhow::{Context, Result};
use base64::{Engine, engine::general_purpose::STANDARD};
use derive_more::Deref;
use sha2::{Digest, Sha256};
use zip::{CompressionMethod, ZipWriter, write::FileOptions};

use crate::template;

pub mod contract;

/// Handler source template.
pub const HANDLER_TEMPLATE: &str = include_str!("../../assets/handler.py");

/// Version stamped into the rendered handler.
pub const TEMPLATE_VERSION: &str = "v1";

/// File name of the handler inside the package and the published repository.
pub const HANDLER_FILE: &str = "handler.py";

/// Entrypoint the function is configured with.
pub const HANDLER_ENTRYPOINT: &str = "handler.handler";

/// Render the handler source for the given table.
pub fn render(table_name: &str) -> Result<String> {
    template::fill(
        HANDLER_TEMPLATE,
        &[
            ("table_name", table_name),
            ("template_version", TEMPLATE_VERSION),
            ("collection_path", contract::COLLECTION_PATH),
        ],
    )
    .context("Failed to render handler template")
}

/// Zip archive ready to upload as function code.
#[derive(Debug, Clone, PartialEq, Eq, Deref)]
pub struct HandlerPackage {
    #[deref]
    bytes: Vec<u8>,
    sha256: String,
}

impl HandlerPackage {
    /// Render the handler for `table_name` and package it.
    pub fn build(table_name: &str) -> Result<Self> {
        let source = render(table_name)?;
        Self::from_source(&source)
    }

    /// Package an already rendered handler.
    ///
    /// Entries carry a fixed timestamp, so equal sources give equal bytes.
    pub fn from_source(source: &str) -> Result<Self> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(zip::DateTime::default())
            .unix_permissions(0o644);
        zip.start_file(HANDLER_FILE, options)
            .context("Failed to start handler entry in package")?;
        zip.write_all(source.as_bytes())
            .context("Failed to write handler entry")?;
        let bytes = zip
            .finish()
            .context("Failed to finish handler package")?
            .into_inner();

        let sha256 = package_digest(&bytes);
        tracing::debug!(size = bytes.len(), %sha256, "Packaged handler");
        Ok(Self { bytes, sha256 })
    }

    /// Base64 SHA-256 digest, in the form the function API reports it.
    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Base64 SHA-256 digest of a package.
pub fn package_digest(bytes: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    #[test]
    fn test_render_fills_every_placeholder() {
        let source = render("demo-table").unwrap();
        assert!(template::placeholders(&source).is_empty());
        assert!(source.contains("\"demo-table\""));
        assert!(source.contains(TEMPLATE_VERSION));
        assert!(source.contains("COLLECTION_PATH = \"/items\""));
        assert!(source.contains("def handler(event"));
    }

    #[test]
    fn test_package_is_deterministic() {
        let first = HandlerPackage::build("demo-table").unwrap();
        let second = HandlerPackage::build("demo-table").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.sha256(), package_digest(&first));

        let other = HandlerPackage::build("other-table").unwrap();
        assert_ne!(first.sha256(), other.sha256());
    }

    #[test]
    fn test_package_holds_handler() {
        let package = HandlerPackage::build("demo-table").unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(package.into_bytes())).unwrap();
        assert_eq!(archive.len(), 1);

        let mut entry = archive.by_name(HANDLER_FILE).unwrap();
        let mut source = String::new();
        entry.read_to_string(&mut source).unwrap();
        assert_eq!(source, render("demo-table").unwrap());
    }
}
