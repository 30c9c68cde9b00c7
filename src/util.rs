use std::fs;

use anyhow::{Context, Result};
use log::debug;
use thiserror::Error;

/// Size of a 32-bit ELF header; smaller files cannot be analyzed.
pub const ELF32_EHDR_SIZE: usize = 52;

#[derive(Debug, Error)]
pub enum UtilError {
    #[error("{0}: too small to hold an ELF header")]
    TooSmall(String),
}

pub fn read_file(filename: &str) -> Result<Vec<u8>> {
    debug!("reading file: {}", filename);
    let buf = fs::read(filename).with_context(|| format!("failed to read {}", filename))?;
    debug!("read {} bytes", buf.len());

    if buf.len() < ELF32_EHDR_SIZE {
        return Err(UtilError::TooSmall(filename.to_string()).into());
    }

    Ok(buf)
}
