use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use anyhow::Result;

use crate::program::Program;

/// Serialize the whole program model. The format is internal, but stable:
/// `read` reproduces a structurally equal `Program`.
pub fn write(path: &Path, program: &Program) -> Result<()> {
    write_to(BufWriter::new(File::create(path)?), program)
}

pub fn write_to<W: Write>(writer: W, program: &Program) -> Result<()> {
    bincode::serialize_into(writer, program)?;
    Ok(())
}

pub fn read(path: &Path) -> Result<Program> {
    read_from(BufReader::new(File::open(path)?))
}

pub fn read_from<R: Read>(reader: R) -> Result<Program> {
    Ok(bincode::deserialize_from(reader)?)
}
