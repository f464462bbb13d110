//! Scripts on disk: a JSON array of `{cmd, val, des}` records.

use std::path::Path;
use tracing::info;

use crate::command::CommandRecord;
use crate::errors::LoadError;
use crate::program::Program;

pub fn parse_script(json: &str) -> Result<Program, LoadError> {
    let records: Vec<CommandRecord> = serde_json::from_str(json)?;
    Program::from_records(&records)
}

pub fn render_script(program: &Program) -> Result<String, LoadError> {
    Ok(serde_json::to_string_pretty(&program.to_records())?)
}

pub fn load_script<P: AsRef<Path>>(path: P) -> Result<Program, LoadError> {
    let path = path.as_ref();
    let program = parse_script(&std::fs::read_to_string(path)?)?;
    info!("Loaded {} command(s) from {}", program.len(), path.display());
    Ok(program)
}

pub fn save_script<P: AsRef<Path>>(path: P, program: &Program) -> Result<(), LoadError> {
    let path = path.as_ref();
    std::fs::write(path, render_script(program)?)?;
    info!("Saved {} command(s) to {}", program.len(), path.display());
    Ok(())
}

/// Name used for a script in logs and the error journal.
pub fn script_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "script".to_string())
}
