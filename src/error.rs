use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse binary: {0}")]
    ObjectParse(#[from] object::read::Error),

    #[error("No debug information found. Compile with -g flag to include DWARF debug info.")]
    NoDebugInfo,

    #[error("Unsupported binary format. Only ELF, Mach-O and PE binaries are supported.")]
    UnsupportedFormat,

    #[error("DWARF parsing error: {0}")]
    Dwarf(String),

    #[error("Type reference cycle detected at offset {offset:#x}")]
    TypeCycle { offset: u64 },

    #[error("Invalid architecture configuration: {0}")]
    Config(String),

    #[error("Failed to parse architecture configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
