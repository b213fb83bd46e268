use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::loader::MachineInfo;

const VALID_POINTER_SIZES: [u64; 4] = [1, 2, 4, 8];

/// Architecture facts the aggregator needs, built once per object file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchConfig {
    pub machine: String,
    pub pointer_size: u64,
    pub big_endian: bool,
    /// Pointer size per `DW_AT_address_class`, indexed by class. Zero means unmapped.
    pub address_classes: Vec<u64>,
}

impl ArchConfig {
    pub fn new(machine: impl Into<String>, pointer_size: u64) -> Self {
        Self {
            machine: machine.into(),
            pointer_size,
            big_endian: false,
            address_classes: Vec::new(),
        }
    }

    pub fn with_address_classes(mut self, sizes: Vec<u64>) -> Self {
        self.address_classes = sizes;
        self
    }

    /// Size of a pointer in address class `class`, or the default pointer size.
    pub fn pointer_size_for_class(&self, class: u64) -> u64 {
        usize::try_from(class)
            .ok()
            .and_then(|i| self.address_classes.get(i))
            .copied()
            .filter(|&size| size != 0)
            .unwrap_or(self.pointer_size)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MachineEntry {
    pub pointer_size: Option<u64>,
    #[serde(default)]
    pub address_classes: Vec<u64>,
}

impl MachineEntry {
    fn validate(&self, name: &str) -> Result<()> {
        if let Some(size) = self.pointer_size
            && !VALID_POINTER_SIZES.contains(&size)
        {
            return Err(Error::Config(format!(
                "machine '{}': pointer_size must be 1, 2, 4 or 8 (got {})",
                name, size
            )));
        }
        for (class, &size) in self.address_classes.iter().enumerate() {
            if size != 0 && !VALID_POINTER_SIZES.contains(&size) {
                return Err(Error::Config(format!(
                    "machine '{}': address class {} has invalid size {}",
                    name, class, size
                )));
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct ArchFile {
    #[serde(default)]
    machines: IndexMap<String, MachineEntry>,
}

/// Machine table keyed by lower-case architecture name.
#[derive(Debug, Clone)]
pub struct ArchTable {
    machines: IndexMap<String, MachineEntry>,
}

impl Default for ArchTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ArchTable {
    pub fn builtin() -> Self {
        let entries: [(&str, u64); 12] = [
            ("x86_64", 8),
            ("aarch64", 8),
            ("riscv64", 8),
            ("powerpc64", 8),
            ("mips64", 8),
            ("i386", 4),
            ("arm", 4),
            ("riscv32", 4),
            ("powerpc", 4),
            ("mips", 4),
            ("msp430", 2),
            ("avr", 2),
        ];
        let machines = entries
            .into_iter()
            .map(|(name, size)| {
                let entry = MachineEntry { pointer_size: Some(size), address_classes: Vec::new() };
                (name.to_string(), entry)
            })
            .collect();
        Self { machines }
    }

    /// Built-in table with the machines of a YAML document layered on top.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: ArchFile = serde_yaml::from_str(yaml)?;
        let mut table = Self::builtin();
        for (name, entry) in file.machines {
            if name.is_empty() {
                return Err(Error::Config("empty machine name is not allowed".to_string()));
            }
            entry.validate(&name)?;
            table.machines.insert(name.to_lowercase(), entry);
        }
        Ok(table)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    pub fn get(&self, machine: &str) -> Option<&MachineEntry> {
        self.machines.get(&machine.to_lowercase())
    }

    /// Configuration for `machine`; unknown machines keep the object's own pointer size.
    pub fn config_for(&self, machine: &MachineInfo) -> ArchConfig {
        let entry = self.get(&machine.name);
        if entry.is_none() {
            tracing::debug!(machine = %machine.name, "machine not in table, using object defaults");
        }

        let pointer_size =
            entry.and_then(|e| e.pointer_size).unwrap_or(u64::from(machine.pointer_size));
        ArchConfig {
            machine: machine.name.clone(),
            pointer_size,
            big_endian: machine.big_endian,
            address_classes: entry.map(|e| e.address_classes.clone()).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(name: &str, pointer_size: u8) -> MachineInfo {
        MachineInfo { name: name.to_string(), pointer_size, big_endian: false }
    }

    #[test]
    fn address_class_lookup_falls_back() {
        let arch = ArchConfig::new("c28x", 4).with_address_classes(vec![0, 2, 4]);
        assert_eq!(arch.pointer_size_for_class(1), 2);
        assert_eq!(arch.pointer_size_for_class(2), 4);
        // Zero entry and out-of-range classes use the default.
        assert_eq!(arch.pointer_size_for_class(0), 4);
        assert_eq!(arch.pointer_size_for_class(9), 4);
    }

    #[test]
    fn builtin_overrides_object_pointer_size() {
        let table = ArchTable::builtin();
        let arch = table.config_for(&machine("msp430", 4));
        assert_eq!(arch.pointer_size, 2);
        let unknown = table.config_for(&machine("xtensa", 4));
        assert_eq!(unknown.pointer_size, 4);
        assert!(unknown.address_classes.is_empty());
    }

    #[test]
    fn yaml_layers_over_builtin() {
        let table = ArchTable::from_yaml_str(
            r#"
machines:
  MSP430:
    pointer_size: 2
    address_classes: [0, 2, 4]
  c28x:
    pointer_size: 4
"#,
        )
        .expect("valid config");

        let msp = table.config_for(&machine("msp430", 2));
        assert_eq!(msp.address_classes, vec![0, 2, 4]);
        assert_eq!(table.config_for(&machine("c28x", 2)).pointer_size, 4);
        assert_eq!(table.config_for(&machine("x86_64", 8)).pointer_size, 8);
    }

    #[test]
    fn invalid_sizes_are_rejected() {
        let err = ArchTable::from_yaml_str("machines:\n  odd:\n    pointer_size: 3\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = ArchTable::from_yaml_str("machines:\n  odd:\n    address_classes: [0, 5]\n")
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        let err = ArchTable::from_yaml_str("machines: [").unwrap_err();
        assert!(matches!(err, Error::Yaml(_)));
    }
}
