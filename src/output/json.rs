use crate::loader::MachineInfo;
use crate::memmap::{GlobalEntry, MemoryMap};
use crate::types::MapRow;
use serde::Serialize;

#[derive(Serialize)]
struct MapOutput<'a> {
    version: &'static str,
    machine: &'a MachineInfo,
    rows: &'a [MapRow],
}

#[derive(Serialize)]
struct GlobalsOutput<'a> {
    version: &'static str,
    machine: &'a MachineInfo,
    globals: &'a [GlobalEntry],
}

pub struct JsonFormatter {
    pretty: bool,
}

impl JsonFormatter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    pub fn format_map(&self, map: &MemoryMap, machine: &MachineInfo) -> String {
        self.render(&MapOutput { version: env!("CARGO_PKG_VERSION"), machine, rows: map.rows() })
    }

    pub fn format_globals(&self, globals: &[GlobalEntry], machine: &MachineInfo) -> String {
        self.render(&GlobalsOutput { version: env!("CARGO_PKG_VERSION"), machine, globals })
    }

    fn render<T: Serialize>(&self, output: &T) -> String {
        if self.pretty {
            serde_json::to_string_pretty(output)
                .unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
        } else {
            serde_json::to_string(output).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
        }
    }
}
