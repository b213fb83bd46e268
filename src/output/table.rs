use crate::memmap::{GlobalEntry, MemoryMap};
use crate::types::MapRow;
use colored::Colorize;
use comfy_table::{Cell, Color, Table, presets::UTF8_FULL_CONDENSED};

pub struct TableFormatter {
    no_color: bool,
    /// Hex digits used for addresses.
    address_width: usize,
}

impl TableFormatter {
    pub fn new(no_color: bool, pointer_size: u64) -> Self {
        let address_width = (pointer_size.clamp(1, 8) * 2) as usize;
        Self { no_color, address_width }
    }

    pub fn format_map(&self, map: &MemoryMap, machine: &str) -> String {
        let mut output = String::new();

        let header = format!(
            "memory map ({}, {} row{})",
            machine,
            map.len(),
            if map.len() == 1 { "" } else { "s" }
        );
        output.push_str(&self.bold(&header));
        output.push_str("\n\n");

        let mut table = Table::new();
        table.load_preset(UTF8_FULL_CONDENSED);
        table.set_header(vec!["Address", "Size", "Type", "Path"]);

        let mut covered_end: Option<u64> = None;
        // Set by a row of unknown size that reaches past everything covered so
        // far; the space after it cannot be called a gap.
        let mut open_ended = false;
        for row in map.rows() {
            if let Some(end) = covered_end
                && row.address > end
            {
                if !open_ended {
                    table.add_row(self.gap_row(end, row.address - end));
                }
                open_ended = false;
            }
            table.add_row(vec![
                Cell::new(self.address(row.address)),
                Cell::new(size_cell(row)),
                Cell::new(&row.type_name),
                Cell::new(&row.path),
            ]);
            match row.end_address() {
                Some(end) => covered_end = Some(covered_end.map_or(end, |c| c.max(end))),
                None if covered_end.is_none_or(|c| row.address >= c) => {
                    open_ended = true;
                    covered_end = Some(row.address);
                }
                None => {}
            }
        }

        output.push_str(&table.to_string());
        output.push('\n');
        output
    }

    pub fn format_globals(&self, globals: &[GlobalEntry], machine: &str) -> String {
        let mut output = String::new();

        let header = format!(
            "globals ({}, {} variable{})",
            machine,
            globals.len(),
            if globals.len() == 1 { "" } else { "s" }
        );
        output.push_str(&self.bold(&header));
        output.push_str("\n\n");

        let mut table = Table::new();
        table.load_preset(UTF8_FULL_CONDENSED);
        table.set_header(vec!["Address", "Size", "Type", "Name", "Declared"]);

        for global in globals {
            let declared = match global.decl_file {
                Some(file) if global.decl_line > 0 => format!("file {}:{}", file, global.decl_line),
                Some(file) => format!("file {}", file),
                None => "?".to_string(),
            };
            table.add_row(vec![
                Cell::new(self.address(global.address)),
                Cell::new(size_text(global.byte_size)),
                Cell::new(&global.type_name),
                Cell::new(&global.name),
                Cell::new(declared),
            ]);
        }

        output.push_str(&table.to_string());
        output.push('\n');
        output
    }

    fn address(&self, address: u64) -> String {
        format!("0x{:0width$x}", address, width = self.address_width)
    }

    fn bold(&self, text: &str) -> String {
        if self.no_color { text.to_string() } else { text.bold().to_string() }
    }

    fn gap_row(&self, start: u64, size: u64) -> Vec<Cell> {
        let cells = [self.address(start), format!("[{} bytes]", size), "---".into(), "GAP".into()];
        cells
            .into_iter()
            .map(|text| {
                if self.no_color { Cell::new(text) } else { Cell::new(text).fg(Color::Yellow) }
            })
            .collect()
    }
}

fn size_cell(row: &MapRow) -> String {
    match (row.bit_size, row.bit_offset) {
        (Some(bits), Some(offset)) => format!("{}b @{}", bits, offset),
        (Some(bits), None) => format!("{}b", bits),
        _ => size_text(row.byte_size),
    }
}

fn size_text(size: Option<u64>) -> String {
    size.map_or_else(|| "?".to_string(), |size| size.to_string())
}
