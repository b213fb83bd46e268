use std::collections::BTreeMap;

use crate::types::{CompileUnitInfo, TypeFragment, TypeTag, Variable};

/// Offset-keyed fragments plus the promoted globals, filled by the walk.
///
/// Fragments refer to each other by offset only, so the table can grow while
/// earlier offsets stay valid.
#[derive(Debug, Clone, Default)]
pub struct TypeTables {
    fragments: BTreeMap<u64, TypeFragment>,
    globals: Vec<Variable>,
    units: Vec<CompileUnitInfo>,
}

impl TypeTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the fragment at `offset`, creating it if needed. An existing
    /// fragment keeps its data and gains `tag`.
    pub fn make_new_type(&mut self, offset: u64, tag: TypeTag) -> &mut TypeFragment {
        let fragment = self
            .fragments
            .entry(offset)
            .or_insert_with(|| TypeFragment::new(offset, TypeTag::empty()));
        fragment.tag |= tag;
        fragment
    }

    /// A fresh variable record owned by the caller until it is promoted.
    pub fn make_new_variable(&self, offset: u64) -> Variable {
        Variable { offset, ..Variable::default() }
    }

    /// Keeps `var` as a global when it has an address, a type and a name.
    pub fn promote_variable(&mut self, var: Variable) -> bool {
        if var.is_global() {
            self.globals.push(var);
            true
        } else {
            false
        }
    }

    pub fn add_unit(&mut self, info: CompileUnitInfo) {
        self.units.push(info);
    }

    pub fn fragment(&self, offset: u64) -> Option<&TypeFragment> {
        self.fragments.get(&offset)
    }

    pub fn fragment_mut(&mut self, offset: u64) -> Option<&mut TypeFragment> {
        self.fragments.get_mut(&offset)
    }

    pub fn fragments(&self) -> impl Iterator<Item = &TypeFragment> {
        self.fragments.values()
    }

    pub fn offsets(&self) -> impl Iterator<Item = u64> + '_ {
        self.fragments.keys().copied()
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    pub fn globals(&self) -> &[Variable] {
        &self.globals
    }

    pub fn global(&self, name: &str) -> Option<&Variable> {
        self.globals.iter().find(|v| v.name == name)
    }

    pub fn units(&self) -> &[CompileUnitInfo] {
        &self.units
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_new_type_is_idempotent() {
        let mut tables = TypeTables::new();
        tables.make_new_type(0x40, TypeTag::POINTER).byte_size = 4;
        let again = tables.make_new_type(0x40, TypeTag::CONST);
        assert_eq!(again.byte_size, 4);
        assert_eq!(again.tag, TypeTag::POINTER | TypeTag::CONST);
        assert_eq!(tables.fragment_count(), 1);
    }

    #[test]
    fn only_complete_variables_are_promoted() {
        let mut tables = TypeTables::new();

        let mut local = tables.make_new_variable(0x10);
        local.name = "tmp".into();
        local.type_ref = Some(0x40);
        assert!(!tables.promote_variable(local));

        let mut global = tables.make_new_variable(0x18);
        global.name = "counter".into();
        global.type_ref = Some(0x40);
        global.location = Some(0x2000_0000);
        assert!(tables.promote_variable(global));

        let mut anonymous = tables.make_new_variable(0x20);
        anonymous.type_ref = Some(0x40);
        anonymous.location = Some(0x2000_0004);
        assert!(!tables.promote_variable(anonymous));

        assert_eq!(tables.globals().len(), 1);
        assert_eq!(tables.global("counter").map(|v| v.offset), Some(0x18));
    }
}
