use std::collections::HashMap;
use std::rc::Rc;

use super::tables::TypeTables;
use crate::arch::ArchConfig;
use crate::error::{Error, Result};
use crate::types::{MergedType, TypeFragment, TypeTag};

#[derive(Debug, Clone)]
enum Slot {
    Resolving,
    Resolved(Rc<MergedType>),
}

/// Merges chains of type fragments into resolved descriptors, memoized per offset.
pub struct TypeAggregator<'t> {
    tables: &'t TypeTables,
    arch: &'t ArchConfig,
    cache: HashMap<u64, Slot>,
}

impl<'t> TypeAggregator<'t> {
    pub fn new(tables: &'t TypeTables, arch: &'t ArchConfig) -> Self {
        Self { tables, arch, cache: HashMap::new() }
    }

    pub fn tables(&self) -> &'t TypeTables {
        self.tables
    }

    pub fn arch(&self) -> &'t ArchConfig {
        self.arch
    }

    /// Resolves the fragment at `offset`. Repeated calls hand back the same
    /// shared descriptor. An offset with no fragment yields an empty descriptor.
    pub fn resolve(&mut self, offset: u64) -> Result<Rc<MergedType>> {
        match self.cache.get(&offset) {
            Some(Slot::Resolved(merged)) => return Ok(Rc::clone(merged)),
            Some(Slot::Resolving) => return Err(Error::TypeCycle { offset }),
            None => {}
        }

        let tables = self.tables;
        let Some(fragment) = tables.fragment(offset) else {
            tracing::trace!(offset, "no fragment at offset");
            let empty = Rc::new(MergedType::empty(offset));
            self.cache.insert(offset, Slot::Resolved(Rc::clone(&empty)));
            return Ok(empty);
        };

        self.cache.insert(offset, Slot::Resolving);
        let merged = match self.merge(fragment) {
            Ok(merged) => Rc::new(merged),
            Err(e) => {
                self.cache.remove(&offset);
                return Err(e);
            }
        };
        self.cache.insert(offset, Slot::Resolved(Rc::clone(&merged)));
        Ok(merged)
    }

    /// Resolves every fragment in the tables; returns how many were resolved.
    pub fn resolve_all(&mut self) -> Result<usize> {
        let tables = self.tables;
        for offset in tables.offsets() {
            self.resolve(offset)?;
        }
        Ok(tables.fragment_count())
    }

    /// A previously resolved descriptor, without resolving.
    pub fn get(&self, offset: u64) -> Option<Rc<MergedType>> {
        match self.cache.get(&offset) {
            Some(Slot::Resolved(merged)) => Some(Rc::clone(merged)),
            _ => None,
        }
    }

    fn merge(&mut self, fragment: &TypeFragment) -> Result<MergedType> {
        let mut merged = match fragment.type_ref {
            Some(target) => {
                let base = self.resolve(target)?;
                MergedType { sub_info: None, ..(*base).clone() }
            }
            None => MergedType::default(),
        };
        merged.offset = fragment.offset;
        merged.tag |= fragment.tag;

        self.overlay(&mut merged, fragment);
        self.finish(&mut merged);
        Ok(merged)
    }

    fn overlay(&self, merged: &mut MergedType, fragment: &TypeFragment) {
        let tag = fragment.tag;

        if tag.intersects(TypeTag::BASE | TypeTag::ENUM) {
            fill_name(merged, fragment);
            fill_size(merged, fragment.byte_size);
            if tag.contains(TypeTag::BASE) && merged.encoding == 0 {
                merged.encoding = fragment.encoding;
            }
        }
        if tag.contains(TypeTag::FUNC) {
            fill_name(merged, fragment);
            fill_size(merged, fragment.byte_size);
            fill_children(merged, fragment);
        }
        if tag.intersects(TypeTag::TYPEDEF | TypeTag::ENUMERATOR) {
            fill_name(merged, fragment);
        }
        if tag.intersects(TypeTag::STRUCT | TypeTag::UNION) {
            fill_name(merged, fragment);
            fill_size(merged, fragment.byte_size);
            fill_children(merged, fragment);
        }
        if tag.contains(TypeTag::ARRAY) {
            fill_name(merged, fragment);
            if merged.count == 0 {
                merged.count = fragment.count.unwrap_or(0);
            }
        }
        if tag.contains(TypeTag::POINTER) {
            merged.byte_size = match fragment.address_class {
                Some(class) => self.arch.pointer_size_for_class(class),
                None if fragment.byte_size != 0 => fragment.byte_size,
                None => self.arch.pointer_size,
            };
            if merged.address_class.is_none() {
                merged.address_class = fragment.address_class;
            }
            merged.pointer_depth += 1;
            // The array below this pointer is the pointee, not part of the object.
            if merged.tag.contains(TypeTag::ARRAY) {
                merged.array_pointer_depth += 1;
            }
        }
        if tag.contains(TypeTag::REFERENCE) {
            merged.byte_size =
                if fragment.byte_size != 0 { fragment.byte_size } else { self.arch.pointer_size };
        }
        if tag.intersects(TypeTag::MEMBER | TypeTag::PARAMETER) {
            if merged.bit_size == 0 {
                merged.bit_size = fragment.bit_size;
            }
            if merged.bit_offset == 0 {
                merged.bit_offset = fragment.bit_offset;
            }
        }
        merged.is_const |= tag.contains(TypeTag::CONST);
        merged.is_restrict |= tag.contains(TypeTag::RESTRICT);
        merged.is_volatile |= tag.contains(TypeTag::VOLATILE);

        if tag.is_empty() {
            tracing::debug!(offset = fragment.offset, "fragment without a type tag");
        }
    }

    fn finish(&self, merged: &mut MergedType) {
        if merged.name.is_empty() {
            merged.name = "void".to_string();
            merged.anonymous = true;
            if merged.byte_size == 0 {
                merged.byte_size = self.arch.pointer_size;
            }
        }
        if merged.tag == TypeTag::FUNCTION_POINTER && merged.byte_size == 0 {
            merged.byte_size = self.arch.pointer_size;
        }
        if merged.is_array() {
            let mut element = merged.clone();
            element.tag.remove(TypeTag::ARRAY);
            element.count = 0;
            element.sub_info = None;
            merged.sub_info = Some(Rc::new(element));
        }
    }
}

fn fill_name(merged: &mut MergedType, fragment: &TypeFragment) {
    // A placeholder `void` from an anonymous link still counts as unnamed.
    if (merged.name.is_empty() || merged.anonymous)
        && let Some(name) = &fragment.name
    {
        merged.name = name.clone();
        merged.anonymous = false;
    }
}

fn fill_size(merged: &mut MergedType, size: u64) {
    if merged.byte_size == 0 {
        merged.byte_size = size;
    }
}

fn fill_children(merged: &mut MergedType, fragment: &TypeFragment) {
    if merged.children.is_empty() {
        merged.children = fragment.children.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dwarf::memory::MemorySource;
    use crate::dwarf::source::UnitSection;
    use crate::dwarf::walker::{DieWalker, WalkOptions};

    fn arch() -> ArchConfig {
        ArchConfig::new("test", 4)
    }

    fn base(tables: &mut TypeTables, offset: u64, name: &str, size: u64) {
        let f = tables.make_new_type(offset, TypeTag::BASE);
        f.name = Some(name.to_string());
        f.byte_size = size;
    }

    fn link(tables: &mut TypeTables, offset: u64, tag: TypeTag, target: u64) {
        tables.make_new_type(offset, tag).type_ref = Some(target);
    }

    #[test]
    fn resolving_twice_returns_the_same_descriptor() {
        let mut tables = TypeTables::new();
        base(&mut tables, 0x10, "int", 4);
        link(&mut tables, 0x20, TypeTag::CONST, 0x10);
        let arch = arch();
        let mut agg = TypeAggregator::new(&tables, &arch);

        let first = agg.resolve(0x20).unwrap();
        let second = agg.resolve(0x20).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert!(Rc::ptr_eq(&first, &agg.get(0x20).unwrap()));
    }

    #[test]
    fn pointer_depth_counts_the_chain() {
        let mut tables = TypeTables::new();
        base(&mut tables, 0x10, "char", 1);
        let mut target = 0x10;
        for level in 1..=3u64 {
            let offset = 0x10 + level * 0x10;
            link(&mut tables, offset, TypeTag::POINTER, target);
            target = offset;
        }
        let arch = arch();
        let mut agg = TypeAggregator::new(&tables, &arch);

        let merged = agg.resolve(target).unwrap();
        assert_eq!(merged.pointer_depth, 3);
        assert_eq!(merged.byte_size, 4);
        assert_eq!(merged.name, "char");
        assert_eq!(merged.display_name(), "char ***");
    }

    #[test]
    fn empty_fragment_is_void() {
        let mut tables = TypeTables::new();
        tables.make_new_type(0x10, TypeTag::empty());
        let arch = arch();
        let mut agg = TypeAggregator::new(&tables, &arch);

        let merged = agg.resolve(0x10).unwrap();
        assert!(merged.tag.is_empty());
        assert_eq!(merged.name, "void");
        assert_eq!(merged.byte_size, 4);
    }

    #[test]
    fn void_pointer() {
        let mut tables = TypeTables::new();
        tables.make_new_type(0x10, TypeTag::POINTER).byte_size = 8;
        let arch = arch();
        let mut agg = TypeAggregator::new(&tables, &arch);

        let merged = agg.resolve(0x10).unwrap();
        assert_eq!(merged.name, "void");
        assert_eq!(merged.byte_size, 8);
        assert_eq!(merged.display_name(), "void *");
    }

    #[test]
    fn missing_offset_is_an_empty_descriptor() {
        let tables = TypeTables::new();
        let arch = arch();
        let mut agg = TypeAggregator::new(&tables, &arch);

        let merged = agg.resolve(0x99).unwrap();
        assert_eq!(*merged, MergedType::empty(0x99));
        assert!(Rc::ptr_eq(&merged, &agg.resolve(0x99).unwrap()));
    }

    #[test]
    fn array_has_element_descriptor() {
        let mut tables = TypeTables::new();
        base(&mut tables, 0x10, "short", 2);
        link(&mut tables, 0x20, TypeTag::ARRAY, 0x10);
        tables.fragment_mut(0x20).unwrap().count = Some(5);
        let arch = arch();
        let mut agg = TypeAggregator::new(&tables, &arch);

        let merged = agg.resolve(0x20).unwrap();
        assert_eq!(merged.count, 5);
        assert_eq!(merged.total_size(), Some(10));
        let element = merged.sub_info.as_ref().expect("element descriptor");
        assert_eq!(element.tag, merged.tag - TypeTag::ARRAY);
        assert_eq!(element.count, 0);
        assert_eq!(element.byte_size, 2);
        assert!(element.sub_info.is_none());
    }

    #[test]
    fn qualifiers_are_monotonic() {
        // const -> volatile -> int and volatile -> const -> int
        let mut tables = TypeTables::new();
        base(&mut tables, 0x10, "int", 4);
        link(&mut tables, 0x20, TypeTag::VOLATILE, 0x10);
        link(&mut tables, 0x30, TypeTag::CONST, 0x20);
        link(&mut tables, 0x40, TypeTag::CONST, 0x10);
        link(&mut tables, 0x50, TypeTag::VOLATILE, 0x40);
        link(&mut tables, 0x60, TypeTag::POINTER, 0x50);
        let arch = arch();
        let mut agg = TypeAggregator::new(&tables, &arch);

        for offset in [0x30, 0x50, 0x60] {
            let merged = agg.resolve(offset).unwrap();
            assert!(merged.is_const, "offset {:#x}", offset);
            assert!(merged.is_volatile, "offset {:#x}", offset);
        }
        assert!(!agg.resolve(0x20).unwrap().is_const);
    }

    #[test]
    fn restrict_accumulates_through_the_chain() {
        // restrict -> const -> pointer -> int
        let mut tables = TypeTables::new();
        base(&mut tables, 0x10, "int", 4);
        link(&mut tables, 0x20, TypeTag::POINTER, 0x10);
        link(&mut tables, 0x30, TypeTag::CONST, 0x20);
        link(&mut tables, 0x40, TypeTag::RESTRICT, 0x30);
        link(&mut tables, 0x50, TypeTag::VOLATILE, 0x40);
        let arch = arch();
        let mut agg = TypeAggregator::new(&tables, &arch);

        assert!(!agg.resolve(0x30).unwrap().is_restrict);
        for offset in [0x40, 0x50] {
            let merged = agg.resolve(offset).unwrap();
            assert!(merged.is_restrict, "offset {:#x}", offset);
            assert!(merged.is_const);
            assert!(merged.display_name().contains(" restrict"));
        }
        assert_eq!(agg.resolve(0x40).unwrap().display_name(), "const int * restrict");
    }

    #[test]
    fn pointer_to_array_is_pointer_sized() {
        // int (*)[4]
        let mut tables = TypeTables::new();
        base(&mut tables, 0x10, "int", 4);
        link(&mut tables, 0x20, TypeTag::ARRAY, 0x10);
        tables.fragment_mut(0x20).unwrap().count = Some(4);
        link(&mut tables, 0x30, TypeTag::POINTER, 0x20);
        let arch = arch();
        let mut agg = TypeAggregator::new(&tables, &arch);

        let merged = agg.resolve(0x30).unwrap();
        assert!(merged.is_pointer());
        assert!(!merged.is_array());
        assert_eq!(merged.byte_size, 4);
        assert_eq!(merged.total_size(), Some(4));
        assert_eq!(merged.display_name(), "int (*)[4]");
        assert!(merged.sub_info.is_none());
    }

    #[test]
    fn array_of_pointers_keeps_its_count() {
        // int *[4]
        let mut tables = TypeTables::new();
        base(&mut tables, 0x10, "int", 4);
        link(&mut tables, 0x20, TypeTag::POINTER, 0x10);
        link(&mut tables, 0x30, TypeTag::ARRAY, 0x20);
        tables.fragment_mut(0x30).unwrap().count = Some(4);
        let arch = ArchConfig::new("test", 8);
        let mut agg = TypeAggregator::new(&tables, &arch);

        let merged = agg.resolve(0x30).unwrap();
        assert!(merged.is_array());
        assert!(!merged.is_pointer());
        assert_eq!(merged.total_size(), Some(32));
        assert_eq!(merged.display_name(), "int *[4]");
        let element = merged.sub_info.as_ref().expect("element descriptor");
        assert!(element.is_pointer());
        assert_eq!(element.total_size(), Some(8));
    }

    #[test]
    fn first_writer_wins_for_names() {
        let mut tables = TypeTables::new();
        let s = tables.make_new_type(0x10, TypeTag::STRUCT);
        s.byte_size = 12;
        link(&mut tables, 0x20, TypeTag::TYPEDEF, 0x10);
        tables.fragment_mut(0x20).unwrap().name = Some("config_t".into());
        let arch = arch();
        let mut agg = TypeAggregator::new(&tables, &arch);

        let merged = agg.resolve(0x20).unwrap();
        assert_eq!(merged.name, "config_t");
        assert_eq!(merged.byte_size, 12);
        assert_eq!(merged.tag, TypeTag::STRUCT | TypeTag::TYPEDEF);
        assert_eq!(merged.display_name(), "config_t");
    }

    #[test]
    fn function_pointer_gets_pointer_size() {
        let mut tables = TypeTables::new();
        tables.make_new_type(0x10, TypeTag::FUNC);
        link(&mut tables, 0x20, TypeTag::POINTER, 0x10);
        let arch = ArchConfig::new("test", 2);
        let mut agg = TypeAggregator::new(&tables, &arch);

        let merged = agg.resolve(0x20).unwrap();
        assert_eq!(merged.tag, TypeTag::FUNCTION_POINTER);
        assert_eq!(merged.byte_size, 2);
    }

    #[test]
    fn pointer_address_class() {
        let mut tables = TypeTables::new();
        base(&mut tables, 0x10, "int", 2);
        link(&mut tables, 0x20, TypeTag::POINTER, 0x10);
        tables.fragment_mut(0x20).unwrap().address_class = Some(2);
        let arch = ArchConfig::new("msp430", 2).with_address_classes(vec![0, 2, 4]);
        let mut agg = TypeAggregator::new(&tables, &arch);

        let merged = agg.resolve(0x20).unwrap();
        assert_eq!(merged.byte_size, 4);
        assert_eq!(merged.address_class, Some(2));
    }

    #[test]
    fn reference_cycle_is_reported() {
        let mut tables = TypeTables::new();
        link(&mut tables, 0x10, TypeTag::TYPEDEF, 0x20);
        link(&mut tables, 0x20, TypeTag::CONST, 0x10);
        let arch = arch();
        let mut agg = TypeAggregator::new(&tables, &arch);

        assert!(matches!(agg.resolve(0x10), Err(Error::TypeCycle { offset: 0x10 })));
        assert!(agg.get(0x10).is_none());
        assert!(agg.get(0x20).is_none());
    }

    #[test]
    fn resolve_all_covers_every_fragment() {
        let mut tables = TypeTables::new();
        base(&mut tables, 0x10, "int", 4);
        link(&mut tables, 0x20, TypeTag::POINTER, 0x10);
        let arch = arch();
        let mut agg = TypeAggregator::new(&tables, &arch);

        assert_eq!(agg.resolve_all().unwrap(), 2);
        assert!(agg.get(0x10).is_some());
        assert!(agg.get(0x20).is_some());
    }

    #[test]
    fn struct_with_int_and_pointer_members() {
        let mut src = MemorySource::new();
        let cu = src.add_unit(UnitSection::Info, 0, 4);
        let int = src.add_child(cu, gimli::DW_TAG_base_type);
        src.add_name(int, "int");
        src.add_udata(int, gimli::DW_AT_byte_size, 4);
        let ptr = src.add_child(cu, gimli::DW_TAG_pointer_type);
        src.add_type_ref(ptr, int);

        let s = src.add_child(cu, gimli::DW_TAG_structure_type);
        src.add_name(s, "node");
        src.add_udata(s, gimli::DW_AT_byte_size, 8);
        let a = src.add_child(s, gimli::DW_TAG_member);
        src.add_name(a, "value");
        src.add_type_ref(a, int);
        src.add_udata(a, gimli::DW_AT_data_member_location, 0);
        let b = src.add_child(s, gimli::DW_TAG_member);
        src.add_name(b, "next");
        src.add_type_ref(b, ptr);
        src.add_udata(b, gimli::DW_AT_data_member_location, 4);

        let arch = arch();
        let tables = DieWalker::new(&src, &arch, WalkOptions::default()).run().unwrap();
        let mut agg = TypeAggregator::new(&tables, &arch);

        let merged = agg.resolve(src.die_offset(s)).unwrap();
        assert_eq!(merged.display_name(), "struct node");
        assert_eq!(merged.children.len(), 2);

        let second = agg.resolve(merged.children[1]).unwrap();
        assert_eq!(second.pointer_depth, 1);
        assert_eq!(second.byte_size, 4);

        let first = agg.resolve(merged.children[0]).unwrap();
        assert_eq!(first.pointer_depth, 0);
        assert_eq!(first.name, "int");
    }
}
