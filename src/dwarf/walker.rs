use std::collections::HashMap;

use gimli::DwTag;

use super::attrs::{Target, decode_attributes};
use super::form::FormContext;
use super::source::{DieSource, UnitEntry, UnitSection};
use super::tables::TypeTables;
use crate::arch::ArchConfig;
use crate::error::Result;
use crate::types::{CompileUnitInfo, TypeFragment, TypeTag, Variable};

/// File index assumed when a record has no `DW_AT_decl_file`.
pub const DEFAULT_DECL_FILE: u64 = 1;

/// Longest `DW_AT_specification` / `DW_AT_abstract_origin` chain followed.
const MAX_SPECIFICATION_CHAIN: usize = 8;

/// Record categories the walker knows how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DieKind {
    Variable,
    BaseType,
    UnspecifiedType,
    EnumerationType,
    Enumerator,
    StructureType,
    UnionType,
    Member,
    Inheritance,
    ArrayType,
    Subrange,
    SubroutineType,
    FormalParameter,
    ReferenceType,
    Typedef,
    ConstType,
    VolatileType,
    RestrictType,
    PointerType,
    /// Named scope; its name qualifies the variables declared inside.
    Namespace,
    /// Scopes that only contain other records: functions and blocks.
    Scope,
    Unhandled(DwTag),
}

impl DieKind {
    pub fn from_tag(tag: DwTag) -> Self {
        match tag {
            gimli::DW_TAG_variable => DieKind::Variable,
            gimli::DW_TAG_base_type => DieKind::BaseType,
            gimli::DW_TAG_unspecified_type => DieKind::UnspecifiedType,
            gimli::DW_TAG_enumeration_type => DieKind::EnumerationType,
            gimli::DW_TAG_enumerator => DieKind::Enumerator,
            gimli::DW_TAG_structure_type | gimli::DW_TAG_class_type => DieKind::StructureType,
            gimli::DW_TAG_union_type => DieKind::UnionType,
            gimli::DW_TAG_member => DieKind::Member,
            gimli::DW_TAG_inheritance => DieKind::Inheritance,
            gimli::DW_TAG_array_type => DieKind::ArrayType,
            gimli::DW_TAG_subrange_type => DieKind::Subrange,
            gimli::DW_TAG_subroutine_type => DieKind::SubroutineType,
            gimli::DW_TAG_formal_parameter => DieKind::FormalParameter,
            gimli::DW_TAG_reference_type | gimli::DW_TAG_rvalue_reference_type => {
                DieKind::ReferenceType
            }
            gimli::DW_TAG_typedef => DieKind::Typedef,
            gimli::DW_TAG_const_type => DieKind::ConstType,
            gimli::DW_TAG_volatile_type => DieKind::VolatileType,
            gimli::DW_TAG_restrict_type => DieKind::RestrictType,
            gimli::DW_TAG_pointer_type => DieKind::PointerType,
            gimli::DW_TAG_namespace => DieKind::Namespace,
            gimli::DW_TAG_subprogram | gimli::DW_TAG_lexical_block => DieKind::Scope,
            other => DieKind::Unhandled(other),
        }
    }

    /// Tag bit for records that become a type fragment on their own.
    fn type_tag(self) -> Option<TypeTag> {
        let tag = match self {
            DieKind::BaseType | DieKind::UnspecifiedType => TypeTag::BASE,
            DieKind::EnumerationType => TypeTag::ENUM,
            DieKind::Enumerator => TypeTag::ENUMERATOR,
            DieKind::StructureType => TypeTag::STRUCT,
            DieKind::UnionType => TypeTag::UNION,
            DieKind::Member | DieKind::Inheritance => TypeTag::MEMBER,
            DieKind::ArrayType => TypeTag::ARRAY,
            DieKind::SubroutineType => TypeTag::FUNC,
            DieKind::FormalParameter => TypeTag::PARAMETER,
            DieKind::ReferenceType => TypeTag::REFERENCE,
            DieKind::Typedef => TypeTag::TYPEDEF,
            DieKind::ConstType => TypeTag::CONST,
            DieKind::VolatileType => TypeTag::VOLATILE,
            DieKind::RestrictType => TypeTag::RESTRICT,
            DieKind::PointerType => TypeTag::POINTER,
            DieKind::Variable
            | DieKind::Subrange
            | DieKind::Namespace
            | DieKind::Scope
            | DieKind::Unhandled(_) => {
                return None;
            }
        };
        Some(tag)
    }
}

/// Knobs for the walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkOptions {
    /// Lower bound assumed for subranges that only state an upper bound.
    /// The DWARF default is language dependent, so none is assumed unless set.
    pub default_lower_bound: Option<u64>,
    /// Take the lower bound from the unit's `DW_AT_language` when the
    /// language has a defined default. Wins over `default_lower_bound`.
    pub language_lower_bound: bool,
}

/// Depth-first walk over every unit of a [`DieSource`], filling a [`TypeTables`].
pub struct DieWalker<'s, S: DieSource> {
    source: &'s S,
    arch: &'s ArchConfig,
    options: WalkOptions,
    tables: TypeTables,
    /// Language default lower bound of the unit being walked.
    unit_lower_bound: Option<u64>,
    /// Enclosing namespace and struct names.
    scope: Vec<String>,
    /// Variable records that were not promoted, by offset. Definitions that
    /// only carry a location take their name and type from these.
    declarations: HashMap<u64, Variable>,
    pending: Vec<Variable>,
}

impl<'s, S: DieSource> DieWalker<'s, S> {
    pub fn new(source: &'s S, arch: &'s ArchConfig, options: WalkOptions) -> Self {
        Self {
            source,
            arch,
            options,
            tables: TypeTables::new(),
            unit_lower_bound: None,
            scope: Vec::new(),
            declarations: HashMap::new(),
            pending: Vec::new(),
        }
    }

    /// Walks `.debug_info` units, then `.debug_types` units. A reader failure
    /// aborts the walk and is returned.
    pub fn run(mut self) -> Result<TypeTables> {
        for section in [UnitSection::Info, UnitSection::Types] {
            for unit in self.source.units(section)? {
                self.walk_unit(&unit)?;
            }
        }
        self.link_specifications();
        tracing::debug!(
            fragments = self.tables.fragment_count(),
            globals = self.tables.globals().len(),
            "walk complete"
        );
        Ok(self.tables)
    }

    fn walk_unit(&mut self, unit: &UnitEntry<S::Die>) -> Result<()> {
        let _span = tracing::debug_span!("unit", offset = unit.header.unit_offset).entered();
        let cx = FormContext::new(unit.base_offset);

        let mut info = CompileUnitInfo::new(unit.header.clone(), unit.base_offset);
        let attrs = self.source.attributes(unit.root)?;
        decode_attributes(&attrs, &mut Target::Unit(&mut info), &cx);
        self.unit_lower_bound = match info.language {
            Some(language) if self.options.language_lower_bound => language_lower_bound(language),
            _ => None,
        };
        self.tables.add_unit(info);

        for child in self.source.children(unit.root)? {
            self.visit(child, &cx)?;
        }
        Ok(())
    }

    fn visit(&mut self, die: S::Die, cx: &FormContext) -> Result<()> {
        let kind = DieKind::from_tag(self.source.tag(die)?);
        match kind {
            DieKind::Variable => self.read_variable(die, cx),
            DieKind::EnumerationType => {
                self.read_with_children(die, TypeTag::ENUM, cx, &[DieKind::Enumerator])
            }
            DieKind::StructureType | DieKind::UnionType => {
                let tag = kind.type_tag().unwrap_or_default();
                self.read_with_children(die, tag, cx, &[DieKind::Member, DieKind::Inheritance])
            }
            DieKind::SubroutineType => {
                self.read_with_children(die, TypeTag::FUNC, cx, &[DieKind::FormalParameter])
            }
            DieKind::ArrayType => self.read_array(die, cx),
            DieKind::PointerType => self.read_pointer(die, cx).map(drop),
            DieKind::BaseType
            | DieKind::UnspecifiedType
            | DieKind::ReferenceType
            | DieKind::Typedef
            | DieKind::ConstType
            | DieKind::VolatileType
            | DieKind::RestrictType => {
                let tag = kind.type_tag().unwrap_or_default();
                self.read_type(die, tag, cx).map(drop)
            }
            DieKind::Namespace => {
                let attrs = self.source.attributes(die)?;
                let mut info = TypeFragment::default();
                decode_attributes(&attrs, &mut Target::Type(&mut info), cx);
                self.visit_scope(die, info.name, cx)
            }
            DieKind::Scope => self.visit_scope(die, None, cx),
            DieKind::Member
            | DieKind::Inheritance
            | DieKind::Enumerator
            | DieKind::Subrange
            | DieKind::FormalParameter => {
                tracing::trace!(?kind, "record outside its parent, skipped");
                Ok(())
            }
            DieKind::Unhandled(tag) => {
                tracing::debug!(%tag, offset = self.source.offset(die), "unimplemented tag");
                Ok(())
            }
        }
    }

    fn visit_scope(&mut self, die: S::Die, name: Option<String>, cx: &FormContext) -> Result<()> {
        let named = name.is_some();
        self.scope.extend(name);
        for child in self.source.children(die)? {
            self.visit(child, cx)?;
        }
        if named {
            self.scope.pop();
        }
        Ok(())
    }

    fn qualify(&self, name: &str) -> String {
        if self.scope.is_empty() {
            name.to_string()
        } else {
            format!("{}::{}", self.scope.join("::"), name)
        }
    }

    fn read_type(&mut self, die: S::Die, tag: TypeTag, cx: &FormContext) -> Result<u64> {
        let offset = self.source.offset(die);
        let attrs = self.source.attributes(die)?;
        let fragment = self.tables.make_new_type(offset, tag);
        decode_attributes(&attrs, &mut Target::Type(fragment), cx);
        fragment.decl.file.get_or_insert(DEFAULT_DECL_FILE);
        Ok(offset)
    }

    fn read_pointer(&mut self, die: S::Die, cx: &FormContext) -> Result<u64> {
        let offset = self.read_type(die, TypeTag::POINTER, cx)?;
        if let Some(fragment) = self.tables.fragment_mut(offset)
            && let Some(class) = fragment.address_class
        {
            fragment.byte_size = self.arch.pointer_size_for_class(class);
        }
        Ok(offset)
    }

    /// Reads a composite type and registers the children of the listed kinds
    /// in its child list. Other children are visited as ordinary records.
    fn read_with_children(
        &mut self,
        die: S::Die,
        tag: TypeTag,
        cx: &FormContext,
        listed: &[DieKind],
    ) -> Result<()> {
        let offset = self.read_type(die, tag, cx)?;
        let scope_name = if tag.intersects(TypeTag::STRUCT | TypeTag::UNION) {
            self.tables.fragment(offset).and_then(|f| f.name.clone())
        } else {
            None
        };
        let named = scope_name.is_some();
        self.scope.extend(scope_name);

        for child in self.source.children(die)? {
            let kind = DieKind::from_tag(self.source.tag(child)?);
            if listed.contains(&kind) {
                let child_tag = kind.type_tag().unwrap_or_default();
                let child_offset = self.read_type(child, child_tag, cx)?;
                if kind == DieKind::Member && self.record_static_member(child_offset) {
                    continue;
                }
                if let Some(parent) = self.tables.fragment_mut(offset) {
                    parent.children.push(child_offset);
                }
            } else if kind == DieKind::Unhandled(gimli::DW_TAG_unspecified_parameters) {
                continue;
            } else {
                self.visit(child, cx)?;
            }
        }

        if named {
            self.scope.pop();
        }
        Ok(())
    }

    /// A member that is only a declaration is a static data member: it takes
    /// no space in the layout and is defined elsewhere through
    /// `DW_AT_specification`.
    fn record_static_member(&mut self, offset: u64) -> bool {
        let Some(member) = self.tables.fragment(offset).filter(|f| f.declaration) else {
            return false;
        };
        let var = Variable {
            offset,
            name: member.name.as_deref().map(|name| self.qualify(name)).unwrap_or_default(),
            decl: member.decl,
            type_ref: member.type_ref,
            declaration: true,
            ..Variable::default()
        };
        self.declarations.insert(offset, var);
        true
    }

    fn read_array(&mut self, die: S::Die, cx: &FormContext) -> Result<()> {
        let offset = self.read_type(die, TypeTag::ARRAY, cx)?;

        let mut dimensions = Vec::new();
        let mut last = None;
        for child in self.source.children(die)? {
            let kind = DieKind::from_tag(self.source.tag(child)?);
            if kind != DieKind::Subrange {
                self.visit(child, cx)?;
                continue;
            }
            let attrs = self.source.attributes(child)?;
            let mut subrange = TypeFragment::default();
            decode_attributes(&attrs, &mut Target::Type(&mut subrange), cx);
            dimensions.push(self.subrange_count(&subrange));
            last = Some(subrange);
        }

        let Some(fragment) = self.tables.fragment_mut(offset) else {
            return Ok(());
        };
        if let Some(subrange) = last {
            fragment.upper_bound = subrange.upper_bound;
            fragment.lower_bound = subrange.lower_bound;
        }
        if !dimensions.is_empty() {
            // Every dimension must be known for the element count to be.
            fragment.count = dimensions
                .into_iter()
                .try_fold(1u64, |acc, dim| dim.and_then(|d| acc.checked_mul(d)));
        }
        Ok(())
    }

    fn subrange_count(&self, subrange: &TypeFragment) -> Option<u64> {
        if let Some(count) = subrange.count {
            return Some(count);
        }
        let upper = subrange.upper_bound?;
        let lower = subrange
            .lower_bound
            .or(self.unit_lower_bound)
            .or(self.options.default_lower_bound)?;
        upper.checked_sub(lower).map(|span| span + 1)
    }

    fn read_variable(&mut self, die: S::Die, cx: &FormContext) -> Result<()> {
        let offset = self.source.offset(die);
        let attrs = self.source.attributes(die)?;
        let mut var = self.tables.make_new_variable(offset);
        decode_attributes(&attrs, &mut Target::Variable(&mut var), cx);
        var.decl.file.get_or_insert(DEFAULT_DECL_FILE);
        if !var.name.is_empty() {
            var.name = self.qualify(&var.name);
        }

        if var.is_global() {
            self.tables.promote_variable(var);
        } else if var.specification.is_some() {
            self.declarations.insert(offset, var.clone());
            self.pending.push(var);
        } else {
            tracing::trace!(name = %var.name, offset, "variable not promoted");
            self.declarations.insert(offset, var);
        }
        Ok(())
    }

    /// Fills definitions that only carry a location with the name, type and
    /// declaration coordinates of the record they complete, then promotes them.
    fn link_specifications(&mut self) {
        for mut var in std::mem::take(&mut self.pending) {
            let mut target = var.specification;
            for _ in 0..MAX_SPECIFICATION_CHAIN {
                let Some(decl) = target.and_then(|offset| self.declarations.get(&offset)) else {
                    break;
                };
                if var.name.is_empty() {
                    var.name = decl.name.clone();
                }
                if var.type_ref.is_none() {
                    var.type_ref = decl.type_ref;
                }
                if var.decl.line == 0 {
                    var.decl = decl.decl;
                }
                var.external |= decl.external;
                target = decl.specification;
            }

            let offset = var.offset;
            let name = var.name.clone();
            if !self.tables.promote_variable(var) {
                tracing::trace!(%name, offset, "definition not promoted");
            }
        }
    }
}

/// Default lower bound of array subranges for a `DW_LANG_*` code.
fn language_lower_bound(language: u64) -> Option<u64> {
    let language = gimli::DwLang(u16::try_from(language).ok()?);
    language.default_lower_bound().map(|bound| bound as u64)
}
