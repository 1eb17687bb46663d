//! C6: recursively materializes DWARF DIEs into a typed, process-wide model.
//!
//! Generalized from the teacher's instruction-stream decoders (same
//! "decode fields off an attribute table" shape as `dwarf/cfi.rs`), applied
//! to `DW_TAG_*` type DIEs instead of CIE/FDE records. Type nodes live in
//! `Rc`s owned by [`TypeConstructor`]; equal constructions of a pointer,
//! array or primitive type return the *same* node (spec §3: "to keep
//! downstream equality cheap"), so callers can compare types by pointer.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use crate::consts::*;
use crate::die::{AttributeValue, Die, Dwarf};
use crate::error::{Error, Result};
use crate::module::{DieAddress, Index, Module, SectionId};

const MAX_RECURSION_DEPTH: usize = 1_000;

/// A bitset of `{const, volatile, restrict, atomic}` (spec §3, "Qualified
/// type").
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Default)]
pub struct Qualifiers(pub u8);

impl Qualifiers {
    pub const NONE: Qualifiers = Qualifiers(0);
    pub const CONST: u8 = 1 << 0;
    pub const VOLATILE: u8 = 1 << 1;
    pub const RESTRICT: u8 = 1 << 2;
    pub const ATOMIC: u8 = 1 << 3;

    pub fn with(self, bit: u8) -> Self {
        Qualifiers(self.0 | bit)
    }

    pub fn has(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    pub fn is_const(self) -> bool {
        self.has(Self::CONST)
    }
}

/// An immutable type node plus the qualifiers that apply to this particular
/// use of it (spec §3, "Qualified type").
#[derive(Clone)]
pub struct QualifiedType {
    pub ty: Rc<Type>,
    pub qualifiers: Qualifiers,
}

impl QualifiedType {
    /// Pointer identity of the underlying node, ignoring qualifiers; used by
    /// callers (and this module's own pointer/array caches) that need cheap
    /// structural equality (spec §3 invariant).
    pub fn node_ptr(&self) -> usize {
        Rc::as_ptr(&self.ty) as usize
    }
}

pub struct Type {
    pub kind: TypeKind,
}

pub enum TypeKind {
    Void,
    Int { size: u8, signed: bool, little_endian: bool },
    Bool { size: u8, little_endian: bool },
    Float { size: u8, little_endian: bool },
    Pointer { referenced: QualifiedType, size: u8, little_endian: bool },
    Array { element: QualifiedType, length: Option<u64> },
    Compound(CompoundType),
    Enum(EnumType),
    Typedef { name: Option<Arc<str>>, aliased: QualifiedType },
    Function(FunctionType),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CompoundKind {
    Struct,
    Union,
    Class,
}

pub struct CompoundType {
    pub kind: CompoundKind,
    pub tag_name: Option<Arc<str>>,
    pub byte_size: u64,
    pub members: Vec<Member>,
    pub template_params: Vec<TemplateParam>,
    /// `false` when the DIE carried `DW_AT_declaration` with no resolvable
    /// definition (spec §3, "struct/union/class{..., complete?}").
    pub complete: bool,
}

pub struct EnumType {
    pub tag_name: Option<Arc<str>>,
    pub underlying: QualifiedType,
    pub enumerators: Vec<Enumerator>,
    pub complete: bool,
}

#[derive(Clone)]
pub struct Enumerator {
    pub name: Arc<str>,
    pub value: i64,
}

pub struct FunctionType {
    pub return_type: QualifiedType,
    pub params: Vec<QualifiedType>,
    pub variadic: bool,
    pub template_params: Vec<TemplateParam>,
}

pub enum TemplateParam {
    Type {
        name: Option<Arc<str>>,
        ty: QualifiedType,
    },
    Value {
        name: Option<Arc<str>>,
        ty: QualifiedType,
        value: i64,
    },
}

/// A member's type, resolved lazily on first access (spec §4.6, "Member
/// type lazy resolution") to avoid O(n^2) work in mutually recursive
/// compound definitions.
struct MemberThunk {
    die: Die,
    /// Whether this member's type may legally be an incomplete array (only
    /// true for the last member of a non-union struct).
    can_be_incomplete_array: bool,
    cell: RefCell<Option<QualifiedType>>,
}

pub struct Member {
    pub name: Option<Arc<str>>,
    pub bit_offset: u64,
    pub bit_size: Option<u64>,
    thunk: MemberThunk,
}

impl Member {
    /// Forces this member's type, memoizing the result on first call.
    pub fn ty(&self, ctor: &TypeConstructor<'_, '_>) -> Result<QualifiedType> {
        if let Some(t) = self.thunk.cell.borrow().as_ref() {
            return Ok(t.clone());
        }
        let type_die = ctor.dwarf.attr(self.thunk.die, DW_AT_TYPE)?.and_then(|v| v.as_ref());
        let qt = match type_die {
            Some(d) => ctor.type_from_dwarf(d, self.thunk.can_be_incomplete_array)?.0,
            None => ctor.void_type(),
        };
        *self.thunk.cell.borrow_mut() = Some(qt.clone());
        Ok(qt)
    }
}

/// The byte size of a type, when it has one (spec §4.6.1, used both for
/// legacy bit-field offset computation and by the object materializer's
/// `bit_size = size_of(type) * 8`).
pub fn size_of(ty: &Type) -> Option<u64> {
    match &ty.kind {
        TypeKind::Void => None,
        TypeKind::Int { size, .. } | TypeKind::Bool { size, .. } | TypeKind::Float { size, .. } => Some(*size as u64),
        TypeKind::Pointer { size, .. } => Some(*size as u64),
        TypeKind::Array { element, length } => length.map(|n| n.saturating_mul(size_of_qualified(element).unwrap_or(0))),
        TypeKind::Compound(c) => Some(c.byte_size),
        TypeKind::Enum(e) => size_of_qualified(&e.underlying),
        TypeKind::Typedef { aliased, .. } => size_of_qualified(aliased),
        TypeKind::Function(_) => None,
    }
}

pub fn size_of_qualified(qt: &QualifiedType) -> Option<u64> {
    size_of(&qt.ty)
}

#[derive(Eq, PartialEq, Hash, Clone, Copy)]
enum PrimTag {
    Bool,
    Int,
    Float,
}

#[derive(Eq, PartialEq, Hash, Clone, Copy)]
struct PrimitiveKey {
    tag: PrimTag,
    size: u8,
    signed: bool,
    little_endian: bool,
}

#[derive(Eq, PartialEq, Hash, Clone, Copy)]
struct PointerKey {
    referenced: usize,
    qualifiers: u8,
    size: u8,
    little_endian: bool,
}

#[derive(Eq, PartialEq, Hash, Clone, Copy)]
struct ArrayKey {
    element: usize,
    qualifiers: u8,
    length: Option<u64>,
}

struct CacheEntry {
    ty: Rc<Type>,
    qualifiers: Qualifiers,
    is_incomplete_array: bool,
}

/// Owns every type node materialized for one module: the primitive/pointer
/// /array structural caches, the per-DIE memoization maps (spec §3, "Type
/// memoization"), and the recursion-depth counter. One instance per module
/// (spec §5: "Callers that wish to parallelize across modules must create
/// independent type-constructor ... instances per module").
pub struct TypeConstructor<'a, 'd> {
    pub dwarf: &'a Dwarf<'d>,
    pub module: &'a dyn Module,
    pub index: &'a dyn Index,
    /// Identifies this module in [`DieAddress`]s handed to `index`.
    pub module_id: u32,
    void: Rc<Type>,
    arena: RefCell<Vec<Rc<Type>>>,
    memo: RefCell<HashMap<Die, CacheEntry>>,
    memo_no_incomplete_array: RefCell<HashMap<Die, CacheEntry>>,
    primitive_cache: RefCell<HashMap<PrimitiveKey, Rc<Type>>>,
    pointer_cache: RefCell<HashMap<PointerKey, Rc<Type>>>,
    array_cache: RefCell<HashMap<ArrayKey, Rc<Type>>>,
    recursion_depth: Cell<usize>,
}

struct DepthGuard<'a>(&'a Cell<usize>);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

impl<'a, 'd> TypeConstructor<'a, 'd> {
    pub fn new(dwarf: &'a Dwarf<'d>, module: &'a dyn Module, index: &'a dyn Index, module_id: u32) -> Self {
        TypeConstructor {
            dwarf,
            module,
            index,
            module_id,
            void: Rc::new(Type { kind: TypeKind::Void }),
            arena: RefCell::new(Vec::new()),
            memo: RefCell::new(HashMap::new()),
            memo_no_incomplete_array: RefCell::new(HashMap::new()),
            primitive_cache: RefCell::new(HashMap::new()),
            pointer_cache: RefCell::new(HashMap::new()),
            array_cache: RefCell::new(HashMap::new()),
            recursion_depth: Cell::new(0),
        }
    }

    pub fn void_type(&self) -> QualifiedType {
        QualifiedType {
            ty: self.void.clone(),
            qualifiers: Qualifiers::NONE,
        }
    }

    fn intern(&self, ty: Rc<Type>) -> Rc<Type> {
        self.arena.borrow_mut().push(ty.clone());
        ty
    }

    fn memo_table(&self, can_be_incomplete_array: bool) -> &RefCell<HashMap<Die, CacheEntry>> {
        if can_be_incomplete_array {
            &self.memo
        } else {
            &self.memo_no_incomplete_array
        }
    }

    /// Resolves a `DW_AT_type`-style attribute reference on `die`, defaulting
    /// to `void` when the attribute is absent (legal for e.g. `void`
    /// pointers, `void` typedefs, and function return types).
    pub fn type_from_dwarf_attr(&self, die: Die, at: crate::consts::DwAt, can_be_incomplete_array: bool) -> Result<(QualifiedType, bool)> {
        match self.dwarf.attr(die, at)?.and_then(|v| v.as_ref()) {
            Some(d) => self.type_from_dwarf(d, can_be_incomplete_array),
            None => Ok((self.void_type(), false)),
        }
    }

    /// Entry point (spec §4.6): `type_from_dwarf(die, can_be_incomplete_array)
    /// -> (type, qualifiers, is_incomplete_array)`, returned here as
    /// `(QualifiedType, is_incomplete_array)`.
    pub fn type_from_dwarf(&self, mut die: Die, can_be_incomplete_array: bool) -> Result<(QualifiedType, bool)> {
        // 1. Follow DW_AT_signature to a type-unit definition if present.
        if let Some(AttributeValue::Signature(sig)) = self.dwarf.attr(die, DW_AT_SIGNATURE)? {
            if let Some(unit_idx) = self.dwarf.unit_by_signature(sig) {
                let unit = self.dwarf.unit(unit_idx);
                die = Die {
                    unit: unit_idx,
                    offset: unit.type_die_offset,
                };
            }
        }

        // 2. DW_AT_declaration -> consult Index for a definition, before
        // touching the memo map (design note: guards against caching a
        // declaration as if it were the definition).
        if matches!(self.dwarf.attr(die, DW_AT_DECLARATION)?, Some(AttributeValue::Flag(true))) {
            let decl_addr = DieAddress {
                module: self.module_id,
                offset: die.offset,
            };
            if let Some(def_addr) = self.index.find_definition(decl_addr) {
                if let Some(unit) = self.dwarf.unit_at_offset(SectionId::DebugInfo, def_addr.offset) {
                    die = Die {
                        unit,
                        offset: def_addr.offset,
                    };
                }
            }
        }

        // 3. Memoization (rechecked after any redirection above).
        if let Some(entry) = self.memo_table(can_be_incomplete_array).borrow().get(&die) {
            return Ok((
                QualifiedType {
                    ty: entry.ty.clone(),
                    qualifiers: entry.qualifiers,
                },
                entry.is_incomplete_array,
            ));
        }

        let depth = self.recursion_depth.get() + 1;
        if depth > MAX_RECURSION_DEPTH {
            return Err(Error::Recursion(depth));
        }
        self.recursion_depth.set(depth);
        let _guard = DepthGuard(&self.recursion_depth);

        // 4. Determine the owning CU's language (cached on the Unit itself;
        // consumed by downstream language-specific formatting that lives
        // outside this core).
        let _language = self.dwarf.language(die.unit)?;

        // 5. Dispatch by tag.
        let (qt, is_incomplete_array) = self.build(die, can_be_incomplete_array)?;

        // 6. Insert into memoization. Errors above never reach here, so a
        // failed construction never poisons the cache (spec §7).
        self.memo_table(can_be_incomplete_array).borrow_mut().insert(
            die,
            CacheEntry {
                ty: qt.ty.clone(),
                qualifiers: qt.qualifiers,
                is_incomplete_array,
            },
        );
        Ok((qt, is_incomplete_array))
    }

    fn build(&self, die: Die, can_be_incomplete_array: bool) -> Result<(QualifiedType, bool)> {
        let tag = self.dwarf.tag(die)?;
        match tag {
            DW_TAG_CONST_TYPE | DW_TAG_VOLATILE_TYPE | DW_TAG_RESTRICT_TYPE | DW_TAG_ATOMIC_TYPE => {
                let bit = match tag {
                    DW_TAG_CONST_TYPE => Qualifiers::CONST,
                    DW_TAG_VOLATILE_TYPE => Qualifiers::VOLATILE,
                    DW_TAG_RESTRICT_TYPE => Qualifiers::RESTRICT,
                    _ => Qualifiers::ATOMIC,
                };
                let (inner, incomplete) = self.type_from_dwarf_attr(die, DW_AT_TYPE, can_be_incomplete_array)?;
                Ok((
                    QualifiedType {
                        ty: inner.ty,
                        qualifiers: inner.qualifiers.with(bit),
                    },
                    incomplete,
                ))
            }
            DW_TAG_BASE_TYPE => Ok((self.base_type(die)?, false)),
            DW_TAG_STRUCTURE_TYPE | DW_TAG_UNION_TYPE | DW_TAG_CLASS_TYPE => self.compound_type(die, tag),
            DW_TAG_ENUMERATION_TYPE => self.enum_type(die),
            DW_TAG_TYPEDEF => self.typedef_type(die, can_be_incomplete_array),
            DW_TAG_POINTER_TYPE => self.pointer_type_from_die(die),
            DW_TAG_ARRAY_TYPE => self.array_type_from_die(die, can_be_incomplete_array),
            DW_TAG_SUBROUTINE_TYPE | DW_TAG_SUBPROGRAM => self.function_type_from_die(die),
            DW_TAG_UNSPECIFIED_TYPE => Ok((self.void_type(), false)),
            other => Err(Error::other(format!("unsupported DWARF type tag {:#x}", other.0))),
        }
    }

    fn endianity_override(&self, die: Die) -> Result<bool> {
        match self.dwarf.attr(die, DW_AT_ENDIANITY)?.and_then(|v| v.as_udata()) {
            Some(DW_END_LITTLE) => Ok(true),
            Some(DW_END_BIG) => Ok(false),
            _ => Ok(self.module.platform().is_little_endian()),
        }
    }

    fn base_type(&self, die: Die) -> Result<QualifiedType> {
        let encoding = self
            .dwarf
            .attr(die, DW_AT_ENCODING)?
            .and_then(|v| v.as_udata())
            .ok_or_else(|| Error::other("DW_TAG_base_type missing DW_AT_encoding"))?;
        let byte_size = self
            .dwarf
            .attr(die, DW_AT_BYTE_SIZE)?
            .and_then(|v| v.as_udata())
            .ok_or_else(|| Error::other("DW_TAG_base_type missing DW_AT_byte_size"))? as u8;
        let little_endian = self.endianity_override(die)?;
        let (tag, signed, kind) = match DwAte(encoding) {
            DW_ATE_BOOLEAN => (
                PrimTag::Bool,
                false,
                TypeKind::Bool {
                    size: byte_size,
                    little_endian,
                },
            ),
            DW_ATE_FLOAT => (
                PrimTag::Float,
                false,
                TypeKind::Float {
                    size: byte_size,
                    little_endian,
                },
            ),
            DW_ATE_SIGNED | DW_ATE_SIGNED_CHAR => (
                PrimTag::Int,
                true,
                TypeKind::Int {
                    size: byte_size,
                    signed: true,
                    little_endian,
                },
            ),
            DW_ATE_UNSIGNED | DW_ATE_UNSIGNED_CHAR | DW_ATE_ADDRESS => (
                PrimTag::Int,
                false,
                TypeKind::Int {
                    size: byte_size,
                    signed: false,
                    little_endian,
                },
            ),
            other => return Err(Error::other(format!("unsupported base type encoding {:#x} (complex-float and similar forms are out of scope)", other.0))),
        };
        let key = PrimitiveKey {
            tag,
            size: byte_size,
            signed,
            little_endian,
        };
        let ty = self.cached_primitive(key, kind);
        Ok(QualifiedType {
            ty,
            qualifiers: Qualifiers::NONE,
        })
    }

    fn cached_primitive(&self, key: PrimitiveKey, kind: TypeKind) -> Rc<Type> {
        if let Some(t) = self.primitive_cache.borrow().get(&key) {
            return t.clone();
        }
        let t = Rc::new(Type { kind });
        self.primitive_cache.borrow_mut().insert(key, t.clone());
        t
    }

    fn pointer_type(&self, referenced: QualifiedType, size: u8, little_endian: bool) -> Rc<Type> {
        let key = PointerKey {
            referenced: referenced.node_ptr(),
            qualifiers: referenced.qualifiers.0,
            size,
            little_endian,
        };
        if let Some(t) = self.pointer_cache.borrow().get(&key) {
            return t.clone();
        }
        let t = Rc::new(Type {
            kind: TypeKind::Pointer {
                referenced,
                size,
                little_endian,
            },
        });
        self.pointer_cache.borrow_mut().insert(key, t.clone());
        t
    }

    fn array_type(&self, element: QualifiedType, length: Option<u64>) -> Rc<Type> {
        let key = ArrayKey {
            element: element.node_ptr(),
            qualifiers: element.qualifiers.0,
            length,
        };
        if let Some(t) = self.array_cache.borrow().get(&key) {
            return t.clone();
        }
        let t = Rc::new(Type {
            kind: TypeKind::Array { element, length },
        });
        self.array_cache.borrow_mut().insert(key, t.clone());
        t
    }

    fn pointer_type_from_die(&self, die: Die) -> Result<(QualifiedType, bool)> {
        let (referenced, _) = self.type_from_dwarf_attr(die, DW_AT_TYPE, true)?;
        let size = self
            .dwarf
            .attr(die, DW_AT_BYTE_SIZE)?
            .and_then(|v| v.as_udata())
            .unwrap_or(self.module.platform().address_size() as u64) as u8;
        let little_endian = self.module.platform().is_little_endian();
        let ty = self.pointer_type(referenced, size, little_endian);
        Ok((
            QualifiedType {
                ty,
                qualifiers: Qualifiers::NONE,
            },
            false,
        ))
    }

    fn plus_uconst_block(&self, bytes: &[u8]) -> Result<u64> {
        let mut buf = self.dwarf.make_buffer(SectionId::DebugInfo, bytes);
        let op = buf.u8()?;
        if op != DW_OP_PLUS_UCONST {
            return Err(Error::other("unsupported DW_AT_data_member_location block form (only DW_OP_plus_uconst is)"));
        }
        let v = buf.uleb128()?;
        if !buf.at_end() {
            return Err(Error::other("unsupported DW_AT_data_member_location block form (trailing bytes)"));
        }
        Ok(v)
    }

    /// Spec §4.6.1, the member offset algorithm.
    fn member_bit_offset(&self, die: Die, bit_size: Option<u64>, little_endian: bool) -> Result<u64> {
        if let Some(v) = self.dwarf.attr(die, DW_AT_DATA_BIT_OFFSET)?.and_then(|v| v.as_udata()) {
            return Ok(v);
        }
        let mut offset = match self.dwarf.attr(die, DW_AT_DATA_MEMBER_LOCATION)? {
            Some(AttributeValue::Block(b)) | Some(AttributeValue::Exprloc(b)) => self.plus_uconst_block(b)? * 8,
            Some(v) => v.as_udata().unwrap_or(0) * 8,
            None => 0,
        };
        if let Some(legacy_bit_offset) = self.dwarf.attr(die, DW_AT_BIT_OFFSET)?.and_then(|v| v.as_udata()) {
            let byte_size = match self.dwarf.attr(die, DW_AT_BYTE_SIZE)?.and_then(|v| v.as_udata()) {
                Some(v) => v,
                None => {
                    // Realize the member's type to get its size (rare legacy
                    // DWARF<=3 bit-field path only).
                    match self.dwarf.attr(die, DW_AT_TYPE)?.and_then(|v| v.as_ref()) {
                        Some(type_die) => size_of_qualified(&self.type_from_dwarf(type_die, true)?.0).unwrap_or(0),
                        None => 0,
                    }
                }
            };
            let field_bits = bit_size.unwrap_or(byte_size * 8);
            if little_endian {
                offset += (8 * byte_size).saturating_sub(legacy_bit_offset).saturating_sub(field_bits);
            } else {
                offset += legacy_bit_offset;
            }
        }
        Ok(offset)
    }

    fn build_member(&self, die: Die, little_endian: bool, can_be_incomplete_array: bool) -> Result<Member> {
        let name = self.dwarf.attr(die, DW_AT_NAME)?.and_then(|v| v.as_str()).map(Arc::from);
        let bit_size = self.dwarf.attr(die, DW_AT_BIT_SIZE)?.and_then(|v| v.as_udata());
        let bit_offset = self.member_bit_offset(die, bit_size, little_endian)?;
        Ok(Member {
            name,
            bit_offset,
            bit_size,
            thunk: MemberThunk {
                die,
                can_be_incomplete_array,
                cell: RefCell::new(None),
            },
        })
    }

    fn build_template_param(&self, die: Die) -> Result<TemplateParam> {
        let name = self.dwarf.attr(die, DW_AT_NAME)?.and_then(|v| v.as_str()).map(Arc::from);
        let tag = self.dwarf.tag(die)?;
        let (ty, _) = self.type_from_dwarf_attr(die, DW_AT_TYPE, true)?;
        if tag == DW_TAG_TEMPLATE_VALUE_PARAMETER {
            let value = self
                .dwarf
                .attr(die, DW_AT_CONST_VALUE)?
                .and_then(|v| v.as_sdata())
                .ok_or_else(|| Error::other("template_value_parameter missing a value"))?;
            Ok(TemplateParam::Value { name, ty, value })
        } else {
            Ok(TemplateParam::Type { name, ty })
        }
    }

    fn compound_type(&self, die: Die, tag: DwTag) -> Result<(QualifiedType, bool)> {
        let kind = if tag == DW_TAG_STRUCTURE_TYPE {
            CompoundKind::Struct
        } else if tag == DW_TAG_UNION_TYPE {
            CompoundKind::Union
        } else {
            CompoundKind::Class
        };
        let tag_name = self.dwarf.attr(die, DW_AT_NAME)?.and_then(|v| v.as_str()).map(Arc::from);
        let is_declaration = matches!(self.dwarf.attr(die, DW_AT_DECLARATION)?, Some(AttributeValue::Flag(true)));
        let byte_size = self.dwarf.attr(die, DW_AT_BYTE_SIZE)?.and_then(|v| v.as_udata()).unwrap_or(0);
        let little_endian = self.module.platform().is_little_endian();

        let children: Vec<Die> = self.dwarf.children(die).collect();
        let member_children: Vec<usize> = children
            .iter()
            .enumerate()
            .filter_map(|(i, d)| match self.dwarf.tag(*d) {
                Ok(t) if t == DW_TAG_MEMBER => Some(i),
                _ => None,
            })
            .collect();
        let last_member_idx = member_children.last().copied();
        let is_union = kind == CompoundKind::Union;

        let mut members = Vec::new();
        let mut template_params = Vec::new();
        for (i, child) in children.iter().enumerate() {
            let child_tag = self.dwarf.tag(*child)?;
            if child_tag == DW_TAG_MEMBER {
                // Only the last member of a non-union struct may legally be
                // an incomplete (flexible) array (spec §4.6,
                // "Incomplete-array disambiguation").
                let can_be_incomplete_array = !is_union && Some(i) == last_member_idx;
                members.push(self.build_member(*child, little_endian, can_be_incomplete_array)?);
            } else if child_tag == DW_TAG_TEMPLATE_TYPE_PARAMETER || child_tag == DW_TAG_TEMPLATE_VALUE_PARAMETER {
                template_params.push(self.build_template_param(*child)?);
            }
        }

        let compound = CompoundType {
            kind,
            tag_name,
            byte_size,
            members,
            template_params,
            complete: !is_declaration,
        };
        let ty = self.intern(Rc::new(Type {
            kind: TypeKind::Compound(compound),
        }));
        Ok((
            QualifiedType {
                ty,
                qualifiers: Qualifiers::NONE,
            },
            false,
        ))
    }

    fn enum_type(&self, die: Die) -> Result<(QualifiedType, bool)> {
        let tag_name = self.dwarf.attr(die, DW_AT_NAME)?.and_then(|v| v.as_str()).map(Arc::from);
        let is_declaration = matches!(self.dwarf.attr(die, DW_AT_DECLARATION)?, Some(AttributeValue::Flag(true)));

        let mut enumerators = Vec::new();
        let mut any_negative = false;
        for child in self.dwarf.children(die) {
            if self.dwarf.tag(child)? == DW_TAG_ENUMERATOR {
                let name = self
                    .dwarf
                    .attr(child, DW_AT_NAME)?
                    .and_then(|v| v.as_str())
                    .map(Arc::from)
                    .ok_or_else(|| Error::other("DW_TAG_enumerator missing DW_AT_name"))?;
                let value = self.dwarf.attr(child, DW_AT_CONST_VALUE)?.and_then(|v| v.as_sdata()).unwrap_or(0);
                any_negative |= value < 0;
                enumerators.push(Enumerator { name, value });
            }
        }

        let underlying = match self.dwarf.attr(die, DW_AT_TYPE)?.and_then(|v| v.as_ref()) {
            Some(d) => self.type_from_dwarf(d, false)?.0,
            None => {
                // Synthesize a compatible integer type from byte size and
                // inferred sign (spec §4.6 dispatch table).
                let byte_size = self.dwarf.attr(die, DW_AT_BYTE_SIZE)?.and_then(|v| v.as_udata()).unwrap_or(4) as u8;
                let little_endian = self.module.platform().is_little_endian();
                let key = PrimitiveKey {
                    tag: PrimTag::Int,
                    size: byte_size,
                    signed: any_negative,
                    little_endian,
                };
                let ty = self.cached_primitive(
                    key,
                    TypeKind::Int {
                        size: byte_size,
                        signed: any_negative,
                        little_endian,
                    },
                );
                QualifiedType {
                    ty,
                    qualifiers: Qualifiers::NONE,
                }
            }
        };

        let e = EnumType {
            tag_name,
            underlying,
            enumerators,
            complete: !is_declaration,
        };
        let ty = self.intern(Rc::new(Type { kind: TypeKind::Enum(e) }));
        Ok((
            QualifiedType {
                ty,
                qualifiers: Qualifiers::NONE,
            },
            false,
        ))
    }

    fn typedef_type(&self, die: Die, can_be_incomplete_array: bool) -> Result<(QualifiedType, bool)> {
        let name = self.dwarf.attr(die, DW_AT_NAME)?.and_then(|v| v.as_str()).map(Arc::from);
        let (aliased, incomplete) = self.type_from_dwarf_attr(die, DW_AT_TYPE, can_be_incomplete_array)?;
        let ty = self.intern(Rc::new(Type {
            kind: TypeKind::Typedef { name, aliased },
        }));
        Ok((
            QualifiedType {
                ty,
                qualifiers: Qualifiers::NONE,
            },
            incomplete,
        ))
    }

    fn subrange_length(&self, die: Die) -> Result<Option<u64>> {
        if let Some(count) = self.dwarf.attr(die, DW_AT_COUNT)?.and_then(|v| v.as_udata()) {
            return Ok(Some(count));
        }
        if let Some(upper) = self.dwarf.attr(die, DW_AT_UPPER_BOUND)?.and_then(|v| v.as_udata()) {
            return Ok(Some(upper + 1));
        }
        Ok(None)
    }

    fn array_type_from_die(&self, die: Die, can_be_incomplete_array: bool) -> Result<(QualifiedType, bool)> {
        let (element, _) = self.type_from_dwarf_attr(die, DW_AT_TYPE, true)?;
        let subranges: Vec<Die> = self
            .dwarf
            .children(die)
            .filter(|d| matches!(self.dwarf.tag(*d), Ok(t) if t == DW_TAG_SUBRANGE_TYPE))
            .collect();

        if subranges.is_empty() {
            // A bare array_type with no subrange children is itself a
            // single incomplete dimension.
            return if can_be_incomplete_array {
                Ok((
                    QualifiedType {
                        ty: self.array_type(element, None),
                        qualifiers: Qualifiers::NONE,
                    },
                    true,
                ))
            } else {
                Ok((
                    QualifiedType {
                        ty: self.array_type(element, Some(0)),
                        qualifiers: Qualifiers::NONE,
                    },
                    false,
                ))
            };
        }

        // Build right-associated nested arrays: the last (innermost)
        // subrange wraps `element` first, then each outer dimension wraps
        // the previous result (spec §4.6: "build right-associated nested
        // arrays"). Only the outermost dimension may be incomplete.
        let mut current = element;
        let mut any_incomplete = false;
        for (i, sr) in subranges.iter().enumerate().rev() {
            let is_outermost = i == 0;
            let length = self.subrange_length(*sr)?;
            let length = match length {
                Some(n) => Some(n),
                None if is_outermost && can_be_incomplete_array => {
                    any_incomplete = true;
                    None
                }
                None => Some(0),
            };
            current = QualifiedType {
                ty: self.array_type(current, length),
                qualifiers: Qualifiers::NONE,
            };
        }
        Ok((current, any_incomplete))
    }

    fn function_type_from_die(&self, die: Die) -> Result<(QualifiedType, bool)> {
        let (return_type, _) = self.type_from_dwarf_attr(die, DW_AT_TYPE, true)?;
        let children: Vec<Die> = self.dwarf.children(die).collect();
        let mut params = Vec::new();
        let mut template_params = Vec::new();
        let mut variadic = false;
        for (i, child) in children.iter().enumerate() {
            let tag = self.dwarf.tag(*child)?;
            if tag == DW_TAG_FORMAL_PARAMETER {
                params.push(self.type_from_dwarf_attr(*child, DW_AT_TYPE, true)?.0);
            } else if tag == DW_TAG_UNSPECIFIED_PARAMETERS {
                if i != children.len() - 1 {
                    return Err(Error::other("DW_TAG_unspecified_parameters must be the last child"));
                }
                variadic = true;
            } else if tag == DW_TAG_TEMPLATE_TYPE_PARAMETER || tag == DW_TAG_TEMPLATE_VALUE_PARAMETER {
                template_params.push(self.build_template_param(*child)?);
            }
        }
        let f = FunctionType {
            return_type,
            params,
            variadic,
            template_params,
        };
        let ty = self.intern(Rc::new(Type { kind: TypeKind::Function(f) }));
        Ok((
            QualifiedType {
                ty,
                qualifiers: Qualifiers::NONE,
            },
            false,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualifiers_compose() {
        let q = Qualifiers::NONE.with(Qualifiers::CONST).with(Qualifiers::VOLATILE);
        assert!(q.has(Qualifiers::CONST));
        assert!(q.has(Qualifiers::VOLATILE));
        assert!(!q.has(Qualifiers::RESTRICT));
    }

    #[test]
    fn size_of_array_multiplies_element_by_length() {
        let int_ty = Rc::new(Type {
            kind: TypeKind::Int {
                size: 4,
                signed: true,
                little_endian: true,
            },
        });
        let element = QualifiedType {
            ty: int_ty,
            qualifiers: Qualifiers::NONE,
        };
        let array = Type {
            kind: TypeKind::Array {
                element,
                length: Some(10),
            },
        };
        assert_eq!(size_of(&array), Some(40));
    }

    #[test]
    fn size_of_incomplete_array_is_none() {
        let int_ty = Rc::new(Type {
            kind: TypeKind::Int {
                size: 4,
                signed: true,
                little_endian: true,
            },
        });
        let element = QualifiedType {
            ty: int_ty,
            qualifiers: Qualifiers::NONE,
        };
        let array = Type {
            kind: TypeKind::Array { element, length: None },
        };
        assert_eq!(size_of(&array), None);
    }

    fn uleb(mut v: u64) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let mut byte = (v & 0x7f) as u8;
            v >>= 7;
            if v != 0 {
                byte |= 0x80;
            }
            out.push(byte);
            if v == 0 {
                break;
            }
        }
        out
    }

    fn cstr(s: &str) -> Vec<u8> {
        let mut out = s.as_bytes().to_vec();
        out.push(0);
        out
    }

    struct FakePlatform;

    impl crate::module::Platform for FakePlatform {
        fn address_size(&self) -> u8 {
            8
        }
        fn is_little_endian(&self) -> bool {
            true
        }
        fn max_register(&self) -> u32 {
            32
        }
    }

    struct FakeModule {
        debug_info: Vec<u8>,
        debug_abbrev: Vec<u8>,
        platform: FakePlatform,
    }

    impl crate::module::Module for FakeModule {
        fn name(&self) -> &str {
            "fixture"
        }
        fn section(&self, id: SectionId) -> Option<crate::module::SectionRef<'_>> {
            match id {
                SectionId::DebugInfo => Some(crate::module::SectionRef {
                    bytes: &self.debug_info,
                    base_address: 0,
                }),
                SectionId::DebugAbbrev => Some(crate::module::SectionRef {
                    bytes: &self.debug_abbrev,
                    base_address: 0,
                }),
                _ => None,
            }
        }
        fn platform(&self) -> &dyn crate::module::Platform {
            &self.platform
        }
    }

    struct FakeIndex;

    impl Index for FakeIndex {
        fn iter_matches(&self, _namespace: &[&str], _name: &str, _tags: &[DwTag]) -> Vec<DieAddress> {
            Vec::new()
        }
        fn find_definition(&self, _decl: DieAddress) -> Option<DieAddress> {
            None
        }
    }

    /// One compile unit with a single `base_type` DIE of the given
    /// DWARF encoding/byte size, returning its offset.
    fn build_base_type_fixture(encoding: u8, byte_size: u8) -> (FakeModule, usize) {
        let mut abbrev = Vec::new();
        abbrev.extend(uleb(1));
        abbrev.extend(uleb(0x11)); // compile_unit
        abbrev.push(1); // has children
        abbrev.extend(uleb(0));
        abbrev.extend(uleb(0));

        abbrev.extend(uleb(2));
        abbrev.extend(uleb(DW_TAG_BASE_TYPE.0));
        abbrev.push(0);
        abbrev.extend(uleb(DW_AT_NAME.0));
        abbrev.extend(uleb(DW_FORM_STRING.0));
        abbrev.extend(uleb(DW_AT_ENCODING.0));
        abbrev.extend(uleb(DW_FORM_DATA1.0));
        abbrev.extend(uleb(DW_AT_BYTE_SIZE.0));
        abbrev.extend(uleb(DW_FORM_DATA1.0));
        abbrev.extend(uleb(0));
        abbrev.extend(uleb(0));
        abbrev.push(0);

        let mut info = vec![0u8; 4];
        info.extend_from_slice(&4u16.to_le_bytes());
        info.extend_from_slice(&0u32.to_le_bytes());
        info.push(8);
        info.extend(uleb(1));
        let base_offset = info.len();
        info.extend(uleb(2));
        info.extend(cstr("t"));
        info.push(encoding);
        info.push(byte_size);
        info.push(0);
        let unit_length = (info.len() - 4) as u32;
        info[0..4].copy_from_slice(&unit_length.to_le_bytes());

        (
            FakeModule {
                debug_info: info,
                debug_abbrev: abbrev,
                platform: FakePlatform,
            },
            base_offset,
        )
    }

    /// One compile unit with two sibling `member` DIEs: one carrying
    /// `DW_AT_data_bit_offset = data_bit_offset` outright, the other carrying
    /// the legacy `DW_AT_bit_offset = legacy_bit_offset` + `DW_AT_byte_size`
    /// form. Returns their offsets.
    fn build_member_fixture(data_bit_offset: u64, legacy_bit_offset: u64, byte_size: u8) -> (FakeModule, usize, usize) {
        let mut abbrev = Vec::new();
        abbrev.extend(uleb(1));
        abbrev.extend(uleb(0x11));
        abbrev.push(1);
        abbrev.extend(uleb(0));
        abbrev.extend(uleb(0));

        // 2: member, data_bit_offset(udata)
        abbrev.extend(uleb(2));
        abbrev.extend(uleb(DW_TAG_MEMBER.0));
        abbrev.push(0);
        abbrev.extend(uleb(DW_AT_DATA_BIT_OFFSET.0));
        abbrev.extend(uleb(DW_FORM_UDATA.0));
        abbrev.extend(uleb(0));
        abbrev.extend(uleb(0));

        // 3: member, bit_offset(udata) + byte_size(data1)
        abbrev.extend(uleb(3));
        abbrev.extend(uleb(DW_TAG_MEMBER.0));
        abbrev.push(0);
        abbrev.extend(uleb(DW_AT_BIT_OFFSET.0));
        abbrev.extend(uleb(DW_FORM_UDATA.0));
        abbrev.extend(uleb(DW_AT_BYTE_SIZE.0));
        abbrev.extend(uleb(DW_FORM_DATA1.0));
        abbrev.extend(uleb(0));
        abbrev.extend(uleb(0));
        abbrev.push(0);

        let mut info = vec![0u8; 4];
        info.extend_from_slice(&4u16.to_le_bytes());
        info.extend_from_slice(&0u32.to_le_bytes());
        info.push(8);
        info.extend(uleb(1));

        let member_a = info.len();
        info.extend(uleb(2));
        info.extend(uleb(data_bit_offset));

        let member_b = info.len();
        info.extend(uleb(3));
        info.extend(uleb(legacy_bit_offset));
        info.push(byte_size);

        info.push(0);
        let unit_length = (info.len() - 4) as u32;
        info[0..4].copy_from_slice(&unit_length.to_le_bytes());

        (
            FakeModule {
                debug_info: info,
                debug_abbrev: abbrev,
                platform: FakePlatform,
            },
            member_a,
            member_b,
        )
    }

    proptest::proptest! {
        /// spec §8: "calling [`type_from_dwarf`] twice returns pointer-equal
        /// results" — exercised here across the base_type/encoding/byte_size
        /// space, the cheapest tag to vary without building a whole struct.
        #[test]
        fn type_from_dwarf_memoizes_to_a_pointer_stable_node(
            encoding in proptest::sample::select(vec![DW_ATE_SIGNED.0 as u8, DW_ATE_UNSIGNED.0 as u8, DW_ATE_BOOLEAN.0 as u8]),
            byte_size in proptest::sample::select(vec![1u8, 2, 4, 8]),
        ) {
            let (module, base_offset) = build_base_type_fixture(encoding, byte_size);
            let dwarf = Dwarf::from_module(&module).unwrap();
            let index = FakeIndex;
            let ctor = TypeConstructor::new(&dwarf, &module, &index, 0);
            let die = Die { unit: 0, offset: base_offset };

            let (first, _) = ctor.type_from_dwarf(die, true).unwrap();
            let (second, _) = ctor.type_from_dwarf(die, true).unwrap();
            proptest::prop_assert!(Rc::ptr_eq(&first.ty, &second.ty));
        }

        /// spec §8: "Reading a bit field ... equals extracting bits [b, b+w)
        /// ... regardless of whether the source was emitted with
        /// `DW_AT_data_bit_offset` or `DW_AT_bit_offset`."
        #[test]
        fn member_bit_offset_agrees_across_data_bit_offset_and_legacy_forms(
            byte_size in 1u8..=8,
            raw_w in 1u64..64,
            raw_b in 0u64..64,
        ) {
            let total_bits = byte_size as u64 * 8;
            let w = 1 + (raw_w % total_bits);
            let b = raw_b % (total_bits - w + 1);
            let legacy = total_bits - b - w;

            let (module, member_a, member_b) = build_member_fixture(b, legacy, byte_size);
            let dwarf = Dwarf::from_module(&module).unwrap();
            let index = FakeIndex;
            let ctor = TypeConstructor::new(&dwarf, &module, &index, 0);

            let die_a = Die { unit: 0, offset: member_a };
            let die_b = Die { unit: 0, offset: member_b };

            let offset_a = ctor.member_bit_offset(die_a, Some(w), true).unwrap();
            let offset_b = ctor.member_bit_offset(die_b, Some(w), true).unwrap();

            proptest::prop_assert_eq!(offset_a, b);
            proptest::prop_assert_eq!(offset_a, offset_b);
        }
    }
}
