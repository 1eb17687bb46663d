//! DWARF constant tables: tags, attributes, forms, encodings and opcodes.
//!
//! These are plain `u64`/`u8` newtypes rather than a big `enum` so that
//! vendor extensions (which live outside the standard's reserved ranges)
//! round-trip without a catch-all variant swallowing them silently.

/// A DIE tag (`DW_TAG_*`).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct DwTag(pub u64);

pub const DW_TAG_ARRAY_TYPE: DwTag = DwTag(0x01);
pub const DW_TAG_ENUMERATION_TYPE: DwTag = DwTag(0x04);
pub const DW_TAG_FORMAL_PARAMETER: DwTag = DwTag(0x05);
pub const DW_TAG_LEXICAL_BLOCK: DwTag = DwTag(0x0b);
pub const DW_TAG_MEMBER: DwTag = DwTag(0x0d);
pub const DW_TAG_POINTER_TYPE: DwTag = DwTag(0x0f);
pub const DW_TAG_COMPILE_UNIT: DwTag = DwTag(0x11);
pub const DW_TAG_STRUCTURE_TYPE: DwTag = DwTag(0x13);
pub const DW_TAG_SUBROUTINE_TYPE: DwTag = DwTag(0x15);
pub const DW_TAG_TYPEDEF: DwTag = DwTag(0x16);
pub const DW_TAG_UNION_TYPE: DwTag = DwTag(0x17);
pub const DW_TAG_UNSPECIFIED_PARAMETERS: DwTag = DwTag(0x18);
pub const DW_TAG_VARIANT: DwTag = DwTag(0x19);
pub const DW_TAG_INHERITANCE: DwTag = DwTag(0x1c);
pub const DW_TAG_SUBRANGE_TYPE: DwTag = DwTag(0x21);
pub const DW_TAG_BASE_TYPE: DwTag = DwTag(0x24);
pub const DW_TAG_CONST_TYPE: DwTag = DwTag(0x26);
pub const DW_TAG_ENUMERATOR: DwTag = DwTag(0x28);
pub const DW_TAG_SUBPROGRAM: DwTag = DwTag(0x2e);
pub const DW_TAG_VARIABLE: DwTag = DwTag(0x34);
pub const DW_TAG_VOLATILE_TYPE: DwTag = DwTag(0x35);
pub const DW_TAG_RESTRICT_TYPE: DwTag = DwTag(0x37);
pub const DW_TAG_NAMESPACE: DwTag = DwTag(0x39);
pub const DW_TAG_UNSPECIFIED_TYPE: DwTag = DwTag(0x3b);
pub const DW_TAG_TEMPLATE_TYPE_PARAMETER: DwTag = DwTag(0x2f);
pub const DW_TAG_TEMPLATE_VALUE_PARAMETER: DwTag = DwTag(0x30);
pub const DW_TAG_ATOMIC_TYPE: DwTag = DwTag(0x47);
pub const DW_TAG_CLASS_TYPE: DwTag = DwTag(0x02);
pub const DW_TAG_TYPE_UNIT: DwTag = DwTag(0x41);

/// An attribute name (`DW_AT_*`).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct DwAt(pub u64);

pub const DW_AT_SIBLING: DwAt = DwAt(0x01);
pub const DW_AT_LOCATION: DwAt = DwAt(0x02);
pub const DW_AT_NAME: DwAt = DwAt(0x03);
pub const DW_AT_BYTE_SIZE: DwAt = DwAt(0x0b);
pub const DW_AT_BIT_OFFSET: DwAt = DwAt(0x0c);
pub const DW_AT_BIT_SIZE: DwAt = DwAt(0x0d);
pub const DW_AT_STMT_LIST: DwAt = DwAt(0x10);
pub const DW_AT_LOW_PC: DwAt = DwAt(0x11);
pub const DW_AT_HIGH_PC: DwAt = DwAt(0x12);
pub const DW_AT_LANGUAGE: DwAt = DwAt(0x13);
pub const DW_AT_DISCR: DwAt = DwAt(0x15);
pub const DW_AT_DISCR_VALUE: DwAt = DwAt(0x16);
pub const DW_AT_COMP_DIR: DwAt = DwAt(0x1b);
pub const DW_AT_CONST_VALUE: DwAt = DwAt(0x1c);
pub const DW_AT_UPPER_BOUND: DwAt = DwAt(0x2f);
pub const DW_AT_COUNT: DwAt = DwAt(0x37);
pub const DW_AT_DATA_MEMBER_LOCATION: DwAt = DwAt(0x38);
pub const DW_AT_DECL_FILE: DwAt = DwAt(0x3a);
pub const DW_AT_DECL_LINE: DwAt = DwAt(0x3b);
pub const DW_AT_DECLARATION: DwAt = DwAt(0x3c);
pub const DW_AT_ENCODING: DwAt = DwAt(0x3e);
pub const DW_AT_EXTERNAL: DwAt = DwAt(0x3f);
pub const DW_AT_FRAME_BASE: DwAt = DwAt(0x40);
pub const DW_AT_SPECIFICATION: DwAt = DwAt(0x47);
pub const DW_AT_TYPE: DwAt = DwAt(0x49);
pub const DW_AT_RANGES: DwAt = DwAt(0x55);
pub const DW_AT_SIGNATURE: DwAt = DwAt(0x69);
pub const DW_AT_DATA_BIT_OFFSET: DwAt = DwAt(0x6b);
pub const DW_AT_ENDIANITY: DwAt = DwAt(0x6c);
pub const DW_AT_ADDR_BASE: DwAt = DwAt(0x73);
pub const DW_AT_LOCLISTS_BASE: DwAt = DwAt(0x8c);
pub const DW_AT_RNGLISTS_BASE: DwAt = DwAt(0x74);
pub const DW_AT_STR_OFFSETS_BASE: DwAt = DwAt(0x72);
pub const DW_AT_ABSTRACT_ORIGIN: DwAt = DwAt(0x31);

/// An attribute form (`DW_FORM_*`).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct DwForm(pub u64);

pub const DW_FORM_ADDR: DwForm = DwForm(0x01);
pub const DW_FORM_BLOCK2: DwForm = DwForm(0x03);
pub const DW_FORM_BLOCK4: DwForm = DwForm(0x04);
pub const DW_FORM_DATA2: DwForm = DwForm(0x05);
pub const DW_FORM_DATA4: DwForm = DwForm(0x06);
pub const DW_FORM_DATA8: DwForm = DwForm(0x07);
pub const DW_FORM_STRING: DwForm = DwForm(0x08);
pub const DW_FORM_BLOCK: DwForm = DwForm(0x09);
pub const DW_FORM_BLOCK1: DwForm = DwForm(0x0a);
pub const DW_FORM_DATA1: DwForm = DwForm(0x0b);
pub const DW_FORM_FLAG: DwForm = DwForm(0x0c);
pub const DW_FORM_SDATA: DwForm = DwForm(0x0d);
pub const DW_FORM_STRP: DwForm = DwForm(0x0e);
pub const DW_FORM_UDATA: DwForm = DwForm(0x0f);
pub const DW_FORM_REF_ADDR: DwForm = DwForm(0x10);
pub const DW_FORM_REF1: DwForm = DwForm(0x11);
pub const DW_FORM_REF2: DwForm = DwForm(0x12);
pub const DW_FORM_REF4: DwForm = DwForm(0x13);
pub const DW_FORM_REF8: DwForm = DwForm(0x14);
pub const DW_FORM_REF_UDATA: DwForm = DwForm(0x15);
pub const DW_FORM_INDIRECT: DwForm = DwForm(0x16);
pub const DW_FORM_SEC_OFFSET: DwForm = DwForm(0x17);
pub const DW_FORM_EXPRLOC: DwForm = DwForm(0x18);
pub const DW_FORM_FLAG_PRESENT: DwForm = DwForm(0x19);
pub const DW_FORM_STRX: DwForm = DwForm(0x1a);
pub const DW_FORM_ADDRX: DwForm = DwForm(0x1b);
pub const DW_FORM_REF_SUP4: DwForm = DwForm(0x1c);
pub const DW_FORM_STRP_SUP: DwForm = DwForm(0x1d);
pub const DW_FORM_DATA16: DwForm = DwForm(0x1e);
pub const DW_FORM_LINE_STRP: DwForm = DwForm(0x1f);
pub const DW_FORM_REF_SIG8: DwForm = DwForm(0x20);
pub const DW_FORM_IMPLICIT_CONST: DwForm = DwForm(0x21);
pub const DW_FORM_LOCLISTX: DwForm = DwForm(0x22);
pub const DW_FORM_RNGLISTX: DwForm = DwForm(0x23);
pub const DW_FORM_STRX1: DwForm = DwForm(0x25);
pub const DW_FORM_STRX2: DwForm = DwForm(0x26);
pub const DW_FORM_STRX3: DwForm = DwForm(0x27);
pub const DW_FORM_STRX4: DwForm = DwForm(0x28);
pub const DW_FORM_ADDRX1: DwForm = DwForm(0x29);
pub const DW_FORM_ADDRX2: DwForm = DwForm(0x2a);
pub const DW_FORM_ADDRX3: DwForm = DwForm(0x2b);
pub const DW_FORM_ADDRX4: DwForm = DwForm(0x2c);

/// A base-type encoding (`DW_ATE_*`).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct DwAte(pub u64);

pub const DW_ATE_ADDRESS: DwAte = DwAte(0x01);
pub const DW_ATE_BOOLEAN: DwAte = DwAte(0x02);
pub const DW_ATE_FLOAT: DwAte = DwAte(0x04);
pub const DW_ATE_SIGNED: DwAte = DwAte(0x05);
pub const DW_ATE_SIGNED_CHAR: DwAte = DwAte(0x06);
pub const DW_ATE_UNSIGNED: DwAte = DwAte(0x07);
pub const DW_ATE_UNSIGNED_CHAR: DwAte = DwAte(0x08);

/// DWARF expression / location-description opcodes (`DW_OP_*`).
pub const DW_OP_ADDR: u8 = 0x03;
pub const DW_OP_DEREF: u8 = 0x06;
pub const DW_OP_CONST1U: u8 = 0x08;
pub const DW_OP_CONST1S: u8 = 0x09;
pub const DW_OP_CONST2U: u8 = 0x0a;
pub const DW_OP_CONST2S: u8 = 0x0b;
pub const DW_OP_CONST4U: u8 = 0x0c;
pub const DW_OP_CONST4S: u8 = 0x0d;
pub const DW_OP_CONST8U: u8 = 0x0e;
pub const DW_OP_CONST8S: u8 = 0x0f;
pub const DW_OP_CONSTU: u8 = 0x10;
pub const DW_OP_CONSTS: u8 = 0x11;
pub const DW_OP_DUP: u8 = 0x12;
pub const DW_OP_DROP: u8 = 0x13;
pub const DW_OP_OVER: u8 = 0x14;
pub const DW_OP_PICK: u8 = 0x15;
pub const DW_OP_SWAP: u8 = 0x16;
pub const DW_OP_ROT: u8 = 0x17;
pub const DW_OP_XDEREF: u8 = 0x18;
pub const DW_OP_ABS: u8 = 0x19;
pub const DW_OP_AND: u8 = 0x1a;
pub const DW_OP_DIV: u8 = 0x1b;
pub const DW_OP_MINUS: u8 = 0x1c;
pub const DW_OP_MOD: u8 = 0x1d;
pub const DW_OP_MUL: u8 = 0x1e;
pub const DW_OP_NEG: u8 = 0x1f;
pub const DW_OP_NOT: u8 = 0x20;
pub const DW_OP_OR: u8 = 0x21;
pub const DW_OP_PLUS: u8 = 0x22;
pub const DW_OP_PLUS_UCONST: u8 = 0x23;
pub const DW_OP_SKIP: u8 = 0x2f;
pub const DW_OP_BRA: u8 = 0x28;
pub const DW_OP_EQ: u8 = 0x29;
pub const DW_OP_GE: u8 = 0x2a;
pub const DW_OP_GT: u8 = 0x2b;
pub const DW_OP_LE: u8 = 0x2c;
pub const DW_OP_LT: u8 = 0x2d;
pub const DW_OP_NE: u8 = 0x2e;
pub const DW_OP_LIT0: u8 = 0x30;
pub const DW_OP_LIT31: u8 = 0x4f;
pub const DW_OP_REG0: u8 = 0x50;
pub const DW_OP_REG31: u8 = 0x6f;
pub const DW_OP_BREG0: u8 = 0x70;
pub const DW_OP_BREG31: u8 = 0x8f;
pub const DW_OP_REGX: u8 = 0x90;
pub const DW_OP_FBREG: u8 = 0x91;
pub const DW_OP_BREGX: u8 = 0x92;
pub const DW_OP_PIECE: u8 = 0x93;
pub const DW_OP_DEREF_SIZE: u8 = 0x94;
pub const DW_OP_XDEREF_SIZE: u8 = 0x95;
pub const DW_OP_NOP: u8 = 0x96;
pub const DW_OP_PUSH_OBJECT_ADDRESS: u8 = 0x97;
pub const DW_OP_CALL2: u8 = 0x98;
pub const DW_OP_CALL4: u8 = 0x99;
pub const DW_OP_CALL_REF: u8 = 0x9a;
pub const DW_OP_CALL_FRAME_CFA: u8 = 0x9c;
pub const DW_OP_BIT_PIECE: u8 = 0x9d;
pub const DW_OP_IMPLICIT_VALUE: u8 = 0x9e;
pub const DW_OP_STACK_VALUE: u8 = 0x9f;
pub const DW_OP_ADDRX: u8 = 0xa1;
pub const DW_OP_CONSTX: u8 = 0xa2;

/// EH-frame pointer-encoding application (`DW_EH_PE_*`), upper nibble.
pub const DW_EH_PE_ABSPTR: u8 = 0x00;
pub const DW_EH_PE_PCREL: u8 = 0x10;
pub const DW_EH_PE_TEXTREL: u8 = 0x20;
pub const DW_EH_PE_DATAREL: u8 = 0x30;
pub const DW_EH_PE_FUNCREL: u8 = 0x40;
pub const DW_EH_PE_ALIGNED: u8 = 0x50;

/// EH-frame pointer-encoding value format, lower nibble.
pub const DW_EH_PE_PTR: u8 = 0x00;
pub const DW_EH_PE_ULEB128: u8 = 0x01;
pub const DW_EH_PE_UDATA2: u8 = 0x02;
pub const DW_EH_PE_UDATA4: u8 = 0x03;
pub const DW_EH_PE_UDATA8: u8 = 0x04;
pub const DW_EH_PE_SLEB128: u8 = 0x09;
pub const DW_EH_PE_SDATA2: u8 = 0x0a;
pub const DW_EH_PE_SDATA4: u8 = 0x0b;
pub const DW_EH_PE_SDATA8: u8 = 0x0c;
pub const DW_EH_PE_OMIT: u8 = 0xff;
pub const DW_EH_PE_INDIRECT: u8 = 0x80;

/// Call-frame instructions (`DW_CFA_*`). Top two bits select the
/// "packed operand" instructions; the rest are extended opcodes.
pub const DW_CFA_ADVANCE_LOC: u8 = 0x40;
pub const DW_CFA_OFFSET: u8 = 0x80;
pub const DW_CFA_RESTORE: u8 = 0xc0;
pub const DW_CFA_HIGH_MASK: u8 = 0xc0;
pub const DW_CFA_OPERAND_MASK: u8 = 0x3f;

pub const DW_CFA_NOP: u8 = 0x00;
pub const DW_CFA_SET_LOC: u8 = 0x01;
pub const DW_CFA_ADVANCE_LOC1: u8 = 0x02;
pub const DW_CFA_ADVANCE_LOC2: u8 = 0x03;
pub const DW_CFA_ADVANCE_LOC4: u8 = 0x04;
pub const DW_CFA_OFFSET_EXTENDED: u8 = 0x05;
pub const DW_CFA_RESTORE_EXTENDED: u8 = 0x06;
pub const DW_CFA_UNDEFINED: u8 = 0x07;
pub const DW_CFA_SAME_VALUE: u8 = 0x08;
pub const DW_CFA_REGISTER: u8 = 0x09;
pub const DW_CFA_REMEMBER_STATE: u8 = 0x0a;
pub const DW_CFA_RESTORE_STATE: u8 = 0x0b;
pub const DW_CFA_DEF_CFA: u8 = 0x0c;
pub const DW_CFA_DEF_CFA_REGISTER: u8 = 0x0d;
pub const DW_CFA_DEF_CFA_OFFSET: u8 = 0x0e;
pub const DW_CFA_DEF_CFA_EXPRESSION: u8 = 0x0f;
pub const DW_CFA_EXPRESSION: u8 = 0x10;
pub const DW_CFA_OFFSET_EXTENDED_SF: u8 = 0x11;
pub const DW_CFA_DEF_CFA_SF: u8 = 0x12;
pub const DW_CFA_DEF_CFA_OFFSET_SF: u8 = 0x13;
pub const DW_CFA_VAL_OFFSET: u8 = 0x14;
pub const DW_CFA_VAL_OFFSET_SF: u8 = 0x15;
pub const DW_CFA_VAL_EXPRESSION: u8 = 0x16;
pub const DW_CFA_GNU_WINDOW_SAVE: u8 = 0x2d;
pub const DW_CFA_GNU_ARGS_SIZE: u8 = 0x2e;
pub const DW_CFA_GNU_NEGATIVE_OFFSET_EXTENDED: u8 = 0x2f;

/// Endianity values (`DW_END_*`), for `DW_AT_endianity`.
pub const DW_END_DEFAULT: u64 = 0x00;
pub const DW_END_BIG: u64 = 0x01;
pub const DW_END_LITTLE: u64 = 0x02;

/// `.debug_loclists` entry kinds (`DW_LLE_*`, DWARF5).
pub const DW_LLE_END_OF_LIST: u8 = 0x00;
pub const DW_LLE_BASE_ADDRESSX: u8 = 0x01;
pub const DW_LLE_STARTX_ENDX: u8 = 0x02;
pub const DW_LLE_STARTX_LENGTH: u8 = 0x03;
pub const DW_LLE_OFFSET_PAIR: u8 = 0x04;
pub const DW_LLE_DEFAULT_LOCATION: u8 = 0x05;
pub const DW_LLE_BASE_ADDRESS: u8 = 0x06;
pub const DW_LLE_START_END: u8 = 0x07;
pub const DW_LLE_START_LENGTH: u8 = 0x08;
