//! Type descriptors carried by every IR value, variable, argument, and
//! return slot.
//!
//! Grounded on `examples/original_source/src/microjit/type.h`: the original
//! `Type` struct compares equal by RTTI pointer identity and classifies
//! primitives via static helpers (`is_floating_point`, `is_signed_integer`)
//! that compare against canonical `Type::create<T>()` instances. Rust has no
//! stable cross-crate RTTI pointer to reuse for that identity, so `type_id`
//! here is a plain `u64` fixed at construction — primitive descriptors use a
//! small set of reserved ids, composite descriptors take a caller-supplied
//! id. Two descriptors are equal iff their ids match, same as the original.

use std::fmt;

/// Caller-supplied or well-known identity for a type. Equal ids denote the
/// same language-level type; the actual value carries no other meaning.
pub type TypeId = u64;

/// Reserved `TypeId` space for the primitives this crate knows how to
/// generate code for. Composite (non-primitive) types must pick an id
/// outside this range.
pub mod well_known {
    use super::TypeId;

    pub const VOID: TypeId = 0;
    pub const BOOL: TypeId = 1;
    pub const I8: TypeId = 2;
    pub const I16: TypeId = 3;
    pub const I32: TypeId = 4;
    pub const I64: TypeId = 5;
    pub const U8: TypeId = 6;
    pub const U16: TypeId = 7;
    pub const U32: TypeId = 8;
    pub const U64: TypeId = 9;
    pub const F32: TypeId = 10;
    pub const F64: TypeId = 11;
}

/// A copy-constructor called as `(dst, src)`; for primitives this is never
/// invoked (the code generator emits a width-keyed move instead).
pub type CopyCtorFn = unsafe extern "C" fn(dst: *mut u8, src: *const u8);
/// A destructor called as `(obj)`.
pub type DtorFn = unsafe extern "C" fn(obj: *mut u8);

unsafe extern "C" fn empty_copy_ctor(_dst: *mut u8, _src: *const u8) {}
unsafe extern "C" fn empty_dtor(_obj: *mut u8) {}

/// Coarse primitive classification, used by the code generator to pick
/// integer-vs-float instruction forms and by [`TypeDescriptor::is_floating_point`]
/// / [`TypeDescriptor::is_signed_integer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Bool,
    SignedInt { width: u8 },
    UnsignedInt { width: u8 },
    Float { width: u8 },
}

/// `(type_id, byte_size, copy_ctor_ptr, dtor_ptr, is_primitive)`.
///
/// Invariant: every value, variable, argument, and return slot in the IR
/// carries a `TypeDescriptor` fixed at creation. A zero-sized descriptor
/// denotes `void` and is only legal in return position.
#[derive(Clone, Copy)]
pub struct TypeDescriptor {
    pub type_id: TypeId,
    pub size: usize,
    pub copy_ctor: CopyCtorFn,
    pub dtor: DtorFn,
    pub is_primitive: bool,
    primitive: Option<Primitive>,
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("type_id", &self.type_id)
            .field("size", &self.size)
            .field("is_primitive", &self.is_primitive)
            .finish()
    }
}

impl PartialEq for TypeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}
impl Eq for TypeDescriptor {}

impl TypeDescriptor {
    /// The canonical `void` descriptor: zero size, legal only in return
    /// position.
    pub const fn void() -> Self {
        TypeDescriptor {
            type_id: well_known::VOID,
            size: 0,
            copy_ctor: empty_copy_ctor,
            dtor: empty_dtor,
            is_primitive: true,
            primitive: None,
        }
    }

    /// Build a descriptor for a composite (non-primitive) type. `type_id`
    /// must be distinct from every other type the caller uses and outside
    /// [`well_known`]'s reserved range.
    pub fn composite(type_id: TypeId, size: usize, copy_ctor: CopyCtorFn, dtor: DtorFn) -> Self {
        TypeDescriptor {
            type_id,
            size,
            copy_ctor,
            dtor,
            is_primitive: false,
            primitive: None,
        }
    }

    const fn primitive_desc(type_id: TypeId, size: usize, primitive: Primitive) -> Self {
        TypeDescriptor {
            type_id,
            size,
            copy_ctor: empty_copy_ctor,
            dtor: empty_dtor,
            is_primitive: true,
            primitive: Some(primitive),
        }
    }

    pub const fn bool_() -> Self {
        Self::primitive_desc(well_known::BOOL, 1, Primitive::Bool)
    }
    pub const fn i8() -> Self {
        Self::primitive_desc(well_known::I8, 1, Primitive::SignedInt { width: 1 })
    }
    pub const fn i16() -> Self {
        Self::primitive_desc(well_known::I16, 2, Primitive::SignedInt { width: 2 })
    }
    pub const fn i32() -> Self {
        Self::primitive_desc(well_known::I32, 4, Primitive::SignedInt { width: 4 })
    }
    pub const fn i64() -> Self {
        Self::primitive_desc(well_known::I64, 8, Primitive::SignedInt { width: 8 })
    }
    pub const fn u8() -> Self {
        Self::primitive_desc(well_known::U8, 1, Primitive::UnsignedInt { width: 1 })
    }
    pub const fn u16() -> Self {
        Self::primitive_desc(well_known::U16, 2, Primitive::UnsignedInt { width: 2 })
    }
    pub const fn u32() -> Self {
        Self::primitive_desc(well_known::U32, 4, Primitive::UnsignedInt { width: 4 })
    }
    pub const fn u64() -> Self {
        Self::primitive_desc(well_known::U64, 8, Primitive::UnsignedInt { width: 8 })
    }
    pub const fn f32() -> Self {
        Self::primitive_desc(well_known::F32, 4, Primitive::Float { width: 4 })
    }
    pub const fn f64() -> Self {
        Self::primitive_desc(well_known::F64, 8, Primitive::Float { width: 8 })
    }

    pub fn is_void(&self) -> bool {
        self.type_id == well_known::VOID
    }

    /// Floating-point classification (4- or 8-byte), mirroring
    /// `Type::is_floating_point` in the original.
    pub fn is_floating_point(&self) -> bool {
        matches!(self.primitive, Some(Primitive::Float { .. }))
    }

    /// Signed-integer classification (1/2/4/8-byte), mirroring
    /// `Type::is_signed_integer` in the original.
    pub fn is_signed_integer(&self) -> bool {
        matches!(self.primitive, Some(Primitive::SignedInt { .. }))
    }

    pub fn is_unsigned_integer(&self) -> bool {
        matches!(self.primitive, Some(Primitive::UnsignedInt { .. }))
    }

    pub fn is_bool(&self) -> bool {
        matches!(self.primitive, Some(Primitive::Bool))
    }

    pub fn primitive(&self) -> Option<Primitive> {
        self.primitive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_by_type_id() {
        assert_eq!(TypeDescriptor::i32(), TypeDescriptor::i32());
        assert_ne!(TypeDescriptor::i32(), TypeDescriptor::i64());
    }

    #[test]
    fn void_is_zero_sized() {
        assert_eq!(TypeDescriptor::void().size, 0);
        assert!(TypeDescriptor::void().is_void());
    }

    #[test]
    fn classification_helpers() {
        assert!(TypeDescriptor::f64().is_floating_point());
        assert!(!TypeDescriptor::i32().is_floating_point());
        assert!(TypeDescriptor::i32().is_signed_integer());
        assert!(!TypeDescriptor::u32().is_signed_integer());
        assert!(TypeDescriptor::u32().is_unsigned_integer());
    }

    #[test]
    fn composite_type_not_primitive() {
        unsafe extern "C" fn noop_copy(_: *mut u8, _: *const u8) {}
        unsafe extern "C" fn noop_dtor(_: *mut u8) {}
        let t = TypeDescriptor::composite(1000, 24, noop_copy, noop_dtor);
        assert!(!t.is_primitive);
        assert_eq!(t.size, 24);
    }
}
