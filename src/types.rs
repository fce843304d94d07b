use std::collections::HashMap;

use crate::strings::{Interner, Symbol};

/// Index into the type registry. Pointer and array types are hash-consed,
/// so equal type ids mean structurally equal types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(u32);

impl TypeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[cfg(test)]
    pub(crate) fn from_raw(raw: u32) -> Self {
        TypeId(raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StructId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnumId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Void,
    Char,
    Int,
    Long,
    Ptr(TypeId),
    /// `len == 0` is a flexible array, sized later by its initializer.
    Array { elem: TypeId, len: i32 },
    Struct(StructId),
    Union(StructId),
    Enum(EnumId),
}

#[derive(Debug, Clone)]
pub struct Member {
    pub name: Symbol,
    pub offset: i32,
    pub ty: TypeId,
}

/// Shared descriptor of a struct or union type. Unions put every member
/// at offset 0; structs lay members out tightly packed.
#[derive(Debug)]
pub struct StructDecl {
    pub tag: Option<Symbol>,
    pub is_union: bool,
    pub is_anonymous: bool,
    pub members: Vec<Member>,
    pub size: i32,
}

#[derive(Debug)]
pub struct EnumDecl {
    pub tag: Option<Symbol>,
    /// Value the next member without an explicit `= n` receives.
    pub next_value: i32,
}

#[derive(Debug)]
pub struct TypeRegistry {
    types: Vec<TypeKind>,
    structs: Vec<StructDecl>,
    enums: Vec<EnumDecl>,
    /// Primitives and typedefs, findable by identifier.
    by_name: HashMap<Symbol, TypeId>,
    struct_tags: HashMap<(Symbol, bool), TypeId>,
    enum_tags: HashMap<Symbol, TypeId>,
    ptr_types: HashMap<TypeId, TypeId>,
    array_types: HashMap<(TypeId, i32), TypeId>,
    pub void_ty: TypeId,
    pub char_ty: TypeId,
    pub int_ty: TypeId,
    pub long_ty: TypeId,
    pub char_ptr_ty: TypeId,
}

impl TypeRegistry {
    pub fn new(symbols: &mut Interner) -> Self {
        let mut reg = Self {
            types: Vec::new(),
            structs: Vec::new(),
            enums: Vec::new(),
            by_name: HashMap::new(),
            struct_tags: HashMap::new(),
            enum_tags: HashMap::new(),
            ptr_types: HashMap::new(),
            array_types: HashMap::new(),
            void_ty: TypeId(0),
            char_ty: TypeId(0),
            int_ty: TypeId(0),
            long_ty: TypeId(0),
            char_ptr_ty: TypeId(0),
        };
        reg.void_ty = reg.add_named(symbols.intern("void"), TypeKind::Void);
        reg.char_ty = reg.add_named(symbols.intern("char"), TypeKind::Char);
        reg.int_ty = reg.add_named(symbols.intern("int"), TypeKind::Int);
        reg.long_ty = reg.add_named(symbols.intern("long"), TypeKind::Long);
        reg.char_ptr_ty = reg.add_pointer(reg.char_ty);
        reg
    }

    fn push(&mut self, kind: TypeKind) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(kind);
        id
    }

    fn add_named(&mut self, name: Symbol, kind: TypeKind) -> TypeId {
        let id = self.push(kind);
        self.by_name.insert(name, id);
        id
    }

    pub fn kind(&self, id: TypeId) -> TypeKind {
        self.types[id.index()]
    }

    pub fn find(&self, name: Symbol) -> Option<TypeId> {
        self.by_name.get(&name).copied()
    }

    pub fn add_pointer(&mut self, to: TypeId) -> TypeId {
        if let Some(&id) = self.ptr_types.get(&to) {
            return id;
        }
        let id = self.push(TypeKind::Ptr(to));
        self.ptr_types.insert(to, id);
        id
    }

    pub fn add_array(&mut self, elem: TypeId, len: i32) -> TypeId {
        if let Some(&id) = self.array_types.get(&(elem, len)) {
            return id;
        }
        let id = self.push(TypeKind::Array { elem, len });
        self.array_types.insert((elem, len), id);
        id
    }

    pub fn add_typedef(&mut self, name: Symbol, ty: TypeId) -> TypeId {
        self.by_name.insert(name, ty);
        ty
    }

    fn add_record(&mut self, tag: Option<Symbol>, is_union: bool, is_anonymous: bool) -> TypeId {
        if let Some(tag) = tag {
            if let Some(&id) = self.struct_tags.get(&(tag, is_union)) {
                return id;
            }
        }
        let decl = StructId(self.structs.len() as u32);
        self.structs.push(StructDecl {
            tag,
            is_union,
            is_anonymous,
            members: Vec::new(),
            size: 0,
        });
        let kind = if is_union {
            TypeKind::Union(decl)
        } else {
            TypeKind::Struct(decl)
        };
        let id = self.push(kind);
        if let Some(tag) = tag {
            self.struct_tags.insert((tag, is_union), id);
        }
        id
    }

    pub fn add_struct(&mut self, tag: Option<Symbol>, is_anonymous: bool) -> TypeId {
        self.add_record(tag, false, is_anonymous)
    }

    pub fn add_union(&mut self, tag: Option<Symbol>, is_anonymous: bool) -> TypeId {
        self.add_record(tag, true, is_anonymous)
    }

    pub fn add_enum(&mut self, tag: Option<Symbol>) -> TypeId {
        if let Some(tag) = tag {
            if let Some(&id) = self.enum_tags.get(&tag) {
                return id;
            }
        }
        let decl = EnumId(self.enums.len() as u32);
        self.enums.push(EnumDecl { tag, next_value: 0 });
        let id = self.push(TypeKind::Enum(decl));
        if let Some(tag) = tag {
            self.enum_tags.insert(tag, id);
        }
        id
    }

    pub fn record_decl(&self, id: TypeId) -> Option<&StructDecl> {
        match self.kind(id) {
            TypeKind::Struct(s) | TypeKind::Union(s) => Some(&self.structs[s.0 as usize]),
            _ => None,
        }
    }

    pub fn enum_decl_mut(&mut self, id: TypeId) -> Option<&mut EnumDecl> {
        match self.kind(id) {
            TypeKind::Enum(e) => Some(&mut self.enums[e.0 as usize]),
            _ => None,
        }
    }

    pub fn is_enum(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Enum(_))
    }

    pub fn add_struct_member(&mut self, record: TypeId, name: Symbol, ty: TypeId) {
        let size = self.size(ty);
        let decl_id = match self.kind(record) {
            TypeKind::Struct(s) | TypeKind::Union(s) => s,
            _ => return,
        };
        let decl = &mut self.structs[decl_id.0 as usize];
        let offset = if decl.is_union { 0 } else { decl.size };
        decl.members.push(Member { name, offset, ty });
        if decl.is_union {
            decl.size = decl.size.max(size);
        } else {
            decl.size += size;
        }
    }

    pub fn find_struct_member(&self, record: TypeId, name: Symbol) -> Option<Member> {
        self.record_decl(record)?
            .members
            .iter()
            .find(|m| m.name == name)
            .cloned()
    }

    /// Expose every member of an anonymous embedded union at offset 0 of
    /// the outer struct; the struct grows by the union's size once.
    pub fn copy_union_members(&mut self, outer: TypeId, inner_union: TypeId) {
        let (union_decl, union_size) = match self.kind(inner_union) {
            TypeKind::Union(s) => (s, self.structs[s.0 as usize].size),
            _ => return,
        };
        let copied: Vec<Member> = self.structs[union_decl.0 as usize].members.clone();
        let outer_decl = match self.kind(outer) {
            TypeKind::Struct(s) | TypeKind::Union(s) => s,
            _ => return,
        };
        let decl = &mut self.structs[outer_decl.0 as usize];
        for m in copied {
            decl.members.push(Member { offset: 0, ..m });
        }
        if decl.is_union {
            decl.size = decl.size.max(union_size);
        } else {
            decl.size += union_size;
        }
    }

    /// Byte size. `char` 1, `int` 4, `long` 8, pointers 8, arrays scale
    /// their element, records use their descriptor.
    pub fn size(&self, id: TypeId) -> i32 {
        match self.kind(id) {
            TypeKind::Void => 0,
            TypeKind::Char => 1,
            TypeKind::Int => 4,
            TypeKind::Long => 8,
            TypeKind::Ptr(_) => 8,
            TypeKind::Array { elem, len } => {
                if len > 0 {
                    len * self.size(elem)
                } else {
                    8
                }
            }
            TypeKind::Struct(s) | TypeKind::Union(s) => self.structs[s.0 as usize].size,
            TypeKind::Enum(_) => 4,
        }
    }

    pub fn is_same(&self, a: TypeId, b: TypeId) -> bool {
        a == b
    }

    pub fn is_pointer(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Ptr(_))
    }

    pub fn is_array(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Array { .. })
    }

    pub fn array_len(&self, id: TypeId) -> Option<i32> {
        match self.kind(id) {
            TypeKind::Array { len, .. } => Some(len),
            _ => None,
        }
    }

    /// Target type of a pointer, or element type of an array.
    pub fn pointee(&self, id: TypeId) -> Option<TypeId> {
        match self.kind(id) {
            TypeKind::Ptr(to) => Some(to),
            TypeKind::Array { elem, .. } => Some(elem),
            _ => None,
        }
    }

    pub fn is_long(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Long)
    }

    /// Readable spelling for diagnostics.
    pub fn display(&self, id: TypeId, symbols: &Interner) -> String {
        match self.kind(id) {
            TypeKind::Void => "void".to_string(),
            TypeKind::Char => "char".to_string(),
            TypeKind::Int => "int".to_string(),
            TypeKind::Long => "long".to_string(),
            TypeKind::Ptr(to) => format!("{}*", self.display(to, symbols)),
            TypeKind::Array { elem, len } => format!("{}[{len}]", self.display(elem, symbols)),
            TypeKind::Struct(s) | TypeKind::Union(s) => {
                let decl = &self.structs[s.0 as usize];
                let tag = decl
                    .tag
                    .map(|t| symbols.resolve(t).to_string())
                    .unwrap_or_default();
                if decl.is_union {
                    format!("union {tag}")
                } else {
                    format!("struct {tag}")
                }
            }
            TypeKind::Enum(e) => {
                let tag = self.enums[e.0 as usize]
                    .tag
                    .map(|t| symbols.resolve(t).to_string())
                    .unwrap_or_default();
                format!("enum {tag}")
            }
        }
    }
}
