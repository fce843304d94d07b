use std::collections::HashMap;

use crate::atom::AtomId;
use crate::strings::Symbol;
use crate::types::TypeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(u32);

impl FuncId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Snapshot of one formal argument as it stood when the signature was
/// recorded (offsets included, so the emitter can spill registers).
#[derive(Debug, Clone)]
pub struct FuncArg {
    pub name: Symbol,
    pub ty: TypeId,
    pub offset: i32,
}

#[derive(Debug)]
pub struct Func {
    pub name: Symbol,
    pub ret: TypeId,
    pub is_external: bool,
    pub is_variadic: bool,
    pub args: Vec<FuncArg>,
    /// `AtomId::NONE` while the function is declaration-only.
    pub body: AtomId,
    /// Stack bytes the body consumes below `%rbp`.
    pub max_offset: i32,
    /// Offset of register-save slot 0 for variadic functions, else 0.
    pub reg_save_offset: i32,
}

#[derive(Debug, Default)]
pub struct FuncTable {
    funcs: Vec<Func>,
    by_name: HashMap<Symbol, FuncId>,
}

impl FuncTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a signature, or refresh an existing declaration in place.
    pub fn add(
        &mut self,
        name: Symbol,
        ret: TypeId,
        is_external: bool,
        is_variadic: bool,
        args: Vec<FuncArg>,
    ) -> FuncId {
        if let Some(&id) = self.by_name.get(&name) {
            let f = &mut self.funcs[id.index()];
            f.ret = ret;
            f.is_external = is_external;
            f.is_variadic = is_variadic;
            if f.body.is_none() {
                f.args = args;
            }
            return id;
        }
        let id = FuncId(self.funcs.len() as u32);
        self.funcs.push(Func {
            name,
            ret,
            is_external,
            is_variadic,
            args,
            body: AtomId::NONE,
            max_offset: 0,
            reg_save_offset: 0,
        });
        self.by_name.insert(name, id);
        id
    }

    pub fn find(&self, name: Symbol) -> Option<FuncId> {
        self.by_name.get(&name).copied()
    }

    pub fn get(&self, id: FuncId) -> &Func {
        &self.funcs[id.index()]
    }

    /// Finalize a definition: the argument snapshot, body atom, stack
    /// frame size, and (for variadic functions) the save-area base.
    pub fn set_body(
        &mut self,
        id: FuncId,
        args: Vec<FuncArg>,
        body: AtomId,
        max_offset: i32,
        reg_save_offset: i32,
    ) {
        let f = &mut self.funcs[id.index()];
        f.args = args;
        f.body = body;
        f.max_offset = max_offset;
        f.reg_save_offset = reg_save_offset;
    }

    pub fn iter(&self) -> impl Iterator<Item = (FuncId, &Func)> {
        self.funcs
            .iter()
            .enumerate()
            .map(|(i, f)| (FuncId(i as u32), f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strings::Interner;
    use crate::types::TypeRegistry;

    #[test]
    fn declaration_then_definition_shares_the_slot() {
        let mut syms = Interner::new();
        let reg = TypeRegistry::new(&mut syms);
        let mut funcs = FuncTable::new();
        let name = syms.intern("f");
        let declared = funcs.add(name, reg.int_ty, true, false, Vec::new());
        let defined = funcs.add(name, reg.int_ty, false, false, Vec::new());
        assert_eq!(declared, defined);
        assert!(funcs.get(defined).body.is_none());
        funcs.set_body(defined, Vec::new(), crate::atom::AtomId::NONE, 16, 0);
        assert_eq!(funcs.get(defined).max_offset, 16);
    }
}
