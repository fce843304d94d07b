use crate::error::{Error, Result};
use crate::funcs::FuncId;
use crate::strings::StrId;
use crate::types::TypeId;
use crate::vars::VarId;

const MAX_ATOMS: usize = 1 << 20;

/// Index into the atom pool. Index 0 is the reserved "none" atom;
/// allocation is bump-only, so ids stay valid for the whole translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AtomId(u32);

impl AtomId {
    pub const NONE: AtomId = AtomId(0);

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn is_some(self) -> bool {
        self.0 != 0
    }

    /// The following atom in the pool; multi-operand operations store
    /// their extra operands in a run of `Arg` atoms right after the head.
    #[inline]
    pub fn next(self) -> AtomId {
        AtomId(self.0 + 1)
    }
}

/// Operation kind of an IR atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Integer,
    Str,
    /// Address of a local; payload is the stack offset.
    VarRef,
    /// Value of a local; payload is the stack offset.
    VarVal,
    /// Address of a global; payload is the variable.
    GlobalRef,
    /// Value of a global; payload is the variable.
    GlobalVal,
    Bind,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    /// Bitwise not.
    Neg,
    EqEq,
    EqNe,
    EqLt,
    EqLe,
    EqGt,
    EqGe,
    LogAnd,
    LogOr,
    LogNot,
    /// Address-of.
    Ptr,
    /// Load through a pointer value (or through an lvalue's address).
    Deref,
    /// `base[index]`; evaluates to the element address.
    Index,
    /// Struct/union member; head is the base lvalue, arg is the offset.
    Member,
    Cast,
    Ternary,
    PostfixInc,
    PostfixDec,
    /// Function call; head payload is the callee, args follow.
    Apply,
    ExprStatement,
    AndThen,
    If,
    For,
    While,
    DoWhile,
    Switch,
    Case,
    Default,
    Break,
    Continue,
    Return,
    Nop,
    /// Continuation record of a multi-operand run.
    Arg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    None,
    Int(i32),
    Long(i64),
    Str(StrId),
    Var(VarId),
    Func(FuncId),
    Pos(AtomId),
    Offset(i32),
}

impl Payload {
    pub fn pos(self) -> AtomId {
        match self {
            Payload::Pos(id) => id,
            _ => AtomId::NONE,
        }
    }
}

/// A fixed-size IR record. `ty` is `None` only for structural atoms
/// (`Arg` continuations and the reserved none atom).
#[derive(Debug, Clone, Copy)]
pub struct Atom {
    pub op: Op,
    pub ty: Option<TypeId>,
    pub payload: Payload,
}

#[derive(Debug)]
pub struct AtomPool {
    atoms: Vec<Atom>,
}

impl AtomPool {
    pub fn new() -> Self {
        Self {
            atoms: vec![Atom {
                op: Op::Nop,
                ty: None,
                payload: Payload::None,
            }],
        }
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn get(&self, id: AtomId) -> &Atom {
        &self.atoms[id.index()]
    }

    pub fn get_mut(&mut self, id: AtomId) -> &mut Atom {
        &mut self.atoms[id.index()]
    }

    pub fn op(&self, id: AtomId) -> Op {
        self.atoms[id.index()].op
    }

    pub fn ty(&self, id: AtomId) -> Option<TypeId> {
        self.atoms[id.index()].ty
    }

    pub fn push(&mut self, atom: Atom) -> Result<AtomId> {
        if self.atoms.len() >= MAX_ATOMS {
            return Err(Error::capacity("atom pool"));
        }
        let id = AtomId(self.atoms.len() as u32);
        self.atoms.push(atom);
        Ok(id)
    }

    pub fn new_int(&mut self, op: Op, value: i32, ty: TypeId) -> Result<AtomId> {
        self.push(Atom {
            op,
            ty: Some(ty),
            payload: Payload::Int(value),
        })
    }

    pub fn new_long(&mut self, op: Op, value: i64, ty: TypeId) -> Result<AtomId> {
        self.push(Atom {
            op,
            ty: Some(ty),
            payload: Payload::Long(value),
        })
    }

    pub fn new_pos(&mut self, op: Op, pos: AtomId, ty: TypeId) -> Result<AtomId> {
        self.push(Atom {
            op,
            ty: Some(ty),
            payload: Payload::Pos(pos),
        })
    }

    pub fn new_arg(&mut self, pos: AtomId) -> Result<AtomId> {
        self.push(Atom {
            op: Op::Arg,
            ty: None,
            payload: Payload::Pos(pos),
        })
    }

    /// Head atom plus one `Arg` carrying the second operand.
    pub fn new_binop(&mut self, op: Op, lhs: AtomId, rhs: AtomId, ty: TypeId) -> Result<AtomId> {
        let head = self.new_pos(op, lhs, ty)?;
        self.new_arg(rhs)?;
        Ok(head)
    }

    pub fn new_nop(&mut self) -> Result<AtomId> {
        self.push(Atom {
            op: Op::Nop,
            ty: None,
            payload: Payload::None,
        })
    }

    /// Operand atom ids stored in the run starting at `id` (the head's
    /// own `Pos` payload plus every following `Arg`).
    pub fn operands(&self, id: AtomId) -> Vec<AtomId> {
        let mut out = Vec::new();
        if let Payload::Pos(p) = self.atoms[id.index()].payload {
            out.push(p);
        }
        let mut next = id.next();
        while next.index() < self.atoms.len() && self.atoms[next.index()].op == Op::Arg {
            out.push(self.atoms[next.index()].payload.pos());
            next = next.next();
        }
        out
    }

    /// Number of `Arg` atoms following `id`.
    pub fn arg_count(&self, id: AtomId) -> usize {
        let mut count = 0;
        let mut next = id.next();
        while next.index() < self.atoms.len() && self.atoms[next.index()].op == Op::Arg {
            count += 1;
            next = next.next();
        }
        count
    }

    /// The `n`-th `Arg` atom after the head (0-based).
    pub fn arg(&self, id: AtomId, n: usize) -> AtomId {
        self.atoms[id.index() + 1 + n].payload.pos()
    }

    /// Payload of the `n`-th `Arg` atom after the head (0-based).
    pub fn arg_payload(&self, id: AtomId, n: usize) -> Payload {
        self.atoms[id.index() + 1 + n].payload
    }

    /// All atoms in allocation order, skipping the reserved none atom.
    pub fn iter(&self) -> impl Iterator<Item = (AtomId, &Atom)> {
        self.atoms
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i, a)| (AtomId(i as u32), a))
    }

    /// Rewrite every `VarRef` from `start` on that still points at a
    /// moved variable's old stack slot.
    pub fn patch_var_refs(&mut self, start: usize, old_offset: i32, new_offset: i32, ty: TypeId) {
        for atom in &mut self.atoms[start..] {
            if atom.op == Op::VarRef && atom.payload == Payload::Offset(old_offset) {
                atom.payload = Payload::Offset(new_offset);
                atom.ty = Some(ty);
            }
        }
    }
}

#[test]
fn test_binop_run_layout() {
    let pool_ty = crate::types::TypeId::from_raw(1);
    let mut pool = AtomPool::new();
    let a = pool.new_int(Op::Integer, 1, pool_ty).unwrap();
    let b = pool.new_int(Op::Integer, 2, pool_ty).unwrap();
    let add = pool.new_binop(Op::Add, a, b, pool_ty).unwrap();
    assert_eq!(pool.op(add), Op::Add);
    assert_eq!(pool.operands(add), vec![a, b]);
    assert_eq!(pool.arg_count(add), 1);
    assert_eq!(pool.arg(add, 0), b);
    // operand ids precede the head id: parse order is topological
    assert!(a.index() < add.index() && b.index() < add.index());
}
