use bitflags::bitflags;

use crate::strings::{ArrayId, StrId, Symbol};
use crate::types::TypeId;

bitflags! {
    /// Variable attributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VarFlags: u8 {
        /// Compile-time integer constant (enum members).
        const CONSTANT = 1 << 0;
        /// Declared `extern`; no storage is emitted here.
        const EXTERNAL = 1 << 1;
        /// Lives in a labeled data section rather than on the stack.
        const GLOBAL = 1 << 2;
        /// Carries an initializer.
        const INITIALIZED = 1 << 3;
    }
}

/// Initializer recorded on a global variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalInit {
    Int(i64),
    Str(StrId),
    Array(ArrayId),
}

/// Index into the variable arena. The arena never shrinks, so atoms and
/// function signatures can hold `VarId`s after the defining scope closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarId(u32);

impl VarId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub struct Var {
    pub name: Symbol,
    pub ty: TypeId,
    pub flags: VarFlags,
    /// Constant value for `CONSTANT` variables.
    pub value: i64,
    pub init: Option<GlobalInit>,
    /// Byte distance below the frame pointer; 0 for globals.
    pub offset: i32,
}

#[derive(Debug, Default)]
struct Frame {
    vars: Vec<VarId>,
}

/// Scoped variable table: a stack of frames over a persistent arena.
/// The running `max_offset` survives frame exits so sibling blocks get
/// disjoint stack slots within one function.
#[derive(Debug, Default)]
pub struct VarTable {
    arena: Vec<Var>,
    frames: Vec<Frame>,
    max_offset: i32,
}

impl VarTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter_frame(&mut self) {
        self.frames.push(Frame::default());
    }

    pub fn exit_frame(&mut self) {
        self.frames.pop();
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    fn in_global_frame(&self) -> bool {
        self.frames.len() <= 1
    }

    pub fn get(&self, id: VarId) -> &Var {
        &self.arena[id.index()]
    }

    pub fn get_mut(&mut self, id: VarId) -> &mut Var {
        &mut self.arena[id.index()]
    }

    fn push(&mut self, var: Var) -> VarId {
        let id = VarId(self.arena.len() as u32);
        self.arena.push(var);
        self.frames
            .last_mut()
            .expect("no variable frame entered")
            .vars
            .push(id);
        id
    }

    /// Declare a variable in the current frame. Locals get the next stack
    /// slot (`max_offset + size`); globals keep offset 0 and are
    /// addressed by name instead.
    pub fn add(&mut self, name: Symbol, ty: TypeId, size: i32) -> VarId {
        let (flags, offset) = if self.in_global_frame() {
            (VarFlags::GLOBAL, 0)
        } else {
            self.max_offset += size;
            (VarFlags::empty(), self.max_offset)
        };
        self.push(Var {
            name,
            ty,
            flags,
            value: 0,
            init: None,
            offset,
        })
    }

    pub fn add_constant(&mut self, name: Symbol, ty: TypeId, value: i64) -> VarId {
        self.push(Var {
            name,
            ty,
            flags: VarFlags::CONSTANT,
            value,
            init: None,
            offset: 0,
        })
    }

    pub fn find(&self, name: Symbol) -> Option<VarId> {
        for frame in self.frames.iter().rev() {
            if let Some(&id) = frame.vars.iter().rev().find(|&&id| self.arena[id.index()].name == name) {
                return Some(id);
            }
        }
        None
    }

    pub fn find_in_current_frame(&self, name: Symbol) -> Option<VarId> {
        let frame = self.frames.last()?;
        frame
            .vars
            .iter()
            .rev()
            .copied()
            .find(|&id| self.arena[id.index()].name == name)
    }

    /// Move a just-declared local to a fresh slot of the new size; used
    /// when a flexible array's initializer fixes its length.
    pub fn realloc(&mut self, id: VarId, ty: TypeId, size: i32) -> (i32, i32) {
        self.max_offset += size;
        let new_offset = self.max_offset;
        let var = &mut self.arena[id.index()];
        let old_offset = var.offset;
        var.ty = ty;
        var.offset = new_offset;
        (old_offset, new_offset)
    }

    pub fn reset_max_offset(&mut self) {
        self.max_offset = 0;
    }

    pub fn max_offset(&self) -> i32 {
        self.max_offset
    }

    /// Reserve raw frame bytes (the variadic register-save area).
    pub fn reserve(&mut self, bytes: i32) -> i32 {
        self.max_offset += bytes;
        self.max_offset
    }

    /// Ids of the current frame's variables in declaration order.
    pub fn current_frame_vars(&self) -> &[VarId] {
        self.frames
            .last()
            .map(|f| f.vars.as_slice())
            .unwrap_or(&[])
    }

    /// Ids of the outermost (global) frame's variables.
    pub fn global_vars(&self) -> &[VarId] {
        self.frames
            .first()
            .map(|f| f.vars.as_slice())
            .unwrap_or(&[])
    }
}
