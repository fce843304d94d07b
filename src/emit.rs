use std::io::Write;

use log::trace;
use num_enum::TryFromPrimitive;

use crate::atom::{AtomId, Op, Payload};
use crate::compiler::Compiler;
use crate::error::{Error, ErrorKind, Result};
use crate::funcs::Func;
use crate::strings::StrId;
use crate::types::TypeId;
use crate::vars::{GlobalInit, VarFlags, VarId};

/// System V AMD64 integer argument registers, in call order.
#[derive(Debug, Clone, Copy, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum ArgReg {
    Rdi = 0,
    Rsi,
    Rdx,
    Rcx,
    R8,
    R9,
}

impl ArgReg {
    pub fn name64(self) -> &'static str {
        match self {
            Self::Rdi => "%rdi",
            Self::Rsi => "%rsi",
            Self::Rdx => "%rdx",
            Self::Rcx => "%rcx",
            Self::R8 => "%r8",
            Self::R9 => "%r9",
        }
    }

    pub fn name32(self) -> &'static str {
        match self {
            Self::Rdi => "%edi",
            Self::Rsi => "%esi",
            Self::Rdx => "%edx",
            Self::Rcx => "%ecx",
            Self::R8 => "%r8d",
            Self::R9 => "%r9d",
        }
    }

    pub fn name8(self) -> &'static str {
        match self {
            Self::Rdi => "%dil",
            Self::Rsi => "%sil",
            Self::Rdx => "%dl",
            Self::Rcx => "%cl",
            Self::R8 => "%r8b",
            Self::R9 => "%r9b",
        }
    }
}

fn arg_reg(index: usize) -> Result<ArgReg> {
    ArgReg::try_from(index as u8).map_err(|_| Error {
        kind: ErrorKind::Semantic("argument does not fit a register".into()),
        loc: None,
    })
}

/// Escape a pooled string for a GNU as `.string` directive.
fn escape_asm(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            b'\r' => out.push_str("\\r"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\{:03o}", b)),
        }
    }
    out
}

/// Walks the atom tree and prints AT&T-syntax x86-64.
///
/// The evaluation discipline is a value stack: every expression pushes
/// exactly one 64-bit word (sign-extended), binary operators pop two and
/// push one, statements are net zero.
pub struct Emitter<'a, W: Write> {
    ctx: &'a Compiler,
    out: W,
    label_index: u32,
    break_labels: Vec<u32>,
    continue_labels: Vec<u32>,
    return_label: u32,
}

impl<'a, W: Write> Emitter<'a, W> {
    pub fn new(ctx: &'a Compiler, out: W) -> Self {
        Self {
            ctx,
            out,
            label_index: 0,
            break_labels: Vec::new(),
            continue_labels: Vec::new(),
            return_label: 0,
        }
    }

    fn new_label(&mut self) -> u32 {
        let l = self.label_index;
        self.label_index += 1;
        l
    }

    fn op(&mut self, text: &str) -> Result<()> {
        writeln!(self.out, "\t{text}")?;
        Ok(())
    }

    fn label(&mut self, l: u32) -> Result<()> {
        writeln!(self.out, ".L{l}:")?;
        Ok(())
    }

    fn internal(&self, what: &str) -> Error {
        Error {
            kind: ErrorKind::Semantic(format!("invalid program: {what}")),
            loc: None,
        }
    }

    fn ty_of(&self, a: AtomId) -> TypeId {
        self.ctx.atoms.ty(a).unwrap_or(self.ctx.types.void_ty)
    }

    fn size_of(&self, a: AtomId) -> i32 {
        self.ctx.types.size(self.ty_of(a))
    }

    fn is_ptrish(&self, ty: TypeId) -> bool {
        self.ctx.types.is_pointer(ty) || self.ctx.types.is_array(ty)
    }

    fn elem_size(&self, ty: TypeId) -> i32 {
        self.ctx
            .types
            .pointee(ty)
            .map(|t| self.ctx.types.size(t))
            .unwrap_or(1)
    }

    fn var_name(&self, vid: VarId) -> &str {
        self.ctx.symbols.resolve(self.ctx.vars.get(vid).name)
    }

    // ---- stack-machine fragments -------------------------------------

    /// Sign-extending load from `src` into `%rax`.
    fn load_rax(&mut self, src: &str, size: i32) -> Result<()> {
        match size {
            1 => self.op(&format!("movsbq\t{src}, %rax")),
            4 => self.op(&format!("movslq\t{src}, %rax")),
            8 => self.op(&format!("movq\t{src}, %rax")),
            _ => Err(self.internal("unsupported load size")),
        }
    }

    fn push_rax(&mut self) -> Result<()> {
        self.op("pushq\t%rax")
    }

    /// Pop the condition and jump when it is zero.
    fn jmp_false(&mut self, l: u32) -> Result<()> {
        self.op("popq\t%rax")?;
        self.op("testq\t%rax, %rax")?;
        self.op(&format!("jz\t.L{l}"))
    }

    fn jmp_true(&mut self, l: u32) -> Result<()> {
        self.op("popq\t%rax")?;
        self.op("testq\t%rax, %rax")?;
        self.op(&format!("jnz\t.L{l}"))
    }

    fn jmp(&mut self, l: u32) -> Result<()> {
        self.op(&format!("jmp\t.L{l}"))
    }

    /// Multiply the value on top of the stack by a pointee size.
    fn scale_top(&mut self, by: i32) -> Result<()> {
        if by == 1 {
            return Ok(());
        }
        self.op("popq\t%rax")?;
        self.op(&format!("imulq\t${by}, %rax, %rax"))?;
        self.push_rax()
    }

    /// Sign-extend `%rax` back to 64 bits after a 32-bit operation.
    fn extend(&mut self, width: i32) -> Result<()> {
        if width == 4 {
            self.op("cltq")?;
        }
        Ok(())
    }

    // ---- expression emission -----------------------------------------

    /// Push the address an lvalue denotes.
    fn emit_address(&mut self, a: AtomId) -> Result<()> {
        let atom = *self.ctx.atoms.get(a);
        match atom.op {
            Op::VarRef => {
                let Payload::Offset(off) = atom.payload else {
                    return Err(self.internal("variable reference without offset"));
                };
                self.op(&format!("leaq\t-{off}(%rbp), %rax"))?;
                self.push_rax()
            }
            Op::GlobalRef => {
                let Payload::Var(vid) = atom.payload else {
                    return Err(self.internal("global reference without variable"));
                };
                let name = self.var_name(vid).to_string();
                self.op(&format!("leaq\t{name}(%rip), %rax"))?;
                self.push_rax()
            }
            Op::Index => {
                let base = atom.payload.pos();
                let index = self.ctx.atoms.arg(a, 0);
                self.emit_value(base)?;
                self.emit_value(index)?;
                let esz = self.size_of(a);
                self.op("popq\t%rdx")?;
                if esz != 1 {
                    self.op(&format!("imulq\t${esz}, %rdx, %rdx"))?;
                }
                self.op("popq\t%rax")?;
                self.op("addq\t%rdx, %rax")?;
                self.push_rax()
            }
            Op::Member => {
                let base = atom.payload.pos();
                self.emit_address(base)?;
                let Payload::Offset(off) = self.ctx.atoms.arg_payload(a, 0) else {
                    return Err(self.internal("member access without offset"));
                };
                if off != 0 {
                    self.op("popq\t%rax")?;
                    self.op(&format!("addq\t${off}, %rax"))?;
                    self.push_rax()?;
                }
                Ok(())
            }
            Op::Deref => self.emit_pointer(atom.payload.pos()),
            _ => Err(self.internal("expression is not an lvalue")),
        }
    }

    /// Push the address a `Deref` operand denotes: lvalues contribute
    /// their address, everything else its (pointer) value.
    fn emit_pointer(&mut self, a: AtomId) -> Result<()> {
        match self.ctx.atoms.op(a) {
            Op::VarRef | Op::GlobalRef | Op::Index | Op::Member => self.emit_address(a),
            _ => self.emit_value(a),
        }
    }

    fn emit_binary(&mut self, a: AtomId) -> Result<()> {
        let atom = *self.ctx.atoms.get(a);
        let op = atom.op;
        let lhs = atom.payload.pos();
        let rhs = self.ctx.atoms.arg(a, 0);
        let lt = self.ty_of(lhs);
        let rt = self.ty_of(rhs);
        let l_ptr = self.is_ptrish(lt);
        let r_ptr = self.is_ptrish(rt);

        self.emit_value(lhs)?;
        if matches!(op, Op::Add) && r_ptr && !l_ptr {
            self.scale_top(self.elem_size(rt))?;
        }
        self.emit_value(rhs)?;
        if matches!(op, Op::Add | Op::Sub) && l_ptr && !r_ptr {
            self.scale_top(self.elem_size(lt))?;
        }

        let width = if self.ctx.types.size(lt) == 8 || self.ctx.types.size(rt) == 8 {
            8
        } else {
            4
        };
        match op {
            Op::Add | Op::Sub | Op::Mul | Op::And | Op::Or | Op::Xor => {
                self.op("popq\t%rdx")?;
                self.op("popq\t%rax")?;
                let mnemonic = match op {
                    Op::Add => "add",
                    Op::Sub => "sub",
                    Op::Mul => "imul",
                    Op::And => "and",
                    Op::Or => "or",
                    _ => "xor",
                };
                if width == 8 {
                    self.op(&format!("{mnemonic}q\t%rdx, %rax"))?;
                } else {
                    self.op(&format!("{mnemonic}l\t%edx, %eax"))?;
                    self.extend(4)?;
                }
                if op == Op::Sub && l_ptr && r_ptr {
                    // pointer difference counts elements
                    let esz = self.elem_size(lt);
                    if esz != 1 {
                        self.op("cqto")?;
                        self.op(&format!("movq\t${esz}, %rcx"))?;
                        self.op("idivq\t%rcx")?;
                    }
                }
                self.push_rax()
            }
            Op::Div | Op::Mod => {
                self.op("popq\t%rcx")?;
                self.op("popq\t%rax")?;
                if width == 8 {
                    self.op("cqto")?;
                    self.op("idivq\t%rcx")?;
                } else {
                    self.op("cltd")?;
                    self.op("idivl\t%ecx")?;
                }
                if op == Op::Div {
                    self.extend(width)?;
                    self.push_rax()
                } else if width == 8 {
                    self.op("pushq\t%rdx")
                } else {
                    self.op("movslq\t%edx, %rdx")?;
                    self.op("pushq\t%rdx")
                }
            }
            Op::Shl | Op::Shr => {
                self.op("popq\t%rcx")?;
                self.op("popq\t%rax")?;
                let mnemonic = if op == Op::Shl { "sal" } else { "sar" };
                if width == 8 {
                    self.op(&format!("{mnemonic}q\t%cl, %rax"))?;
                } else {
                    self.op(&format!("{mnemonic}l\t%cl, %eax"))?;
                    self.extend(4)?;
                }
                self.push_rax()
            }
            Op::EqEq | Op::EqNe | Op::EqLt | Op::EqLe | Op::EqGt | Op::EqGe => {
                self.op("popq\t%rdx")?;
                self.op("popq\t%rcx")?;
                self.op("xorl\t%eax, %eax")?;
                if width == 8 {
                    self.op("subq\t%rdx, %rcx")?;
                } else {
                    self.op("subl\t%edx, %ecx")?;
                }
                let set = match op {
                    Op::EqEq => "sete",
                    Op::EqNe => "setne",
                    Op::EqLt => "setl",
                    Op::EqLe => "setle",
                    Op::EqGt => "setg",
                    _ => "setge",
                };
                self.op(&format!("{set}\t%al"))?;
                self.push_rax()
            }
            Op::LogAnd | Op::LogOr => {
                self.op("popq\t%rdx")?;
                self.op("popq\t%rcx")?;
                self.op("xorl\t%eax, %eax")?;
                self.op("testq\t%rcx, %rcx")?;
                self.op("setne\t%al")?;
                self.op("xorl\t%ecx, %ecx")?;
                self.op("testq\t%rdx, %rdx")?;
                self.op("setne\t%cl")?;
                if op == Op::LogAnd {
                    self.op("andl\t%ecx, %eax")?;
                } else {
                    self.op("orl\t%ecx, %eax")?;
                }
                self.push_rax()
            }
            _ => Err(self.internal("not a binary operation")),
        }
    }

    /// Push the value of an expression atom.
    fn emit_value(&mut self, a: AtomId) -> Result<()> {
        trace!("emitting atom @{}", a.index());
        let atom = *self.ctx.atoms.get(a);
        match atom.op {
            Op::Integer => match atom.payload {
                Payload::Int(v) => {
                    self.op(&format!("movq\t${v}, %rax"))?;
                    self.push_rax()
                }
                Payload::Long(v) => {
                    self.op(&format!("movabsq\t${v}, %rax"))?;
                    self.push_rax()
                }
                _ => Err(self.internal("integer atom without a value")),
            },
            Op::Str => {
                let Payload::Str(id) = atom.payload else {
                    return Err(self.internal("string atom without a pool id"));
                };
                self.op(&format!("leaq\t.LC{}(%rip), %rax", id.index()))?;
                self.push_rax()
            }
            Op::VarRef | Op::GlobalRef => self.emit_address(a),
            Op::VarVal => {
                let Payload::Offset(off) = atom.payload else {
                    return Err(self.internal("variable value without offset"));
                };
                let size = self.size_of(a);
                self.load_rax(&format!("-{off}(%rbp)"), size)?;
                self.push_rax()
            }
            Op::GlobalVal => {
                let Payload::Var(vid) = atom.payload else {
                    return Err(self.internal("global value without variable"));
                };
                let name = self.var_name(vid).to_string();
                let size = self.size_of(a);
                self.load_rax(&format!("{name}(%rip)"), size)?;
                self.push_rax()
            }
            Op::Index | Op::Member => {
                self.emit_address(a)?;
                let ty = self.ty_of(a);
                if !self.ctx.types.is_array(ty) {
                    let size = self.size_of(a);
                    self.op("popq\t%rax")?;
                    self.load_rax("(%rax)", size)?;
                    self.push_rax()?;
                }
                Ok(())
            }
            Op::Deref => {
                self.emit_pointer(atom.payload.pos())?;
                let size = self.size_of(a);
                self.op("popq\t%rax")?;
                self.load_rax("(%rax)", size)?;
                self.push_rax()
            }
            Op::Ptr => self.emit_address(atom.payload.pos()),
            Op::Bind => {
                let rhs = atom.payload.pos();
                let lhs = self.ctx.atoms.arg(a, 0);
                self.emit_value(rhs)?;
                self.emit_address(lhs)?;
                self.op("popq\t%rax")?;
                self.op("popq\t%rdx")?;
                match self.size_of(a) {
                    1 => self.op("movb\t%dl, (%rax)")?,
                    4 => self.op("movl\t%edx, (%rax)")?,
                    8 => self.op("movq\t%rdx, (%rax)")?,
                    _ => return Err(self.internal("unsupported store size")),
                }
                self.op("pushq\t%rdx")
            }
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod | Op::And | Op::Or | Op::Xor
            | Op::Shl | Op::Shr | Op::EqEq | Op::EqNe | Op::EqLt | Op::EqLe | Op::EqGt
            | Op::EqGe | Op::LogAnd | Op::LogOr => self.emit_binary(a),
            Op::Neg => {
                self.emit_value(atom.payload.pos())?;
                let width = if self.size_of(atom.payload.pos()) == 8 { 8 } else { 4 };
                self.op("popq\t%rax")?;
                if width == 8 {
                    self.op("notq\t%rax")?;
                } else {
                    self.op("notl\t%eax")?;
                    self.extend(4)?;
                }
                self.push_rax()
            }
            Op::LogNot => {
                self.emit_value(atom.payload.pos())?;
                self.op("popq\t%rdx")?;
                self.op("xorl\t%eax, %eax")?;
                self.op("testq\t%rdx, %rdx")?;
                self.op("sete\t%al")?;
                self.push_rax()
            }
            Op::Cast => {
                let operand = atom.payload.pos();
                self.emit_value(operand)?;
                let to = self.size_of(a);
                let from = self.size_of(operand);
                if to != from && to != 0 && from != 0 {
                    self.op("popq\t%rax")?;
                    match to.min(from) {
                        1 if to == 1 => self.op("movsbq\t%al, %rax")?,
                        _ if to == 4 => self.op("movslq\t%eax, %rax")?,
                        _ if to == 8 && from == 4 => self.op("cltq")?,
                        _ if to == 8 && from == 1 => self.op("movsbq\t%al, %rax")?,
                        _ => {}
                    }
                    self.push_rax()?;
                }
                Ok(())
            }
            Op::Ternary => {
                let l_else = self.new_label();
                let l_end = self.new_label();
                self.emit_value(atom.payload.pos())?;
                self.jmp_false(l_else)?;
                let first = self.ctx.atoms.arg(a, 0);
                let second = self.ctx.atoms.arg(a, 1);
                self.emit_value(first)?;
                self.jmp(l_end)?;
                self.label(l_else)?;
                self.emit_value(second)?;
                self.label(l_end)
            }
            Op::PostfixInc | Op::PostfixDec => {
                let target = atom.payload.pos();
                self.emit_address(target)?;
                let ty = self.ty_of(a);
                let size = self.ctx.types.size(ty);
                let delta = if self.ctx.types.is_pointer(ty) {
                    self.elem_size(ty)
                } else {
                    1
                };
                self.op("popq\t%rax")?;
                match size {
                    1 => self.op("movsbq\t(%rax), %rdx")?,
                    4 => self.op("movslq\t(%rax), %rdx")?,
                    8 => self.op("movq\t(%rax), %rdx")?,
                    _ => return Err(self.internal("unsupported increment size")),
                }
                self.op("pushq\t%rdx")?;
                let mnemonic = if atom.op == Op::PostfixInc { "add" } else { "sub" };
                match size {
                    1 => self.op(&format!("{mnemonic}b\t${delta}, (%rax)")),
                    4 => self.op(&format!("{mnemonic}l\t${delta}, (%rax)")),
                    _ => self.op(&format!("{mnemonic}q\t${delta}, (%rax)")),
                }
            }
            Op::Apply => {
                let Payload::Func(fid) = atom.payload else {
                    return Err(self.internal("call without a callee"));
                };
                let argc = self.ctx.atoms.arg_count(a);
                for i in 0..argc {
                    let arg = self.ctx.atoms.arg(a, i);
                    self.emit_value(arg)?;
                }
                for i in (0..argc).rev() {
                    let reg = arg_reg(i)?;
                    self.op(&format!("popq\t{}", reg.name64()))?;
                }
                let f = self.ctx.funcs.get(fid);
                if f.is_variadic {
                    // no vector registers are ever used
                    self.op("movb\t$0, %al")?;
                }
                let name = self.ctx.symbols.resolve(f.name).to_string();
                self.op(&format!("call\t{name}"))?;
                self.push_rax()
            }
            Op::ExprStatement => {
                self.emit_value(atom.payload.pos())?;
                self.op("popq\t%rax")
            }
            Op::AndThen => {
                self.emit_value(atom.payload.pos())?;
                self.emit_value(self.ctx.atoms.arg(a, 0))
            }
            Op::Nop => Ok(()),
            Op::If => self.emit_if(a),
            Op::For => self.emit_for(a),
            Op::While => self.emit_while(a),
            Op::DoWhile => self.emit_do_while(a),
            Op::Switch => self.emit_switch(a),
            Op::Break => match self.break_labels.last().copied() {
                Some(l) => self.jmp(l),
                None => Err(self.internal("break outside of a loop or switch")),
            },
            Op::Continue => match self.continue_labels.last().copied() {
                Some(l) => self.jmp(l),
                None => Err(self.internal("continue outside of a loop")),
            },
            Op::Return => {
                let value = atom.payload.pos();
                if value.is_some() {
                    self.emit_value(value)?;
                    self.op("popq\t%rax")?;
                }
                let l = self.return_label;
                self.jmp(l)
            }
            Op::Case | Op::Default | Op::Arg => Err(self.internal("stray structural atom")),
        }
    }

    // ---- control flow ------------------------------------------------

    fn emit_if(&mut self, a: AtomId) -> Result<()> {
        let body = self.ctx.atoms.arg(a, 0);
        let else_body = self.ctx.atoms.arg(a, 1);
        let l_end = self.new_label();
        let l_else = self.new_label();
        let cond = self.ctx.atoms.get(a).payload.pos();
        self.emit_value(cond)?;
        self.jmp_false(if else_body.is_some() { l_else } else { l_end })?;
        self.emit_value(body)?;
        if else_body.is_some() {
            self.jmp(l_end)?;
            self.label(l_else)?;
            self.emit_value(else_body)?;
        }
        self.label(l_end)
    }

    fn emit_for(&mut self, a: AtomId) -> Result<()> {
        let body = self.ctx.atoms.get(a).payload.pos();
        let cond = self.ctx.atoms.arg(a, 0);
        let pre = self.ctx.atoms.arg(a, 1);
        let post = self.ctx.atoms.arg(a, 2);
        let l_cond = self.new_label();
        let l_continue = self.new_label();
        let l_end = self.new_label();
        self.emit_value(pre)?;
        self.label(l_cond)?;
        self.emit_value(cond)?;
        self.jmp_false(l_end)?;
        self.break_labels.push(l_end);
        self.continue_labels.push(l_continue);
        self.emit_value(body)?;
        self.break_labels.pop();
        self.continue_labels.pop();
        self.label(l_continue)?;
        self.emit_value(post)?;
        self.jmp(l_cond)?;
        self.label(l_end)
    }

    fn emit_while(&mut self, a: AtomId) -> Result<()> {
        let body = self.ctx.atoms.get(a).payload.pos();
        let cond = self.ctx.atoms.arg(a, 0);
        let l_cond = self.new_label();
        let l_end = self.new_label();
        self.label(l_cond)?;
        self.emit_value(cond)?;
        self.jmp_false(l_end)?;
        self.break_labels.push(l_end);
        self.continue_labels.push(l_cond);
        self.emit_value(body)?;
        self.break_labels.pop();
        self.continue_labels.pop();
        self.jmp(l_cond)?;
        self.label(l_end)
    }

    fn emit_do_while(&mut self, a: AtomId) -> Result<()> {
        let body = self.ctx.atoms.get(a).payload.pos();
        let cond = self.ctx.atoms.arg(a, 0);
        let l_body = self.new_label();
        let l_cond = self.new_label();
        let l_end = self.new_label();
        self.label(l_body)?;
        self.break_labels.push(l_end);
        self.continue_labels.push(l_cond);
        self.emit_value(body)?;
        self.break_labels.pop();
        self.continue_labels.pop();
        self.label(l_cond)?;
        self.emit_value(cond)?;
        self.jmp_true(l_body)?;
        self.label(l_end)
    }

    /// The scrutinee stays in its stack slot for the whole dispatch; the
    /// chain compares it against each `case` target and falls through
    /// between bodies unless a `break` intervenes.
    fn emit_switch(&mut self, a: AtomId) -> Result<()> {
        let scrutinee = self.ctx.atoms.get(a).payload.pos();
        let clause_count = self.ctx.atoms.arg_count(a);
        self.emit_value(scrutinee)?;
        let l_end = self.new_label();
        let mut labels = Vec::with_capacity(clause_count);
        let mut default_label = None;
        for i in 0..clause_count {
            let clause = self.ctx.atoms.arg(a, i);
            let l = self.new_label();
            labels.push(l);
            match self.ctx.atoms.op(clause) {
                Op::Case => {
                    let target_atom = self.ctx.atoms.get(clause).payload.pos();
                    let target = match self.ctx.atoms.get(target_atom).payload {
                        Payload::Int(v) => v as i64,
                        Payload::Long(v) => v,
                        _ => return Err(self.internal("case target is not a constant")),
                    };
                    self.op("movq\t(%rsp), %rax")?;
                    self.op(&format!("cmpq\t${target}, %rax"))?;
                    self.op(&format!("je\t.L{l}"))?;
                }
                Op::Default => default_label = Some(l),
                _ => return Err(self.internal("invalid switch clause")),
            }
        }
        self.jmp(default_label.unwrap_or(l_end))?;
        self.break_labels.push(l_end);
        for i in 0..clause_count {
            let clause = self.ctx.atoms.arg(a, i);
            self.label(labels[i])?;
            let body = match self.ctx.atoms.op(clause) {
                Op::Case => self.ctx.atoms.arg(clause, 0),
                _ => self.ctx.atoms.get(clause).payload.pos(),
            };
            self.emit_value(body)?;
        }
        self.break_labels.pop();
        self.label(l_end)?;
        // discard the scrutinee
        self.op("popq\t%rax")
    }

    // ---- functions and sections --------------------------------------

    fn emit_function(&mut self, f: &Func) -> Result<()> {
        let name = self.ctx.symbols.resolve(f.name).to_string();
        self.return_label = self.new_label();
        self.op(&format!(".globl\t{name}"))?;
        self.op(&format!(".type\t{name}, @function"))?;
        writeln!(self.out, "{name}:")?;
        self.op("pushq\t%rbp")?;
        self.op("movq\t%rsp, %rbp")?;
        let frame = (f.max_offset + 15) & !15;
        if frame > 0 {
            self.op(&format!("subq\t${frame}, %rsp"))?;
        }
        if f.is_variadic {
            // spill the whole register file into the save area
            for k in 0..6 {
                let reg = arg_reg(k)?;
                let off = f.reg_save_offset - 8 * k as i32;
                self.op(&format!("movq\t{}, -{off}(%rbp)", reg.name64()))?;
            }
        } else {
            for (i, arg) in f.args.iter().enumerate() {
                let reg = arg_reg(i)?;
                let size = self.ctx.types.size(arg.ty);
                let off = arg.offset;
                match size {
                    1 => self.op(&format!("movb\t{}, -{off}(%rbp)", reg.name8()))?,
                    4 => self.op(&format!("movl\t{}, -{off}(%rbp)", reg.name32()))?,
                    _ => self.op(&format!("movq\t{}, -{off}(%rbp)", reg.name64()))?,
                }
            }
        }
        self.emit_value(f.body)?;
        self.op("xorl\t%eax, %eax")?;
        let l = self.return_label;
        self.label(l)?;
        self.op("leave")?;
        self.op("ret")?;
        writeln!(self.out)?;
        Ok(())
    }

    fn emit_global_data(&mut self, vid: VarId) -> Result<()> {
        let v = self.ctx.vars.get(vid);
        let name = self.var_name(vid).to_string();
        let ty = v.ty;
        writeln!(self.out, "{name}:")?;
        match v.init {
            Some(GlobalInit::Array(handle)) => {
                let elem = self.ctx.types.pointee(ty).unwrap_or(self.ctx.types.int_ty);
                let elem_is_str = self.ctx.types.pointee(elem).is_some();
                let directive = match self.ctx.types.size(elem) {
                    1 => ".byte",
                    4 => ".long",
                    _ => ".quad",
                };
                for &value in self.ctx.arrays.get(handle) {
                    if elem_is_str {
                        self.op(&format!(".quad\t.LC{value}"))?;
                    } else {
                        self.op(&format!("{directive}\t{value}"))?;
                    }
                }
                Ok(())
            }
            Some(GlobalInit::Str(id)) => self.op(&format!(".quad\t.LC{}", id.index())),
            Some(GlobalInit::Int(value)) => match self.ctx.types.size(ty) {
                1 => self.op(&format!(".byte\t{value}")),
                4 => self.op(&format!(".long\t{value}")),
                _ => self.op(&format!(".quad\t{value}")),
            },
            None => {
                let size = self.ctx.types.size(ty).max(1);
                self.op(&format!(".zero\t{size}"))
            }
        }
    }

    pub fn emit_program(&mut self, file: &str) -> Result<()> {
        self.op(&format!(".file\t\"{}\"", escape_asm(file)))?;
        writeln!(self.out)?;

        let globals: Vec<VarId> = self
            .ctx
            .vars
            .global_vars()
            .iter()
            .copied()
            .filter(|&vid| {
                let v = self.ctx.vars.get(vid);
                !v.flags.contains(VarFlags::CONSTANT) && !v.flags.contains(VarFlags::EXTERNAL)
            })
            .collect();
        let (arrays, scalars): (Vec<VarId>, Vec<VarId>) = globals
            .into_iter()
            .partition(|&vid| matches!(self.ctx.vars.get(vid).init, Some(GlobalInit::Array(_))));

        self.op(".section\t.rodata")?;
        let strings: Vec<(StrId, String)> = self
            .ctx
            .strings
            .iter()
            .map(|(id, s)| (id, s.to_string()))
            .collect();
        for (id, s) in strings {
            writeln!(self.out, ".LC{}:", id.index())?;
            self.op(&format!(".string\t\"{}\"", escape_asm(&s)))?;
        }
        for vid in arrays {
            self.emit_global_data(vid)?;
        }
        if !scalars.is_empty() {
            self.op(".data")?;
            for vid in scalars {
                self.emit_global_data(vid)?;
            }
        }

        self.op(".text")?;
        writeln!(self.out)?;
        for (_, f) in self.ctx.funcs.iter() {
            if f.body.is_some() {
                self.emit_function(f)?;
            }
        }
        Ok(())
    }
}

#[test]
fn test_arg_registers_are_bounded() {
    assert_eq!(ArgReg::try_from(0u8).unwrap(), ArgReg::Rdi);
    assert_eq!(ArgReg::try_from(5u8).unwrap(), ArgReg::R9);
    assert!(ArgReg::try_from(6u8).is_err());
    assert_eq!(ArgReg::Rdx.name32(), "%edx");
}

#[test]
fn test_string_escaping() {
    assert_eq!(escape_asm("%d\n"), "%d\\n");
    assert_eq!(escape_asm("a\"b\\c"), "a\\\"b\\\\c");
    assert_eq!(escape_asm("\x01"), "\\001");
}
