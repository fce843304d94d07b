use log::debug;

use crate::atom::{Atom, AtomId, Op, Payload};
use crate::compiler::Compiler;
use crate::error::{Error, Result};
use crate::funcs::FuncArg;
use crate::strings::Symbol;
use crate::token::TokenKind;
use crate::types::{TypeId, TypeKind};
use crate::vars::{GlobalInit, VarFlags, VarId};

/// At most this many arguments travel in registers; the stack-passing
/// tail of the calling convention is reserved but not implemented.
const MAX_REG_ARGS: usize = 6;

/// Register-save area: one 8-byte slot per argument register.
const REG_SAVE_BYTES: i32 = 48;

/// Recursive-descent parser lowering tokens into the flat atom pool.
///
/// Levels return `AtomId::NONE` for "nothing parsed here" and backtrack
/// the token cursor; malformed input that can no longer be anything else
/// is a hard `Err`.
pub struct Parser<'a> {
    ctx: &'a mut Compiler,
}

impl<'a> Parser<'a> {
    pub fn new(ctx: &'a mut Compiler) -> Self {
        Self { ctx }
    }

    pub fn parse_program(&mut self) -> Result<()> {
        self.ctx.vars.enter_frame(); // global scope
        while !self.ctx.tokens.eat(TokenKind::Eof) {
            if !self.parse_global_declaration()? {
                return Err(self.err_syntax("invalid declaration"));
            }
        }
        Ok(())
    }

    // ---- small helpers -----------------------------------------------

    fn eat(&mut self, kind: TokenKind) -> bool {
        self.ctx.tokens.eat(kind)
    }

    fn err_syntax(&self, message: impl Into<String>) -> Error {
        Error::syntax(self.ctx.token_loc(), message)
    }

    fn err_semantic(&self, message: impl Into<String>) -> Error {
        Error::semantic(self.ctx.token_loc(), message)
    }

    fn name(&self, sym: Symbol) -> &str {
        self.ctx.symbols.resolve(sym)
    }

    fn atom_ty(&self, a: AtomId) -> TypeId {
        self.ctx.atoms.ty(a).unwrap_or(self.ctx.types.void_ty)
    }

    /// Constant value of a folded literal atom, if it is one.
    fn const_int(&self, a: AtomId) -> Option<i64> {
        if a.is_none() || self.ctx.atoms.op(a) != Op::Integer {
            return None;
        }
        match self.ctx.atoms.get(a).payload {
            Payload::Int(v) => Some(v as i64),
            Payload::Long(v) => Some(v),
            _ => None,
        }
    }

    fn new_int_atom(&mut self, value: i32) -> Result<AtomId> {
        let ty = self.ctx.types.int_ty;
        self.ctx.atoms.new_int(Op::Integer, value, ty)
    }

    fn is_lvalue(&self, a: AtomId) -> bool {
        matches!(
            self.ctx.atoms.op(a),
            Op::VarRef | Op::GlobalRef | Op::Index | Op::Member | Op::Deref
        )
    }

    fn require_lvalue(&self, a: AtomId) -> Result<()> {
        if a.is_none() || !self.is_lvalue(a) {
            return Err(self.err_syntax("invalid left-hand side of assignment"));
        }
        Ok(())
    }

    /// Normalize an address-producing atom to one producing a value.
    /// Arrays stay as addresses (decay); everything else is wrapped in a
    /// load. Idempotent: converting twice changes nothing.
    fn rvalue(&mut self, a: AtomId) -> Result<AtomId> {
        if a.is_none() {
            return Ok(a);
        }
        let atom = *self.ctx.atoms.get(a);
        let ty = atom.ty.unwrap_or(self.ctx.types.void_ty);
        if self.ctx.types.is_array(ty) {
            return Ok(a);
        }
        match atom.op {
            Op::VarRef => self.ctx.atoms.push(Atom {
                op: Op::VarVal,
                ty: Some(ty),
                payload: atom.payload,
            }),
            Op::GlobalRef => self.ctx.atoms.push(Atom {
                op: Op::GlobalVal,
                ty: Some(ty),
                payload: atom.payload,
            }),
            Op::Index | Op::Member => self.ctx.atoms.new_pos(Op::Deref, a, ty),
            _ => Ok(a),
        }
    }

    /// Result type of a binary operation: comparisons are `int`,
    /// pointer arithmetic keeps the pointer side (decayed), and numeric
    /// operands widen to `int` at minimum.
    fn promote(&mut self, op: Op, l: TypeId, r: TypeId) -> TypeId {
        let types = &mut self.ctx.types;
        match op {
            Op::EqEq | Op::EqNe | Op::EqLt | Op::EqLe | Op::EqGt | Op::EqGe | Op::LogAnd
            | Op::LogOr => types.int_ty,
            Op::Add | Op::Sub => {
                let l_ptr = types.is_pointer(l) || types.is_array(l);
                let r_ptr = types.is_pointer(r) || types.is_array(r);
                if l_ptr && r_ptr {
                    types.long_ty
                } else if l_ptr {
                    let elem = types.pointee(l).unwrap_or(types.int_ty);
                    types.add_pointer(elem)
                } else if r_ptr && op == Op::Add {
                    let elem = types.pointee(r).unwrap_or(types.int_ty);
                    types.add_pointer(elem)
                } else if types.size(l) == 8 || types.size(r) == 8 {
                    types.long_ty
                } else {
                    types.int_ty
                }
            }
            _ => {
                if types.size(l) == 8 || types.size(r) == 8 {
                    types.long_ty
                } else {
                    types.int_ty
                }
            }
        }
    }

    fn binop(&mut self, op: Op, lhs: AtomId, rhs: AtomId) -> Result<AtomId> {
        let l = self.rvalue(lhs)?;
        let r = self.rvalue(rhs)?;
        let ty = self.promote(op, self.atom_ty(l), self.atom_ty(r));
        self.ctx.atoms.new_binop(op, l, r, ty)
    }

    /// Chain two statements; pushes nothing.
    fn andthen(&mut self, a: AtomId, b: AtomId) -> Result<AtomId> {
        let void = self.ctx.types.void_ty;
        self.ctx.atoms.new_binop(Op::AndThen, a, b, void)
    }

    fn expr_statement(&mut self, e: AtomId) -> Result<AtomId> {
        let e = self.rvalue(e)?;
        let void = self.ctx.types.void_ty;
        self.ctx.atoms.new_pos(Op::ExprStatement, e, void)
    }

    /// `rhs` coerced to `target`; a no-op unless the types differ.
    fn convert_type(&mut self, target: TypeId, rhs: AtomId) -> Result<AtomId> {
        if self.ctx.types.is_same(self.atom_ty(rhs), target) {
            return Ok(rhs);
        }
        self.ctx.atoms.new_pos(Op::Cast, rhs, target)
    }

    // ---- literals and primaries --------------------------------------

    fn eat_enum_member(&mut self) -> Option<i32> {
        let save = self.ctx.tokens.pos();
        if let Some(ident) = self.ctx.tokens.eat_ident() {
            if let Some(vid) = self.ctx.vars.find(ident) {
                let v = self.ctx.vars.get(vid);
                if v.flags.contains(VarFlags::CONSTANT) && self.ctx.types.is_enum(v.ty) {
                    return Some(v.value as i32);
                }
            }
        }
        self.ctx.tokens.set_pos(save);
        None
    }

    fn parse_string(&mut self) -> Result<AtomId> {
        if let Some(sym) = self.ctx.tokens.eat_str() {
            let text = self.ctx.symbols.resolve(sym).to_string();
            let id = self.ctx.strings.intern(&text);
            let ty = self.ctx.types.char_ptr_ty;
            return self.ctx.atoms.push(Atom {
                op: Op::Str,
                ty: Some(ty),
                payload: Payload::Str(id),
            });
        }
        Ok(AtomId::NONE)
    }

    fn parse_int_literal(&mut self) -> Result<AtomId> {
        if let Some(v) = self.ctx.tokens.eat_int() {
            return self.new_int_atom(v);
        }
        if let Some(v) = self.eat_enum_member() {
            return self.new_int_atom(v);
        }
        if let Some(c) = self.ctx.tokens.eat_char() {
            let ty = self.ctx.types.char_ty;
            return self.ctx.atoms.new_int(Op::Integer, c as i32, ty);
        }
        if let Some(v) = self.ctx.tokens.eat_long() {
            let ty = self.ctx.types.long_ty;
            return self.ctx.atoms.new_long(Op::Integer, v, ty);
        }
        Ok(AtomId::NONE)
    }

    fn parse_literal(&mut self) -> Result<AtomId> {
        let pos = self.parse_string()?;
        if pos.is_some() {
            return Ok(pos);
        }
        self.parse_int_literal()
    }

    fn parse_var_name(&mut self) -> Option<VarId> {
        let save = self.ctx.tokens.pos();
        let ident = self.ctx.tokens.eat_ident()?;
        match self.ctx.vars.find(ident) {
            Some(vid) => Some(vid),
            None => {
                self.ctx.tokens.set_pos(save);
                None
            }
        }
    }

    fn parse_var(&mut self) -> Result<AtomId> {
        let Some(vid) = self.parse_var_name() else {
            return Ok(AtomId::NONE);
        };
        let v = self.ctx.vars.get(vid).clone();
        if v.flags.contains(VarFlags::CONSTANT) {
            return self.new_int_atom(v.value as i32);
        }
        if v.flags.contains(VarFlags::GLOBAL) {
            return self.ctx.atoms.push(Atom {
                op: Op::GlobalRef,
                ty: Some(v.ty),
                payload: Payload::Var(vid),
            });
        }
        self.ctx.atoms.push(Atom {
            op: Op::VarRef,
            ty: Some(v.ty),
            payload: Payload::Offset(v.offset),
        })
    }

    fn parse_primary(&mut self) -> Result<AtomId> {
        let save = self.ctx.tokens.pos();

        let pos = self.parse_literal()?;
        if pos.is_some() {
            return Ok(pos);
        }
        let pos = self.parse_var()?;
        if pos.is_some() {
            return Ok(pos);
        }

        if !self.eat(TokenKind::LParen) {
            return Ok(AtomId::NONE);
        }
        let pos = self.parse_expr_sequence()?;
        if pos.is_none() {
            self.ctx.tokens.set_pos(save);
            return Ok(AtomId::NONE);
        }
        if !self.eat(TokenKind::RParen) {
            return Err(self.err_syntax("missing ')' after '('"));
        }
        Ok(pos)
    }

    // ---- postfix -----------------------------------------------------

    fn parse_apply(&mut self) -> Result<AtomId> {
        let save = self.ctx.tokens.pos();
        let Some(ident) = self.ctx.tokens.eat_ident() else {
            return Ok(AtomId::NONE);
        };
        let Some(fid) = self.ctx.funcs.find(ident) else {
            self.ctx.tokens.set_pos(save);
            return Ok(AtomId::NONE);
        };
        if !self.eat(TokenKind::LParen) {
            return Err(self.err_syntax("no '(' after function name"));
        }
        let mut args = Vec::new();
        while !self.eat(TokenKind::RParen) {
            if !args.is_empty() && !self.eat(TokenKind::Comma) {
                return Err(self.err_syntax("no comma between arguments"));
            }
            let e = self.parse_expr()?;
            if e.is_none() {
                return Err(self.err_syntax("invalid argument expression"));
            }
            let e = self.rvalue(e)?;
            args.push(e);
        }
        let f = self.ctx.funcs.get(fid);
        let fname = self.name(f.name).to_string();
        let declared = f.args.len();
        let ok = if f.is_variadic {
            args.len() >= declared
        } else {
            args.len() == declared
        };
        if !ok {
            return Err(self.err_semantic(format!("wrong number of arguments calling '{fname}'")));
        }
        if args.len() > MAX_REG_ARGS {
            return Err(self.err_semantic(format!(
                "too many arguments calling '{fname}' (at most {MAX_REG_ARGS} register arguments)"
            )));
        }
        let ret = self.ctx.funcs.get(fid).ret;
        let head = self.ctx.atoms.push(Atom {
            op: Op::Apply,
            ty: Some(ret),
            payload: Payload::Func(fid),
        })?;
        for a in args {
            self.ctx.atoms.new_arg(a)?;
        }
        Ok(head)
    }

    fn parse_member_access(&mut self, pos: AtomId) -> Result<AtomId> {
        let base = if self.eat(TokenKind::Dot) {
            pos
        } else if self.eat(TokenKind::Arrow) {
            let rv = self.rvalue(pos)?;
            let ty = self.atom_ty(rv);
            let Some(record) = self.ctx.types.pointee(ty) else {
                return Err(self.err_semantic("'->' applied to a non-pointer"));
            };
            self.ctx.atoms.new_pos(Op::Deref, rv, record)?
        } else {
            return Ok(pos);
        };
        if !self.is_lvalue(base) {
            return Err(self.err_semantic("member access on a non-lvalue"));
        }
        let Some(name) = self.ctx.tokens.eat_ident() else {
            return Err(self.err_syntax("invalid member name"));
        };
        let record = self.atom_ty(base);
        let Some(member) = self.ctx.types.find_struct_member(record, name) else {
            let spelled = self.name(name).to_string();
            return Err(self.err_semantic(format!("this type has no member named '{spelled}'")));
        };
        let head = self.ctx.atoms.new_pos(Op::Member, base, member.ty)?;
        self.ctx.atoms.push(Atom {
            op: Op::Arg,
            ty: None,
            payload: Payload::Offset(member.offset),
        })?;
        Ok(head)
    }

    fn alloc_index(&mut self, base: AtomId, index_rv: AtomId) -> Result<AtomId> {
        let base_rv = self.rvalue(base)?;
        let bt = self.atom_ty(base_rv);
        let Some(elem) = self.ctx.types.pointee(bt) else {
            return Err(self.err_semantic("indexing a value that is not an array or pointer"));
        };
        self.ctx.atoms.new_binop(Op::Index, base_rv, index_rv, elem)
    }

    fn parse_index(&mut self, pos: AtomId) -> Result<AtomId> {
        if !self.eat(TokenKind::LBracket) {
            return Ok(pos);
        }
        let index = self.parse_expr_sequence()?;
        if index.is_none() {
            return Err(self.err_syntax("invalid array index"));
        }
        if !self.eat(TokenKind::RBracket) {
            return Err(self.err_syntax("no closing ']'"));
        }
        let index = self.rvalue(index)?;
        self.alloc_index(pos, index)
    }

    fn parse_postfix_incdec(&mut self, pos: AtomId) -> Result<AtomId> {
        let op = if self.eat(TokenKind::Inc) {
            Op::PostfixInc
        } else if self.eat(TokenKind::Dec) {
            Op::PostfixDec
        } else {
            return Ok(pos);
        };
        self.require_lvalue(pos)?;
        let ty = self.atom_ty(pos);
        self.ctx.atoms.new_pos(op, pos, ty)
    }

    fn parse_postfix(&mut self) -> Result<AtomId> {
        let save = self.ctx.tokens.pos();
        let mut pos = self.parse_primary()?;
        if pos.is_none() {
            pos = self.parse_apply()?;
            if pos.is_none() {
                self.ctx.tokens.set_pos(save);
                return Ok(AtomId::NONE);
            }
        }
        loop {
            let prev = pos;
            pos = self.parse_member_access(pos)?;
            pos = self.parse_index(pos)?;
            pos = self.parse_postfix_incdec(pos)?;
            if pos == prev {
                break;
            }
        }
        Ok(pos)
    }

    // ---- prefix ------------------------------------------------------

    fn parse_cast(&mut self) -> Result<AtomId> {
        let save = self.ctx.tokens.pos();
        if !self.eat(TokenKind::LParen) {
            return Ok(AtomId::NONE);
        }
        let Some(t) = self.parse_type_declaration()? else {
            self.ctx.tokens.set_pos(save);
            return Ok(AtomId::NONE);
        };
        let t = self.parse_pointer(t);
        if !self.eat(TokenKind::RParen) {
            return Err(self.err_syntax("invalid end of cast"));
        }
        let e = self.parse_unary()?;
        if e.is_none() {
            // not a cast after all; likely the operand of sizeof(type)
            self.ctx.tokens.set_pos(save);
            return Ok(AtomId::NONE);
        }
        let e = self.rvalue(e)?;
        self.ctx.atoms.new_pos(Op::Cast, e, t)
    }

    fn parse_sizeof(&mut self) -> Result<AtomId> {
        if !self.eat(TokenKind::Sizeof) {
            return Ok(AtomId::NONE);
        }
        let e = self.parse_unary()?;
        if e.is_some() {
            let ty = self.atom_ty(e);
            let ty = if self.ctx.types.is_array(ty) {
                ty
            } else {
                let rv = self.rvalue(e)?;
                self.atom_ty(rv)
            };
            let size = self.ctx.types.size(ty);
            return self.new_int_atom(size);
        }
        if !self.eat(TokenKind::LParen) {
            return Err(self.err_syntax("invalid expression after sizeof"));
        }
        let Some(t) = self.parse_type_declaration()? else {
            return Err(self.err_syntax("no type name in sizeof()"));
        };
        let t = self.parse_pointer(t);
        if !self.eat(TokenKind::RParen) {
            return Err(self.err_syntax("no closing ')' after sizeof(type"));
        }
        let size = self.ctx.types.size(t);
        self.new_int_atom(size)
    }

    fn parse_logical_not(&mut self) -> Result<AtomId> {
        if !self.eat(TokenKind::Not) {
            return Ok(AtomId::NONE);
        }
        let e = self.parse_unary()?;
        if e.is_none() {
            return Err(self.err_syntax("invalid '!'"));
        }
        let e = self.rvalue(e)?;
        if let Some(v) = self.const_int(e) {
            return self.new_int_atom((v == 0) as i32);
        }
        let ty = self.ctx.types.int_ty;
        self.ctx.atoms.new_pos(Op::LogNot, e, ty)
    }

    fn parse_bitwise_not(&mut self) -> Result<AtomId> {
        if !self.eat(TokenKind::Tilde) {
            return Ok(AtomId::NONE);
        }
        let e = self.parse_unary()?;
        if e.is_none() {
            return Err(self.err_syntax("invalid '~'"));
        }
        let e = self.rvalue(e)?;
        if let Some(v) = self.const_int(e) {
            return self.new_int_atom(!(v as i32));
        }
        let ty = self.ctx.types.int_ty;
        self.ctx.atoms.new_pos(Op::Neg, e, ty)
    }

    fn parse_signed(&mut self) -> Result<AtomId> {
        if self.eat(TokenKind::Plus) {
            let e = self.parse_unary()?;
            if e.is_none() {
                return Err(self.err_syntax("invalid '+'"));
            }
            return Ok(e);
        }
        if self.eat(TokenKind::Minus) {
            let e = self.parse_unary()?;
            if e.is_none() {
                return Err(self.err_syntax("invalid '-'"));
            }
            let e = self.rvalue(e)?;
            if let Some(v) = self.const_int(e) {
                return self.new_int_atom(-(v as i32));
            }
            let zero = self.new_int_atom(0)?;
            return self.binop(Op::Sub, zero, e);
        }
        Ok(AtomId::NONE)
    }

    fn parse_addr(&mut self) -> Result<AtomId> {
        if !self.eat(TokenKind::Amp) {
            return Ok(AtomId::NONE);
        }
        let e = self.parse_unary()?;
        if e.is_none() {
            return Err(self.err_syntax("invalid expression after '&'"));
        }
        self.require_lvalue(e)?;
        let ty = self.atom_ty(e);
        // &array decays to a pointer to the element type
        let target = self.ctx.types.pointee(ty).filter(|_| self.ctx.types.is_array(ty));
        let ptr_ty = match target {
            Some(elem) => self.ctx.types.add_pointer(elem),
            None => self.ctx.types.add_pointer(ty),
        };
        self.ctx.atoms.new_pos(Op::Ptr, e, ptr_ty)
    }

    fn parse_deref(&mut self) -> Result<AtomId> {
        if !self.eat(TokenKind::Star) {
            return Ok(AtomId::NONE);
        }
        let e = self.parse_unary()?;
        if e.is_none() {
            return Err(self.err_syntax("invalid expression after '*'"));
        }
        let rv = self.rvalue(e)?;
        let Some(target) = self.ctx.types.pointee(self.atom_ty(rv)) else {
            return Err(self.err_semantic("dereferencing a non-pointer"));
        };
        self.ctx.atoms.new_pos(Op::Deref, rv, target)
    }

    fn parse_prefix_incdec(&mut self) -> Result<AtomId> {
        let op = if self.eat(TokenKind::Inc) {
            Op::Add
        } else if self.eat(TokenKind::Dec) {
            Op::Sub
        } else {
            return Ok(AtomId::NONE);
        };
        let e = self.parse_postfix()?;
        if e.is_none() {
            return Err(self.err_syntax("invalid expression after '++'/'--'"));
        }
        let one = self.new_int_atom(1)?;
        self.alloc_assign_op(op, e, one)
    }

    fn parse_unary(&mut self) -> Result<AtomId> {
        let pos = self.parse_postfix()?;
        if pos.is_some() {
            return Ok(pos);
        }
        let pos = self.parse_cast()?;
        if pos.is_some() {
            return Ok(pos);
        }
        let pos = self.parse_sizeof()?;
        if pos.is_some() {
            return Ok(pos);
        }
        let pos = self.parse_logical_not()?;
        if pos.is_some() {
            return Ok(pos);
        }
        let pos = self.parse_bitwise_not()?;
        if pos.is_some() {
            return Ok(pos);
        }
        let pos = self.parse_signed()?;
        if pos.is_some() {
            return Ok(pos);
        }
        let pos = self.parse_addr()?;
        if pos.is_some() {
            return Ok(pos);
        }
        let pos = self.parse_deref()?;
        if pos.is_some() {
            return Ok(pos);
        }
        self.parse_prefix_incdec()
    }

    // ---- binary operator levels --------------------------------------

    fn parse_multiplicative(&mut self) -> Result<AtomId> {
        let mut lhs = self.parse_unary()?;
        if lhs.is_none() {
            return Ok(AtomId::NONE);
        }
        loop {
            let op = if self.eat(TokenKind::Star) {
                Op::Mul
            } else if self.eat(TokenKind::Slash) {
                Op::Div
            } else if self.eat(TokenKind::Percent) {
                Op::Mod
            } else {
                break;
            };
            let rhs = self.parse_unary()?;
            if rhs.is_none() {
                return Err(self.err_syntax("missing right operand for '*', '/' or '%'"));
            }
            lhs = self.binop(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<AtomId> {
        let mut lhs = self.parse_multiplicative()?;
        if lhs.is_none() {
            return Ok(AtomId::NONE);
        }
        loop {
            let op = if self.eat(TokenKind::Plus) {
                Op::Add
            } else if self.eat(TokenKind::Minus) {
                Op::Sub
            } else {
                break;
            };
            let rhs = self.parse_multiplicative()?;
            if rhs.is_none() {
                return Err(self.err_syntax("missing right operand for '+' or '-'"));
            }
            lhs = self.binop(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn parse_shift(&mut self) -> Result<AtomId> {
        let mut lhs = self.parse_additive()?;
        if lhs.is_none() {
            return Ok(AtomId::NONE);
        }
        loop {
            let op = if self.eat(TokenKind::Shl) {
                Op::Shl
            } else if self.eat(TokenKind::Shr) {
                Op::Shr
            } else {
                break;
            };
            let rhs = self.parse_additive()?;
            if rhs.is_none() {
                return Err(self.err_syntax("missing right operand for shift"));
            }
            lhs = self.binop(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> Result<AtomId> {
        let mut lhs = self.parse_shift()?;
        if lhs.is_none() {
            return Ok(AtomId::NONE);
        }
        loop {
            let op = if self.eat(TokenKind::Le) {
                Op::EqLe
            } else if self.eat(TokenKind::Lt) {
                Op::EqLt
            } else if self.eat(TokenKind::Ge) {
                Op::EqGe
            } else if self.eat(TokenKind::Gt) {
                Op::EqGt
            } else {
                break;
            };
            let rhs = self.parse_shift()?;
            if rhs.is_none() {
                return Err(self.err_syntax("missing right operand for comparison"));
            }
            lhs = self.binop(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<AtomId> {
        let mut lhs = self.parse_relational()?;
        if lhs.is_none() {
            return Ok(AtomId::NONE);
        }
        loop {
            let op = if self.eat(TokenKind::EqEq) {
                Op::EqEq
            } else if self.eat(TokenKind::Ne) {
                Op::EqNe
            } else {
                break;
            };
            let rhs = self.parse_relational()?;
            if rhs.is_none() {
                return Err(self.err_syntax("missing right operand for '==' or '!='"));
            }
            lhs = self.binop(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn parse_bitwise_and(&mut self) -> Result<AtomId> {
        let mut lhs = self.parse_equality()?;
        if lhs.is_none() {
            return Ok(AtomId::NONE);
        }
        while self.eat(TokenKind::Amp) {
            let rhs = self.parse_equality()?;
            if rhs.is_none() {
                return Err(self.err_syntax("missing right operand for '&'"));
            }
            lhs = self.binop(Op::And, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn parse_bitwise_xor(&mut self) -> Result<AtomId> {
        let mut lhs = self.parse_bitwise_and()?;
        if lhs.is_none() {
            return Ok(AtomId::NONE);
        }
        while self.eat(TokenKind::Caret) {
            let rhs = self.parse_bitwise_and()?;
            if rhs.is_none() {
                return Err(self.err_syntax("missing right operand for '^'"));
            }
            lhs = self.binop(Op::Xor, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn parse_bitwise_or(&mut self) -> Result<AtomId> {
        let mut lhs = self.parse_bitwise_xor()?;
        if lhs.is_none() {
            return Ok(AtomId::NONE);
        }
        while self.eat(TokenKind::Pipe) {
            let rhs = self.parse_bitwise_xor()?;
            if rhs.is_none() {
                return Err(self.err_syntax("missing right operand for '|'"));
            }
            lhs = self.binop(Op::Or, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn parse_logical_and(&mut self) -> Result<AtomId> {
        let mut lhs = self.parse_bitwise_or()?;
        if lhs.is_none() {
            return Ok(AtomId::NONE);
        }
        while self.eat(TokenKind::AndAnd) {
            let rhs = self.parse_bitwise_or()?;
            if rhs.is_none() {
                return Err(self.err_syntax("missing right operand for '&&'"));
            }
            lhs = self.binop(Op::LogAnd, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn parse_logical_or(&mut self) -> Result<AtomId> {
        let mut lhs = self.parse_logical_and()?;
        if lhs.is_none() {
            return Ok(AtomId::NONE);
        }
        while self.eat(TokenKind::OrOr) {
            let rhs = self.parse_logical_and()?;
            if rhs.is_none() {
                return Err(self.err_syntax("missing right operand for '||'"));
            }
            lhs = self.binop(Op::LogOr, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn parse_value(&mut self) -> Result<AtomId> {
        self.parse_logical_or()
    }

    // ---- assignment, ternary, sequencing -----------------------------

    fn parse_variable_initializer(&mut self, lhs: AtomId) -> Result<AtomId> {
        let rhs = self.parse_expr()?;
        if rhs.is_none() {
            return Err(self.err_syntax("cannot bind - no rvalue"));
        }
        self.require_lvalue(lhs)?;
        let target = self.atom_ty(lhs);
        let size = self.ctx.types.size(target);
        if !matches!(size, 1 | 4 | 8) {
            return Err(self.err_semantic("unsupported assignment size"));
        }
        let rhs = self.rvalue(rhs)?;
        let rhs = self.convert_type(target, rhs)?;
        self.ctx.atoms.new_binop(Op::Bind, rhs, lhs, target)
    }

    fn parse_assignment(&mut self, lval: AtomId) -> Result<AtomId> {
        if !self.eat(TokenKind::Assign) {
            return Ok(AtomId::NONE);
        }
        self.parse_variable_initializer(lval)
    }

    /// `lhs ⊕= rhs` lowers to `lhs = (lhs ⊕ rhs)`, sharing the lhs atom.
    fn alloc_assign_op(&mut self, op: Op, lval: AtomId, rhs: AtomId) -> Result<AtomId> {
        self.require_lvalue(lval)?;
        let result = self.binop(op, lval, rhs)?;
        let target = self.atom_ty(lval);
        self.ctx.atoms.new_binop(Op::Bind, result, lval, target)
    }

    fn parse_compound_assignment(&mut self, lval: AtomId) -> Result<AtomId> {
        let op = if self.eat(TokenKind::PlusAssign) {
            Op::Add
        } else if self.eat(TokenKind::MinusAssign) {
            Op::Sub
        } else if self.eat(TokenKind::StarAssign) {
            Op::Mul
        } else if self.eat(TokenKind::SlashAssign) {
            Op::Div
        } else if self.eat(TokenKind::PercentAssign) {
            Op::Mod
        } else if self.eat(TokenKind::AmpAssign) {
            Op::And
        } else if self.eat(TokenKind::PipeAssign) {
            Op::Or
        } else if self.eat(TokenKind::CaretAssign) {
            Op::Xor
        } else if self.eat(TokenKind::ShlAssign) {
            Op::Shl
        } else if self.eat(TokenKind::ShrAssign) {
            Op::Shr
        } else {
            return Ok(lval);
        };
        let rhs = self.parse_expr()?;
        if rhs.is_none() {
            return Err(self.err_syntax("no expression after compound assignment"));
        }
        let rhs = self.rvalue(rhs)?;
        self.alloc_assign_op(op, lval, rhs)
    }

    fn parse_ternary(&mut self, cond: AtomId) -> Result<AtomId> {
        if !self.eat(TokenKind::Question) {
            return Ok(AtomId::NONE);
        }
        let a = self.parse_expr()?;
        if a.is_none() {
            return Err(self.err_syntax("invalid first value for ternary operator"));
        }
        if !self.eat(TokenKind::Colon) {
            return Err(self.err_syntax("no colon for ternary operator"));
        }
        let b = self.parse_expr()?;
        if b.is_none() {
            return Err(self.err_syntax("no second value for ternary operator"));
        }
        let first = self.rvalue(a)?;
        let second = self.rvalue(b)?;
        let cond = self.rvalue(cond)?;
        let ty = self.atom_ty(first);
        let head = self.ctx.atoms.new_pos(Op::Ternary, cond, ty)?;
        self.ctx.atoms.new_arg(first)?;
        self.ctx.atoms.new_arg(second)?;
        Ok(head)
    }

    fn parse_expr(&mut self) -> Result<AtomId> {
        let mut lval = self.parse_value()?;
        if lval.is_none() {
            return Ok(AtomId::NONE);
        }
        loop {
            let prev = lval;
            let t = self.parse_ternary(lval)?;
            if t.is_some() {
                lval = t;
                continue;
            }
            let a = self.parse_assignment(lval)?;
            if a.is_some() {
                lval = a;
                continue;
            }
            lval = self.parse_compound_assignment(lval)?;
            if lval == prev {
                break;
            }
        }
        Ok(lval)
    }

    /// `a, b, c` evaluates left to right; only the last value remains.
    fn parse_expr_sequence(&mut self) -> Result<AtomId> {
        let mut lval = self.parse_expr()?;
        if lval.is_none() {
            return Ok(AtomId::NONE);
        }
        while self.eat(TokenKind::Comma) {
            let next = self.parse_expr()?;
            if next.is_none() {
                return Err(self.err_syntax("no expression after comma"));
            }
            let dropped = self.expr_statement(lval)?;
            let ty = self.atom_ty(next);
            lval = self.ctx.atoms.new_binop(Op::AndThen, dropped, next, ty)?;
        }
        Ok(lval)
    }

    // ---- statements --------------------------------------------------

    fn parse_expr_statement(&mut self) -> Result<AtomId> {
        let save = self.ctx.tokens.pos();
        let pos = self.parse_expr_sequence()?;
        if pos.is_some() && self.eat(TokenKind::Semicolon) {
            return self.expr_statement(pos);
        }
        self.ctx.tokens.set_pos(save);
        Ok(AtomId::NONE)
    }

    fn parse_if_statement(&mut self) -> Result<AtomId> {
        if !self.eat(TokenKind::If) {
            return Ok(AtomId::NONE);
        }
        if !self.eat(TokenKind::LParen) {
            return Err(self.err_syntax("no '(' after if"));
        }
        let cond = self.parse_expr_sequence()?;
        if cond.is_none() {
            return Err(self.err_syntax("no condition for if"));
        }
        if !self.eat(TokenKind::RParen) {
            return Err(self.err_syntax("no ')' after if condition"));
        }
        let body = self.parse_block_or_statement()?;
        if body.is_none() {
            return Err(self.err_syntax("no body after if"));
        }
        let mut else_body = AtomId::NONE;
        if self.eat(TokenKind::Else) {
            else_body = self.parse_block_or_statement()?;
            if else_body.is_none() {
                return Err(self.err_syntax("no body after else"));
            }
        }
        let cond = self.rvalue(cond)?;
        let void = self.ctx.types.void_ty;
        let head = self.ctx.atoms.new_pos(Op::If, cond, void)?;
        self.ctx.atoms.new_arg(body)?;
        self.ctx.atoms.new_arg(else_body)?;
        Ok(head)
    }

    fn wrap_expr_sequence(&mut self, pos: AtomId) -> Result<AtomId> {
        if pos.is_none() {
            return self.ctx.atoms.new_nop();
        }
        self.expr_statement(pos)
    }

    fn parse_for_statement(&mut self) -> Result<AtomId> {
        if !self.eat(TokenKind::For) {
            return Ok(AtomId::NONE);
        }
        if !self.eat(TokenKind::LParen) {
            return Err(self.err_syntax("no condition part after 'for'"));
        }
        self.ctx.vars.enter_frame();
        let mut pre = self.parse_local_variable_declaration()?;
        if pre.is_none() {
            pre = self.parse_expr_statement()?;
        }
        if pre.is_none() {
            if self.eat(TokenKind::Semicolon) {
                pre = self.ctx.atoms.new_nop()?;
            } else {
                return Err(self.err_syntax("invalid first clause of 'for'"));
            }
        }
        let mut cond = self.parse_expr_sequence()?;
        if cond.is_none() {
            cond = self.new_int_atom(1)?;
        }
        if !self.eat(TokenKind::Semicolon) {
            return Err(self.err_syntax("invalid second clause of 'for'"));
        }
        let post_seq = self.parse_expr_sequence()?;
        let post = self.wrap_expr_sequence(post_seq)?;
        if !self.eat(TokenKind::RParen) {
            return Err(self.err_syntax("invalid end of 'for' clauses"));
        }
        let body = self.parse_block_or_statement()?;
        self.ctx.vars.exit_frame();
        if body.is_none() {
            return Err(self.err_syntax("no body for 'for'"));
        }
        let cond = self.rvalue(cond)?;
        let void = self.ctx.types.void_ty;
        let head = self.ctx.atoms.new_pos(Op::For, body, void)?;
        self.ctx.atoms.new_arg(cond)?;
        self.ctx.atoms.new_arg(pre)?;
        self.ctx.atoms.new_arg(post)?;
        Ok(head)
    }

    fn parse_while_statement(&mut self) -> Result<AtomId> {
        if !self.eat(TokenKind::While) {
            return Ok(AtomId::NONE);
        }
        if !self.eat(TokenKind::LParen) {
            return Err(self.err_syntax("no condition part after 'while'"));
        }
        let cond = self.parse_expr_sequence()?;
        if cond.is_none() {
            return Err(self.err_syntax("no condition for 'while'"));
        }
        if !self.eat(TokenKind::RParen) {
            return Err(self.err_syntax("invalid end of 'while' condition"));
        }
        let body = self.parse_block_or_statement()?;
        if body.is_none() {
            return Err(self.err_syntax("no body for 'while'"));
        }
        let cond = self.rvalue(cond)?;
        let void = self.ctx.types.void_ty;
        let head = self.ctx.atoms.new_pos(Op::While, body, void)?;
        self.ctx.atoms.new_arg(cond)?;
        Ok(head)
    }

    fn parse_do_while_statement(&mut self) -> Result<AtomId> {
        if !self.eat(TokenKind::Do) {
            return Ok(AtomId::NONE);
        }
        let body = self.parse_block()?;
        if body.is_none() {
            return Err(self.err_syntax("no block after do-while's 'do'"));
        }
        if !self.eat(TokenKind::While) {
            return Err(self.err_syntax("no 'while' after do-while body"));
        }
        if !self.eat(TokenKind::LParen) {
            return Err(self.err_syntax("no condition for do-while"));
        }
        let cond = self.parse_expr_sequence()?;
        if cond.is_none() {
            return Err(self.err_syntax("no condition for do-while"));
        }
        if !self.eat(TokenKind::RParen) {
            return Err(self.err_syntax("invalid end of do-while condition"));
        }
        if !self.eat(TokenKind::Semicolon) {
            return Err(self.err_syntax("no ';' after do-while"));
        }
        let cond = self.rvalue(cond)?;
        let void = self.ctx.types.void_ty;
        let head = self.ctx.atoms.new_pos(Op::DoWhile, body, void)?;
        self.ctx.atoms.new_arg(cond)?;
        Ok(head)
    }

    fn parse_break_statement(&mut self) -> Result<AtomId> {
        if !self.eat(TokenKind::Break) {
            return Ok(AtomId::NONE);
        }
        if !self.eat(TokenKind::Semicolon) {
            return Err(self.err_syntax("no ';' after break"));
        }
        let void = self.ctx.types.void_ty;
        self.ctx.atoms.new_pos(Op::Break, AtomId::NONE, void)
    }

    fn parse_continue_statement(&mut self) -> Result<AtomId> {
        if !self.eat(TokenKind::Continue) {
            return Ok(AtomId::NONE);
        }
        if !self.eat(TokenKind::Semicolon) {
            return Err(self.err_syntax("no ';' after continue"));
        }
        let void = self.ctx.types.void_ty;
        self.ctx.atoms.new_pos(Op::Continue, AtomId::NONE, void)
    }

    fn parse_return_statement(&mut self) -> Result<AtomId> {
        if !self.eat(TokenKind::Return) {
            return Ok(AtomId::NONE);
        }
        let mut pos = self.parse_expr_sequence()?;
        if pos.is_some() {
            pos = self.rvalue(pos)?;
        }
        if !self.eat(TokenKind::Semicolon) {
            return Err(self.err_syntax("invalid expression for return"));
        }
        let ty = if pos.is_none() {
            self.ctx.types.void_ty
        } else {
            self.atom_ty(pos)
        };
        self.ctx.atoms.new_pos(Op::Return, pos, ty)
    }

    fn parse_case_clause(&mut self) -> Result<AtomId> {
        if !self.eat(TokenKind::Case) {
            return Ok(AtomId::NONE);
        }
        let target = self.parse_int_literal()?;
        if target.is_none() {
            return Err(self.err_syntax("no target value for 'case'"));
        }
        if !self.eat(TokenKind::Colon) {
            return Err(self.err_syntax("':' is needed after case target"));
        }
        let body = self.parse_block_or_statement_series()?;
        let void = self.ctx.types.void_ty;
        let head = self.ctx.atoms.new_pos(Op::Case, target, void)?;
        self.ctx.atoms.new_arg(body)?;
        Ok(head)
    }

    fn parse_default_clause(&mut self) -> Result<AtomId> {
        if !self.eat(TokenKind::Default) {
            return Ok(AtomId::NONE);
        }
        if !self.eat(TokenKind::Colon) {
            return Err(self.err_syntax("':' is needed after 'default'"));
        }
        let body = self.parse_block_or_statement_series()?;
        let void = self.ctx.types.void_ty;
        self.ctx.atoms.new_pos(Op::Default, body, void)
    }

    fn parse_switch_statement(&mut self) -> Result<AtomId> {
        if !self.eat(TokenKind::Switch) {
            return Ok(AtomId::NONE);
        }
        if !self.eat(TokenKind::LParen) {
            return Err(self.err_syntax("no target expression for 'switch'"));
        }
        let scrutinee = self.parse_expr_sequence()?;
        if scrutinee.is_none() {
            return Err(self.err_syntax("invalid target expression for 'switch'"));
        }
        if !self.eat(TokenKind::RParen) {
            return Err(self.err_syntax("invalid end of expression for 'switch'"));
        }
        if !self.eat(TokenKind::LBrace) {
            return Err(self.err_syntax("no body for 'switch'"));
        }
        let mut clauses = Vec::new();
        loop {
            let clause = self.parse_case_clause()?;
            if clause.is_none() {
                break;
            }
            clauses.push(clause);
        }
        let default = self.parse_default_clause()?;
        if default.is_some() {
            clauses.push(default);
        }
        if !self.eat(TokenKind::RBrace) {
            return Err(self.err_syntax("invalid end of 'switch' body"));
        }
        let scrutinee = self.rvalue(scrutinee)?;
        let void = self.ctx.types.void_ty;
        let head = self.ctx.atoms.new_pos(Op::Switch, scrutinee, void)?;
        for clause in clauses {
            self.ctx.atoms.new_arg(clause)?;
        }
        Ok(head)
    }

    fn parse_statement(&mut self) -> Result<AtomId> {
        if self.eat(TokenKind::Semicolon) {
            return self.ctx.atoms.new_nop();
        }
        let pos = self.parse_local_variable_declaration()?;
        if pos.is_some() {
            return Ok(pos);
        }
        let pos = self.parse_if_statement()?;
        if pos.is_some() {
            return Ok(pos);
        }
        let pos = self.parse_for_statement()?;
        if pos.is_some() {
            return Ok(pos);
        }
        let pos = self.parse_while_statement()?;
        if pos.is_some() {
            return Ok(pos);
        }
        let pos = self.parse_do_while_statement()?;
        if pos.is_some() {
            return Ok(pos);
        }
        let pos = self.parse_return_statement()?;
        if pos.is_some() {
            return Ok(pos);
        }
        let pos = self.parse_break_statement()?;
        if pos.is_some() {
            return Ok(pos);
        }
        let pos = self.parse_continue_statement()?;
        if pos.is_some() {
            return Ok(pos);
        }
        let pos = self.parse_switch_statement()?;
        if pos.is_some() {
            return Ok(pos);
        }
        self.parse_expr_statement()
    }

    fn parse_block_or_statement(&mut self) -> Result<AtomId> {
        let pos = self.parse_statement()?;
        if pos.is_some() {
            return Ok(pos);
        }
        self.parse_block()
    }

    fn parse_block_or_statement_series(&mut self) -> Result<AtomId> {
        let mut pos = self.ctx.atoms.new_nop()?;
        loop {
            let next = self.parse_block_or_statement()?;
            if next.is_none() {
                break;
            }
            pos = self.andthen(pos, next)?;
        }
        Ok(pos)
    }

    fn parse_block(&mut self) -> Result<AtomId> {
        if !self.eat(TokenKind::LBrace) {
            return Ok(AtomId::NONE);
        }
        self.ctx.vars.enter_frame();
        let series = self.parse_block_or_statement_series()?;
        if !self.eat(TokenKind::RBrace) {
            return Err(self.err_syntax("invalid block end"));
        }
        self.ctx.vars.exit_frame();
        Ok(series)
    }

    // ---- types -------------------------------------------------------

    fn parse_primitive_type(&mut self) -> Result<Option<TypeId>> {
        let save = self.ctx.tokens.pos();
        let Some(name) = self.ctx.tokens.eat_ident() else {
            return Ok(None);
        };
        match self.ctx.types.find(name) {
            Some(t) => Ok(Some(t)),
            None => {
                self.ctx.tokens.set_pos(save);
                Ok(None)
            }
        }
    }

    /// `[N]` suffixes, innermost last: `int a[2][3]` is array 2 of array 3.
    fn parse_array_declare(&mut self, t: TypeId) -> Result<TypeId> {
        if !self.eat(TokenKind::LBracket) {
            return Ok(t);
        }
        let len_expr = self.parse_expr()?;
        if !self.eat(TokenKind::RBracket) {
            return Err(self.err_syntax("array declarator doesn't have a closing ']'"));
        }
        let len = if len_expr.is_none() {
            0
        } else if let Some(v) = self.const_int(len_expr) {
            v as i32
        } else {
            return Err(self.err_syntax("array length is not constant"));
        };
        let inner = self.parse_array_declare(t)?;
        Ok(self.ctx.types.add_array(inner, len))
    }

    fn parse_enum_type(&mut self) -> Result<Option<TypeId>> {
        if !self.eat(TokenKind::Enum) {
            return Ok(None);
        }
        let tag = self.ctx.tokens.eat_ident();
        let t = self.ctx.types.add_enum(tag);
        if self.eat(TokenKind::LBrace) {
            loop {
                let Some(member) = self.ctx.tokens.eat_ident() else {
                    return Err(self.err_syntax("enum member: expected identifier"));
                };
                let mut value = {
                    let decl = self.ctx.types.enum_decl_mut(t).expect("enum type");
                    let v = decl.next_value;
                    decl.next_value += 1;
                    v
                };
                if self.eat(TokenKind::Assign) {
                    let Some(v) = self.ctx.tokens.eat_int() else {
                        let spelled = self.name(member).to_string();
                        return Err(
                            self.err_syntax(format!("invalid value for enum member '{spelled}'"))
                        );
                    };
                    value = v;
                    let decl = self.ctx.types.enum_decl_mut(t).expect("enum type");
                    decl.next_value = v + 1;
                }
                self.ctx.vars.add_constant(member, t, value as i64);
                if self.eat(TokenKind::Comma) {
                    if self.eat(TokenKind::RBrace) {
                        break;
                    }
                } else if self.eat(TokenKind::RBrace) {
                    break;
                } else {
                    return Err(self.err_syntax("syntax error in enum member declaration"));
                }
            }
        }
        Ok(Some(t))
    }

    fn parse_struct_member_declare(&mut self, record: TypeId) -> Result<bool> {
        let Some(base) = self.parse_type_declaration()? else {
            return Ok(false);
        };
        let t = self.parse_pointer(base);
        if let Some(name) = self.ctx.tokens.eat_ident() {
            let t = self.parse_array_declare(t)?;
            if !self.eat(TokenKind::Semicolon) {
                return Err(self.err_syntax("no ';' after member declaration"));
            }
            self.ctx.types.add_struct_member(record, name, t);
        } else {
            // a nameless member is only allowed for an anonymous union
            let embeddable = self
                .ctx
                .types
                .record_decl(t)
                .is_some_and(|d| d.is_union && d.is_anonymous);
            if !embeddable {
                return Err(self.err_syntax("no member name in struct declaration"));
            }
            if !self.eat(TokenKind::Semicolon) {
                return Err(self.err_syntax("no ';' after member declaration"));
            }
            self.ctx.types.copy_union_members(record, t);
        }
        Ok(true)
    }

    fn parse_union_or_struct_type(&mut self) -> Result<Option<TypeId>> {
        let is_union = if self.eat(TokenKind::Struct) {
            false
        } else if self.eat(TokenKind::Union) {
            true
        } else {
            return Ok(None);
        };
        let tag = self.ctx.tokens.eat_ident();
        let is_anonymous = tag.is_none();
        let t = if is_union {
            self.ctx.types.add_union(tag, is_anonymous)
        } else {
            self.ctx.types.add_struct(tag, is_anonymous)
        };
        if self.eat(TokenKind::LBrace) {
            while self.parse_struct_member_declare(t)? {}
            if !self.eat(TokenKind::RBrace) {
                return Err(self.err_syntax("struct/union has no closing '}'"));
            }
        }
        Ok(Some(t))
    }

    fn parse_typedef(&mut self) -> Result<Option<TypeId>> {
        if !self.eat(TokenKind::Typedef) {
            return Ok(None);
        }
        let Some(base) = self.parse_type_declaration()? else {
            return Err(self.err_syntax("invalid type declaration for typedef"));
        };
        let t = self.parse_pointer(base);
        let Some(name) = self.ctx.tokens.eat_ident() else {
            return Err(self.err_syntax("no type name for typedef"));
        };
        Ok(Some(self.ctx.types.add_typedef(name, t)))
    }

    fn parse_type_declaration(&mut self) -> Result<Option<TypeId>> {
        if let Some(t) = self.parse_typedef()? {
            return Ok(Some(t));
        }
        if let Some(t) = self.parse_enum_type()? {
            return Ok(Some(t));
        }
        if let Some(t) = self.parse_union_or_struct_type()? {
            return Ok(Some(t));
        }
        self.parse_primitive_type()
    }

    fn parse_pointer(&mut self, mut t: TypeId) -> TypeId {
        while self.eat(TokenKind::Star) {
            t = self.ctx.types.add_pointer(t);
        }
        t
    }

    // ---- variable declarations ---------------------------------------

    fn add_var_with_check(&mut self, t: TypeId, name: Symbol) -> Result<VarId> {
        let Some(existing) = self.ctx.vars.find_in_current_frame(name) else {
            let size = self.ctx.types.size(t);
            return Ok(self.ctx.vars.add(name, t, size));
        };
        let spelled = self.name(name).to_string();
        let v = self.ctx.vars.get(existing).clone();
        if self.ctx.types.is_same(v.ty, t) {
            if v.flags.contains(VarFlags::INITIALIZED) {
                return Err(self.err_semantic(format!("variable is already initialized: '{spelled}'")));
            }
            return Ok(existing);
        }
        if let (Some(old_p), Some(new_p)) =
            (self.ctx.types.pointee(v.ty), self.ctx.types.pointee(t))
        {
            if !self.ctx.types.is_same(old_p, new_p) {
                let old = self.ctx.types.display(v.ty, &self.ctx.symbols);
                let new = self.ctx.types.display(t, &self.ctx.symbols);
                return Err(self.err_semantic(format!(
                    "variable '{spelled}' is already declared as {old}, redeclared as {new}"
                )));
            }
        }
        // 'a[N]' may complete an earlier 'a[]' or '*a' declaration
        let old_open = self.ctx.types.is_pointer(v.ty)
            || self.ctx.types.array_len(v.ty) == Some(0);
        let new_sized = self.ctx.types.array_len(t).unwrap_or(-1) >= 0;
        if old_open && new_sized {
            self.ctx.vars.get_mut(existing).ty = t;
            return Ok(existing);
        }
        Err(self.err_semantic(format!("incompatible variable redeclaration: '{spelled}'")))
    }

    fn parse_local_variable_typepart(&mut self) -> Result<Option<TypeId>> {
        self.eat(TokenKind::Const);
        let Some(t) = self.parse_type_declaration()? else {
            return Ok(None);
        };
        Ok(Some(self.parse_pointer(t)))
    }

    /// Element-by-element lowering of `{a, b, c}` onto `v[0] = a; ...`.
    /// A flexible array is resized afterwards and every reference to its
    /// old slot inside the initializer is patched to the new one.
    fn parse_array_initializer(&mut self, vid: VarId) -> Result<AtomId> {
        if !self.eat(TokenKind::LBrace) {
            return Err(self.err_syntax("array initializer requires '{'"));
        }
        if self.eat(TokenKind::RBrace) {
            return Err(self.err_syntax("empty array initializer"));
        }
        let v = self.ctx.vars.get(vid).clone();
        let declared_len = self.ctx.types.array_len(v.ty).unwrap_or(0);
        let elem = self
            .ctx
            .types
            .pointee(v.ty)
            .unwrap_or(self.ctx.types.int_ty);
        let patch_start = self.ctx.atoms.len();
        let mut pos = AtomId::NONE;
        let mut index = 0;
        loop {
            let base = self.ctx.atoms.push(Atom {
                op: Op::VarRef,
                ty: Some(v.ty),
                payload: Payload::Offset(v.offset),
            })?;
            let idx = self.new_int_atom(index)?;
            let lval = self.alloc_index(base, idx)?;
            let assign = self.parse_variable_initializer(lval)?;
            let stmt = self.expr_statement(assign)?;
            pos = if pos.is_none() {
                stmt
            } else {
                self.andthen(pos, stmt)?
            };
            index += 1;
            if !self.eat(TokenKind::Comma) {
                break;
            }
            if declared_len > 0 && index >= declared_len {
                if !self.eat(TokenKind::RBrace) {
                    return Err(self.err_syntax("too many array initializer elements"));
                }
                return Ok(pos);
            }
        }
        if !self.eat(TokenKind::RBrace) {
            return Err(self.err_syntax("invalid end of array initializer"));
        }
        if declared_len == 0 {
            let new_ty = self.ctx.types.add_array(elem, index);
            let new_size = self.ctx.types.size(new_ty);
            let (old_offset, new_offset) = self.ctx.vars.realloc(vid, new_ty, new_size);
            debug!("flexible array resized to {index}, offset {old_offset} -> {new_offset}");
            self.ctx
                .atoms
                .patch_var_refs(patch_start, old_offset, new_offset, new_ty);
        }
        Ok(pos)
    }

    fn parse_local_variable_identifier(&mut self, base: TypeId) -> Result<AtomId> {
        let Some(name) = self.ctx.tokens.eat_ident() else {
            return Err(self.err_syntax("invalid variable name"));
        };
        let t = self.parse_array_declare(base)?;
        let vid = self.add_var_with_check(t, name)?;
        if !self.eat(TokenKind::Assign) {
            return self.ctx.atoms.new_nop();
        }
        self.ctx.vars.get_mut(vid).flags |= VarFlags::INITIALIZED;
        let v = self.ctx.vars.get(vid).clone();
        if self.ctx.types.is_array(v.ty) {
            return self.parse_array_initializer(vid);
        }
        let lval = self.ctx.atoms.push(Atom {
            op: Op::VarRef,
            ty: Some(v.ty),
            payload: Payload::Offset(v.offset),
        })?;
        let assign = self.parse_variable_initializer(lval)?;
        self.expr_statement(assign)
    }

    fn parse_local_variable_declaration(&mut self) -> Result<AtomId> {
        let Some(base) = self.parse_local_variable_typepart()? else {
            return Ok(AtomId::NONE);
        };
        let mut pos = self.parse_local_variable_identifier(base)?;
        while self.eat(TokenKind::Comma) {
            let next = self.parse_local_variable_identifier(base)?;
            pos = self.andthen(pos, next)?;
        }
        if !self.eat(TokenKind::Semicolon) {
            return Err(self.err_syntax("no ';' after variable declaration"));
        }
        Ok(pos)
    }

    // ---- globals -----------------------------------------------------

    fn parse_global_scalar_initializer(&mut self) -> Result<GlobalInit> {
        if let Some(sym) = self.ctx.tokens.eat_str() {
            let text = self.ctx.symbols.resolve(sym).to_string();
            return Ok(GlobalInit::Str(self.ctx.strings.intern(&text)));
        }
        let e = self.parse_expr()?;
        if let Some(v) = self.const_int(e) {
            return Ok(GlobalInit::Int(v));
        }
        Err(self.err_syntax("invalid initializer for global variable"))
    }

    fn parse_global_array_initializer(&mut self, vid: VarId) -> Result<GlobalInit> {
        if !self.eat(TokenKind::LBrace) {
            return Err(self.err_syntax("array initializer requires '{'"));
        }
        if self.eat(TokenKind::RBrace) {
            return Err(self.err_syntax("empty array initializer"));
        }
        let ty = self.ctx.vars.get(vid).ty;
        let declared_len = self.ctx.types.array_len(ty).unwrap_or(0);
        let elem = self.ctx.types.pointee(ty).unwrap_or(self.ctx.types.int_ty);
        let handle = self.ctx.arrays.alloc();
        let mut index = 0;
        loop {
            let value = match self.parse_global_scalar_initializer()? {
                GlobalInit::Int(v) => v,
                GlobalInit::Str(s) => s.index() as i64,
                GlobalInit::Array(_) => return Err(self.err_syntax("nested array initializer")),
            };
            self.ctx.arrays.push(handle, value);
            index += 1;
            if !self.eat(TokenKind::Comma) {
                break;
            }
            if declared_len > 0 && index >= declared_len {
                if !self.eat(TokenKind::RBrace) {
                    return Err(self.err_syntax("too many array initializer elements"));
                }
                return Ok(GlobalInit::Array(handle));
            }
        }
        if !self.eat(TokenKind::RBrace) {
            return Err(self.err_syntax("invalid end of array initializer"));
        }
        if declared_len == 0 {
            let new_ty = self.ctx.types.add_array(elem, index);
            self.ctx.vars.get_mut(vid).ty = new_ty;
        }
        Ok(GlobalInit::Array(handle))
    }

    fn parse_global_variable(&mut self, base: TypeId, is_external: bool) -> Result<bool> {
        let save = self.ctx.tokens.pos();
        let t = self.parse_pointer(base);
        let Some(name) = self.ctx.tokens.eat_ident() else {
            self.ctx.tokens.set_pos(save);
            return Ok(false);
        };
        let t = self.parse_array_declare(t)?;
        let vid = self.add_var_with_check(t, name)?;
        if is_external {
            self.ctx.vars.get_mut(vid).flags |= VarFlags::EXTERNAL;
        }
        if self.eat(TokenKind::Assign) {
            if is_external {
                debug!(
                    "variable is initialized but declared 'extern': {}",
                    self.name(name)
                );
            }
            let init = if self.ctx.types.is_array(self.ctx.vars.get(vid).ty) {
                self.parse_global_array_initializer(vid)?
            } else {
                self.parse_global_scalar_initializer()?
            };
            let v = self.ctx.vars.get_mut(vid);
            v.init = Some(init);
            v.flags |= VarFlags::INITIALIZED;
        }
        Ok(true)
    }

    // ---- functions ---------------------------------------------------

    /// One formal argument; array parameters decay to pointers so every
    /// argument fits a register spill slot.
    fn parse_arg_declare(&mut self) -> Result<bool> {
        self.eat(TokenKind::Const);
        let Some(base) = self.parse_type_declaration()? else {
            return Ok(false);
        };
        let t = self.parse_pointer(base);
        let name = self.ctx.tokens.eat_ident();
        if name.is_none() {
            // `f(void)` declares no arguments at all
            if self.ctx.types.kind(t) == TypeKind::Void
                && self.ctx.tokens.peek().kind == TokenKind::RParen
            {
                return Ok(true);
            }
        }
        let t = self.parse_array_declare(t)?;
        let t = match self.ctx.types.pointee(t) {
            Some(elem) if self.ctx.types.is_array(t) => self.ctx.types.add_pointer(elem),
            _ => t,
        };
        match name {
            Some(name) => {
                self.add_var_with_check(t, name)?;
            }
            None => {
                // a prototype may leave arguments unnamed
                let placeholder = self.ctx.symbols.intern("-");
                let size = self.ctx.types.size(t);
                self.ctx.vars.add(placeholder, t, size);
            }
        }
        Ok(true)
    }

    /// Returns true when a trailing `...` makes the function variadic.
    fn parse_arg_seq(&mut self) -> Result<bool> {
        if !self.parse_arg_declare()? {
            return Ok(false);
        }
        while self.eat(TokenKind::Comma) {
            if self.parse_arg_declare()? {
                continue;
            }
            if !self.eat(TokenKind::Ellipsis) {
                return Err(self.err_syntax("invalid argument declaration"));
            }
            return Ok(true);
        }
        Ok(false)
    }

    fn arg_snapshot(&self) -> Vec<FuncArg> {
        self.ctx
            .vars
            .current_frame_vars()
            .iter()
            .map(|&vid| {
                let v = self.ctx.vars.get(vid);
                FuncArg {
                    name: v.name,
                    ty: v.ty,
                    offset: v.offset,
                }
            })
            .collect()
    }

    fn parse_function_prototype(&mut self, base: TypeId, is_external: bool) -> Result<bool> {
        let save = self.ctx.tokens.pos();
        let t = self.parse_pointer(base);
        let Some(name) = self.ctx.tokens.eat_ident() else {
            self.ctx.tokens.set_pos(save);
            return Ok(false);
        };
        if !self.eat(TokenKind::LParen) {
            self.ctx.tokens.set_pos(save);
            return Ok(false);
        }
        self.ctx.vars.reset_max_offset();
        self.ctx.vars.enter_frame();
        let is_variadic = self.parse_arg_seq()?;
        if !self.eat(TokenKind::RParen) {
            return Err(self.err_syntax("no ')' in function declaration"));
        }
        if !self.eat(TokenKind::Semicolon) {
            self.ctx.vars.exit_frame();
            self.ctx.tokens.set_pos(save);
            return Ok(false);
        }
        let args = self.arg_snapshot();
        self.ctx.funcs.add(name, t, is_external, is_variadic, args);
        self.ctx.vars.exit_frame();
        debug!("declared function: {}", self.name(name));
        Ok(true)
    }

    fn parse_function_definition(&mut self, base: TypeId) -> Result<bool> {
        let save = self.ctx.tokens.pos();
        let t = self.parse_pointer(base);
        let Some(name) = self.ctx.tokens.eat_ident() else {
            self.ctx.tokens.set_pos(save);
            return Ok(false);
        };
        if !self.eat(TokenKind::LParen) {
            self.ctx.tokens.set_pos(save);
            return Ok(false);
        }
        self.ctx.vars.reset_max_offset();
        self.ctx.vars.enter_frame();
        let is_variadic = self.parse_arg_seq()?;
        if !self.eat(TokenKind::RParen) {
            return Err(self.err_syntax("no ')' in function definition"));
        }
        let named: Vec<VarId> = self.ctx.vars.current_frame_vars().to_vec();
        if named.len() > MAX_REG_ARGS {
            return Err(self.err_semantic(format!(
                "too many parameters (at most {MAX_REG_ARGS} register arguments)"
            )));
        }
        let mut reg_save_offset = 0;
        if is_variadic {
            // All six argument registers spill into one contiguous area;
            // named arguments take the leading slots so `&last + 8` walks
            // into the variadic tail.
            let base_off = self.ctx.vars.reserve(REG_SAVE_BYTES);
            for (k, &vid) in named.iter().enumerate() {
                self.ctx.vars.get_mut(vid).offset = base_off - 8 * k as i32;
            }
            reg_save_offset = base_off;
        }
        let args = self.arg_snapshot();
        let fid = self.ctx.funcs.add(name, t, false, is_variadic, args.clone());
        let body = self.parse_block()?;
        if body.is_none() {
            let spelled = self.name(name).to_string();
            return Err(self.err_syntax(format!("no body for function: '{spelled}'")));
        }
        let max_offset = self.ctx.vars.max_offset();
        self.ctx
            .funcs
            .set_body(fid, args, body, max_offset, reg_save_offset);
        self.ctx.vars.exit_frame();
        debug!("defined function: {}", self.name(name));
        Ok(true)
    }

    fn parse_global_declaration(&mut self) -> Result<bool> {
        let is_external = self.eat(TokenKind::Extern);
        let Some(t) = self.parse_type_declaration()? else {
            return Ok(false);
        };
        if self.eat(TokenKind::Semicolon) {
            // a bare type declaration: struct, union, enum or typedef
            return Ok(true);
        }
        if self.parse_function_prototype(t, is_external)? {
            return Ok(true);
        }
        if self.parse_function_definition(t)? {
            return Ok(true);
        }
        if self.parse_global_variable(t, is_external)? {
            if !self.eat(TokenKind::Semicolon) {
                return Err(self.err_syntax("no ';' after variable declaration"));
            }
            return Ok(true);
        }
        Ok(false)
    }
}
