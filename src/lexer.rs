use std::path::Path;

use log::{debug, trace};

use crate::compiler::Compiler;
use crate::error::{Error, ErrorKind, Result};
use crate::macros::{MacroArg, MacroDef, MacroFrame};
use crate::strings::Symbol;
use crate::token::{Token, TokenKind};

/// Synthetic header primed before the root file. Variadic access is
/// plain pointer arithmetic over the register-save area: a variadic
/// prologue spills `rdi..r9` into consecutive 8-byte slots, with the
/// named arguments occupying the leading slots.
const BUILTIN_ARGS_NAME: &str = "rcc/args.h";
const BUILTIN_ARGS_BODY: &str = "\
#define __builtin_va_list long
#define __builtin_va_start(ap, last) ap = ((long)&(last)) + 8
#define __builtin_va_arg(ap, type) (*((type *)((ap += 8) - 8)))
#define __builtin_va_end(ap) ap = 0
";

/// Fixed spellings, longest first so `<<=` wins over `<<` and `<=`.
const PUNCT: &[(&str, TokenKind)] = &[
    ("<<=", TokenKind::ShlAssign),
    (">>=", TokenKind::ShrAssign),
    ("...", TokenKind::Ellipsis),
    ("<<", TokenKind::Shl),
    (">>", TokenKind::Shr),
    ("<=", TokenKind::Le),
    (">=", TokenKind::Ge),
    ("==", TokenKind::EqEq),
    ("!=", TokenKind::Ne),
    ("&&", TokenKind::AndAnd),
    ("||", TokenKind::OrOr),
    ("++", TokenKind::Inc),
    ("--", TokenKind::Dec),
    ("+=", TokenKind::PlusAssign),
    ("-=", TokenKind::MinusAssign),
    ("*=", TokenKind::StarAssign),
    ("/=", TokenKind::SlashAssign),
    ("%=", TokenKind::PercentAssign),
    ("&=", TokenKind::AmpAssign),
    ("|=", TokenKind::PipeAssign),
    ("^=", TokenKind::CaretAssign),
    ("->", TokenKind::Arrow),
    ("!", TokenKind::Not),
    ("?", TokenKind::Question),
    ("&", TokenKind::Amp),
    ("|", TokenKind::Pipe),
    ("^", TokenKind::Caret),
    ("=", TokenKind::Assign),
    ("<", TokenKind::Lt),
    (">", TokenKind::Gt),
    ("*", TokenKind::Star),
    ("/", TokenKind::Slash),
    ("%", TokenKind::Percent),
    ("+", TokenKind::Plus),
    ("-", TokenKind::Minus),
    ("~", TokenKind::Tilde),
    ("{", TokenKind::LBrace),
    ("}", TokenKind::RBrace),
    ("[", TokenKind::LBracket),
    ("]", TokenKind::RBracket),
    ("(", TokenKind::LParen),
    (")", TokenKind::RParen),
    (":", TokenKind::Colon),
    (";", TokenKind::Semicolon),
    (".", TokenKind::Dot),
    (",", TokenKind::Comma),
];

/// Keyword spellings; recognition additionally requires that the next
/// byte does not continue an identifier.
const KEYWORDS: &[(&str, TokenKind)] = &[
    ("break", TokenKind::Break),
    ("case", TokenKind::Case),
    ("const", TokenKind::Const),
    ("continue", TokenKind::Continue),
    ("default", TokenKind::Default),
    ("do", TokenKind::Do),
    ("else", TokenKind::Else),
    ("enum", TokenKind::Enum),
    ("extern", TokenKind::Extern),
    ("for", TokenKind::For),
    ("if", TokenKind::If),
    ("return", TokenKind::Return),
    ("sizeof", TokenKind::Sizeof),
    ("struct", TokenKind::Struct),
    ("switch", TokenKind::Switch),
    ("typedef", TokenKind::Typedef),
    ("union", TokenKind::Union),
    ("while", TokenKind::While),
];

/// One `#ifdef`/`#ifndef` level.
#[derive(Debug)]
struct Cond {
    active: bool,
    parent_active: bool,
    /// A branch of this level has already been emitted.
    taken: bool,
}

/// The tokenizer/preprocessor. Runs one source frame at a time; includes,
/// macro expansions, and `##` pastes push a frame, recurse, and pop.
pub struct Lexer<'a> {
    ctx: &'a mut Compiler,
    conds: Vec<Cond>,
}

impl<'a> Lexer<'a> {
    pub fn new(ctx: &'a mut Compiler) -> Self {
        Self {
            ctx,
            conds: Vec::new(),
        }
    }

    /// Tokenize the translation unit rooted at `path`.
    pub fn tokenize_file(&mut self, path: &Path) -> Result<()> {
        self.prime_builtins()?;
        self.ctx.sources.enter_file(path)?;
        self.tokenize_top()
    }

    /// Tokenize an in-memory root buffer (tests and the API entry point).
    pub fn tokenize_text(&mut self, name: &str, text: &str) -> Result<()> {
        self.prime_builtins()?;
        self.ctx.sources.enter_text(name, text)?;
        self.tokenize_top()
    }

    fn tokenize_top(&mut self) -> Result<()> {
        self.run()?;
        if !self.conds.is_empty() {
            return Err(Error::preprocess(self.ctx.sources.cursor_loc(), "missing #endif"));
        }
        self.ctx.sources.current_mut().mark();
        self.emit(TokenKind::Eof)?;
        self.ctx.sources.exit();
        debug!("tokenized {} tokens", self.ctx.tokens.len());
        Ok(())
    }

    fn prime_builtins(&mut self) -> Result<()> {
        self.ctx.sources.enter_text(BUILTIN_ARGS_NAME, BUILTIN_ARGS_BODY)?;
        self.run()?;
        self.ctx.sources.exit();
        Ok(())
    }

    /// Scan the current frame until its buffer (or slice) is exhausted.
    fn run(&mut self) -> Result<()> {
        loop {
            if !self.all_active() {
                self.skip_inactive_line()?;
                continue;
            }
            self.skip_trivia()?;
            if self.ctx.sources.current().exhausted() {
                break;
            }
            if self.at(b'#') {
                if self.peek(1) == Some(b'#') {
                    self.concat()?;
                } else {
                    self.directive()?;
                }
                continue;
            }
            self.scan_token()?;
        }
        Ok(())
    }

    // ---- cursor helpers ----------------------------------------------

    fn at(&self, byte: u8) -> bool {
        self.ctx.sources.ch() == Some(byte)
    }

    fn peek(&self, ahead: usize) -> Option<u8> {
        self.ctx.sources.peek_at(ahead)
    }

    fn bump(&mut self) -> bool {
        self.ctx.sources.advance()
    }

    fn save_cursor(&self) -> (usize, u32, u32) {
        let f = self.ctx.sources.current();
        (f.pos, f.line, f.column)
    }

    fn restore_cursor(&mut self, saved: (usize, u32, u32)) {
        let f = self.ctx.sources.current_mut();
        f.pos = saved.0;
        f.line = saved.1;
        f.column = saved.2;
    }

    fn emit(&mut self, kind: TokenKind) -> Result<()> {
        let f = self.ctx.sources.current();
        let token = Token {
            kind,
            src: f.id,
            line: f.prev_line,
            column: f.prev_column,
            start: f.prev_pos,
            end: f.pos,
        };
        self.ctx.tokens.push(token)
    }

    /// Whitespace and comments; afterwards the frame position is the
    /// start of the next token and is snapshotted for diagnostics.
    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            match self.ctx.sources.ch() {
                Some(b' ' | b'\t' | b'\n' | b'\r') => {
                    self.bump();
                }
                Some(b'/') if self.peek(1) == Some(b'/') => {
                    while let Some(c) = self.ctx.sources.ch() {
                        if c == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some(b'/') if self.peek(1) == Some(b'*') => {
                    let open = self.ctx.sources.cursor_loc();
                    self.bump();
                    self.bump();
                    loop {
                        if self.at(b'*') && self.peek(1) == Some(b'/') {
                            self.bump();
                            self.bump();
                            break;
                        }
                        if !self.bump() {
                            return Err(Error::lex(open, "unterminated comment"));
                        }
                    }
                }
                _ => break,
            }
        }
        self.ctx.sources.current_mut().mark();
        Ok(())
    }

    /// Spaces and tabs only; used where a newline is significant.
    fn skip_blanks(&mut self) {
        while matches!(self.ctx.sources.ch(), Some(b' ' | b'\t')) {
            self.bump();
        }
    }

    // ---- conditional inclusion ---------------------------------------

    fn all_active(&self) -> bool {
        self.conds.iter().all(|c| c.active)
    }

    /// Inside a skipped region: discard whole lines, but keep tracking
    /// nested `#ifdef`/`#ifndef`/`#else`/`#endif` so depth stays right.
    fn skip_inactive_line(&mut self) -> Result<()> {
        self.skip_blanks();
        while matches!(self.ctx.sources.ch(), Some(b'\n' | b'\r')) {
            self.bump();
            self.skip_blanks();
        }
        if self.ctx.sources.current().exhausted() {
            return Err(Error::preprocess(self.ctx.sources.cursor_loc(), "missing #endif"));
        }
        if self.at(b'#') {
            self.bump();
            self.skip_blanks();
            let word = self.scan_raw_word();
            match word.as_str() {
                "ifdef" | "ifndef" => {
                    self.skip_blanks();
                    let name = self.scan_raw_word();
                    let defined = {
                        let sym = self.ctx.symbols.intern(&name);
                        self.ctx.macros.find(sym).is_some()
                    };
                    let parent = self.all_active();
                    let active = parent && (defined == (word == "ifdef"));
                    self.conds.push(Cond {
                        active,
                        parent_active: parent,
                        taken: active,
                    });
                }
                "else" => self.cond_else()?,
                "endif" => self.cond_endif()?,
                _ => {}
            }
        }
        self.discard_line();
        Ok(())
    }

    fn discard_line(&mut self) {
        while let Some(c) = self.ctx.sources.ch() {
            self.bump();
            if c == b'\n' {
                break;
            }
        }
    }

    fn cond_else(&mut self) -> Result<()> {
        let Some(top) = self.conds.last_mut() else {
            return Err(Error::preprocess(self.ctx.sources.mark_loc(), "#else without #ifdef"));
        };
        top.active = top.parent_active && !top.taken;
        top.taken = top.taken || top.active;
        Ok(())
    }

    fn cond_endif(&mut self) -> Result<()> {
        if self.conds.pop().is_none() {
            return Err(Error::preprocess(self.ctx.sources.mark_loc(), "#endif without #ifdef"));
        }
        Ok(())
    }

    // ---- directives --------------------------------------------------

    fn directive(&mut self) -> Result<()> {
        self.bump(); // '#'
        self.skip_blanks();
        let word = self.scan_raw_word();
        match word.as_str() {
            "include" => self.include(),
            "define" => self.define(),
            "undef" => {
                self.skip_blanks();
                let name = self.expect_raw_word("macro name after #undef")?;
                let sym = self.ctx.symbols.intern(&name);
                self.ctx.macros.remove(sym);
                Ok(())
            }
            "ifdef" | "ifndef" => {
                self.skip_blanks();
                let name = self.expect_raw_word("macro name after #ifdef")?;
                let sym = self.ctx.symbols.intern(&name);
                let defined = self.ctx.macros.find(sym).is_some();
                let parent = self.all_active();
                let active = parent && (defined == (word == "ifdef"));
                self.conds.push(Cond {
                    active,
                    parent_active: parent,
                    taken: active,
                });
                Ok(())
            }
            "else" => self.cond_else(),
            "endif" => self.cond_endif(),
            _ => Err(Error::preprocess(
                self.ctx.sources.mark_loc(),
                format!("unknown directive '#{word}'"),
            )),
        }
    }

    fn scan_raw_word(&mut self) -> String {
        let mut word = String::new();
        while let Some(c) = self.ctx.sources.ch() {
            if c.is_ascii_alphanumeric() || c == b'_' {
                word.push(c as char);
                self.bump();
            } else {
                break;
            }
        }
        word
    }

    fn expect_raw_word(&mut self, what: &str) -> Result<String> {
        let word = self.scan_raw_word();
        if word.is_empty() {
            return Err(Error::preprocess(
                self.ctx.sources.cursor_loc(),
                format!("expected {what}"),
            ));
        }
        Ok(word)
    }

    fn include(&mut self) -> Result<()> {
        self.skip_blanks();
        if !self.at(b'"') {
            return Err(Error::preprocess(
                self.ctx.sources.cursor_loc(),
                "no file name for #include",
            ));
        }
        self.bump();
        let mut name = String::new();
        loop {
            match self.ctx.sources.ch() {
                Some(b'"') => {
                    self.bump();
                    break;
                }
                Some(b'\n') | None => {
                    return Err(Error::preprocess(
                        self.ctx.sources.cursor_loc(),
                        "unterminated #include file name",
                    ));
                }
                Some(c) => {
                    name.push(c as char);
                    self.bump();
                }
            }
        }
        if name == BUILTIN_ARGS_NAME {
            // Builtins are primed at startup; a second visit is a no-op.
            return Ok(());
        }
        debug!("entering include file: {name}");
        let resolved = self
            .ctx
            .sources
            .current()
            .dir
            .as_ref()
            .map(|dir| dir.join(&name))
            .filter(|p| p.exists())
            .unwrap_or_else(|| name.clone().into());
        let loc = self.ctx.sources.mark_loc();
        self.ctx.sources.enter_file(&resolved).map_err(|err| match err.kind {
            ErrorKind::Io(_) => Error::preprocess(loc.clone(), format!("cannot open include file \"{name}\"")),
            _ => err,
        })?;
        let depth = self.conds.len();
        self.run()?;
        if self.conds.len() != depth {
            return Err(Error::preprocess(self.ctx.sources.cursor_loc(), "missing #endif"));
        }
        self.ctx.sources.exit();
        Ok(())
    }

    fn define(&mut self) -> Result<()> {
        self.skip_blanks();
        let name = self.expect_raw_word("macro name after #define")?;
        let name_sym = self.ctx.symbols.intern(&name);
        let mut params = Vec::new();
        // A parameter list only counts when '(' hugs the macro name.
        if self.at(b'(') {
            self.bump();
            loop {
                self.skip_blanks();
                if self.at(b')') {
                    self.bump();
                    break;
                }
                let param = self.expect_raw_word("macro parameter name")?;
                params.push(self.ctx.symbols.intern(&param));
                self.skip_blanks();
                if self.at(b',') {
                    self.bump();
                } else if self.at(b')') {
                    self.bump();
                    break;
                } else {
                    return Err(Error::preprocess(
                        self.ctx.sources.cursor_loc(),
                        format!("invalid parameter list for macro '{name}'"),
                    ));
                }
            }
        }
        self.skip_blanks();
        let f = self.ctx.sources.current();
        let (src, start) = (f.id, f.pos);
        while let Some(c) = self.ctx.sources.ch() {
            if c == b'\n' {
                break;
            }
            self.bump();
        }
        let end = self.ctx.sources.current().pos;
        trace!(
            "defined macro {name} as |{}|",
            self.ctx.sources.text(src, start, end)
        );
        self.ctx.macros.add(MacroDef {
            name: name_sym,
            src,
            start,
            end,
            params,
        })
    }

    // ---- macro expansion ---------------------------------------------

    /// Capture one actual argument as a raw byte range. A stack of `(`
    /// and `[` keeps commas inside nested calls or subscripts intact;
    /// string literals are crossed atomically, honoring `\"`.
    fn scan_macro_arg(&mut self, is_last: bool) -> Result<()> {
        let mut delims: Vec<u8> = Vec::new();
        loop {
            let Some(c) = self.ctx.sources.ch() else {
                return Err(Error::preprocess(
                    self.ctx.sources.cursor_loc(),
                    "unexpected end of input in macro arguments",
                ));
            };
            match c {
                b'[' | b'(' => delims.push(c),
                b']' => {
                    if delims.pop() != Some(b'[') {
                        return Err(Error::preprocess(
                            self.ctx.sources.cursor_loc(),
                            "stray ']' in macro arguments",
                        ));
                    }
                }
                b')' => {
                    if delims.is_empty() {
                        if is_last {
                            return Ok(());
                        }
                        return Err(Error::preprocess(
                            self.ctx.sources.cursor_loc(),
                            "too few macro arguments",
                        ));
                    }
                    if delims.pop() != Some(b'(') {
                        return Err(Error::preprocess(
                            self.ctx.sources.cursor_loc(),
                            "stray ')' in macro arguments",
                        ));
                    }
                }
                b',' if delims.is_empty() && !is_last => return Ok(()),
                b'"' => {
                    self.bump();
                    loop {
                        match self.ctx.sources.ch() {
                            Some(b'"') => break,
                            Some(b'\\') => {
                                self.bump();
                                self.bump();
                            }
                            Some(_) => {
                                self.bump();
                            }
                            None => {
                                return Err(Error::preprocess(
                                    self.ctx.sources.cursor_loc(),
                                    "unterminated string in macro arguments",
                                ));
                            }
                        }
                    }
                }
                _ => {}
            }
            self.bump();
        }
    }

    /// Expand `name` at the current position: capture actuals (if the
    /// macro takes parameters), push an expansion frame, and re-scan the
    /// macro's body slice.
    fn enter_expansion(&mut self, name: Symbol) -> Result<()> {
        let def = match self.ctx.macros.find(name) {
            Some(def) => def.clone(),
            None => unreachable!("enter_expansion called without a definition"),
        };
        let display = self.ctx.symbols.resolve(name).to_string();
        let mut args = Vec::new();
        if !def.params.is_empty() {
            self.skip_trivia()?;
            if !self.at(b'(') {
                return Err(Error::preprocess(
                    self.ctx.sources.cursor_loc(),
                    format!("macro '{display}' requires arguments in (...)"),
                ));
            }
            self.bump();
            for (i, &param) in def.params.iter().enumerate() {
                let is_last = i == def.params.len() - 1;
                let f = self.ctx.sources.current();
                let (src, start) = (f.id, f.pos);
                self.scan_macro_arg(is_last)?;
                let end = self.ctx.sources.current().pos;
                trace!(
                    "macro arg captured as |{}|",
                    self.ctx.sources.text(src, start, end)
                );
                args.push(MacroArg {
                    name: param,
                    src,
                    start,
                    end,
                });
                self.bump(); // ',' or ')'
            }
        }
        debug!("expanding macro: {display}");
        self.ctx.macros.push_frame(MacroFrame { name, args });
        self.ctx
            .sources
            .enter_slice(def.src, &display, def.start, def.end)?;
        self.run()?;
        self.ctx.sources.exit();
        self.ctx.macros.pop_frame();
        Ok(())
    }

    /// Substitute a formal parameter: re-scan the captured actual text
    /// in its call-site buffer.
    fn enter_arg(&mut self, arg: MacroArg) -> Result<()> {
        let display = self.ctx.symbols.resolve(arg.name).to_string();
        debug!("expanding macro arg: {display}");
        self.ctx.macros.push_frame(MacroFrame {
            name: arg.name,
            args: Vec::new(),
        });
        self.ctx
            .sources
            .enter_slice(arg.src, &display, arg.start, arg.end)?;
        self.run()?;
        self.ctx.sources.exit();
        self.ctx.macros.pop_frame();
        Ok(())
    }

    // ---- token concatenation -----------------------------------------

    /// `##`: absorb tokens while paste operators keep appearing, then
    /// re-scan their concatenated source text as a fresh buffer.
    fn concat(&mut self) -> Result<()> {
        if self.ctx.tokens.is_empty() {
            return Err(Error::preprocess(self.ctx.sources.mark_loc(), "stray '##'"));
        }
        let first = self.ctx.tokens.len() - 1;
        loop {
            self.bump();
            self.bump();
            self.skip_trivia()?;
            if self.ctx.sources.current().exhausted() {
                return Err(Error::preprocess(
                    self.ctx.sources.cursor_loc(),
                    "nothing to paste after '##'",
                ));
            }
            // Absorb one token; a formal parameter contributes its
            // substituted call-site text.
            self.scan_token()?;
            let saved = self.save_cursor();
            self.skip_trivia()?;
            if !(self.at(b'#') && self.peek(1) == Some(b'#')) {
                self.restore_cursor(saved);
                break;
            }
        }
        let mut text = String::new();
        for i in first..self.ctx.tokens.len() {
            let t = *self.ctx.tokens.get(i);
            text.push_str(self.ctx.sources.text(t.src, t.start, t.end));
        }
        debug!("token paste produced |{text}|");
        self.ctx.tokens.truncate(first);
        self.ctx.sources.enter_text("##", &text)?;
        self.run()?;
        self.ctx.sources.exit();
        Ok(())
    }

    // ---- token scanning ----------------------------------------------

    fn accept_str(&mut self, pat: &str) -> bool {
        let bytes = pat.as_bytes();
        for (i, &b) in bytes.iter().enumerate() {
            if self.peek(i) != Some(b) {
                return false;
            }
        }
        for _ in 0..bytes.len() {
            self.bump();
        }
        true
    }

    fn accept_keyword(&mut self, pat: &str) -> bool {
        let bytes = pat.as_bytes();
        for (i, &b) in bytes.iter().enumerate() {
            if self.peek(i) != Some(b) {
                return false;
            }
        }
        // The next byte must not continue an identifier.
        if let Some(c) = self.peek(bytes.len()) {
            if c.is_ascii_alphanumeric() || c == b'_' {
                return false;
            }
        }
        for _ in 0..bytes.len() {
            self.bump();
        }
        true
    }

    /// Scan exactly one token at the cursor. Identifiers naming macros
    /// or innermost-frame formals are substituted instead of emitted.
    fn scan_token(&mut self) -> Result<()> {
        for &(pat, kind) in PUNCT {
            if self.accept_str(pat) {
                return self.emit(kind);
            }
        }
        for &(pat, kind) in KEYWORDS {
            if self.accept_keyword(pat) {
                return self.emit(kind);
            }
        }
        if let Some(kind) = self.scan_number()? {
            return self.emit(kind);
        }
        if let Some(kind) = self.scan_char_literal()? {
            return self.emit(kind);
        }
        if let Some(kind) = self.scan_string_literal()? {
            return self.emit(kind);
        }
        if let Some(sym) = self.scan_ident() {
            if !self.ctx.macros.is_expanding(sym) {
                if let Some(arg) = self.ctx.macros.innermost_arg(sym).cloned() {
                    return self.enter_arg(arg);
                }
                if self.ctx.macros.find(sym).is_some() {
                    return self.enter_expansion(sym);
                }
            }
            return self.emit(TokenKind::Ident(sym));
        }
        let loc = self.ctx.sources.mark_loc();
        let f = self.ctx.sources.current();
        let tail: String = f.body[f.pos..f.end].chars().take(20).collect();
        Err(Error::lex(loc, format!("invalid token at '{tail}'")))
    }

    fn scan_number(&mut self) -> Result<Option<TokenKind>> {
        let Some(first) = self.ctx.sources.ch() else {
            return Ok(None);
        };
        if !first.is_ascii_digit() {
            return Ok(None);
        }
        let loc = self.ctx.sources.mark_loc();
        let mut value: u64 = 0;
        let mut overflow = false;
        if first == b'0' && matches!(self.peek(1), Some(b'x' | b'X')) {
            self.bump();
            self.bump();
            let mut digits = 0;
            while let Some(c) = self.ctx.sources.ch() {
                let digit = match c {
                    b'0'..=b'9' => (c - b'0') as u64,
                    b'a'..=b'f' => (c - b'a' + 10) as u64,
                    b'A'..=b'F' => (c - b'A' + 10) as u64,
                    _ => break,
                };
                match value.checked_mul(16).and_then(|v| v.checked_add(digit)) {
                    Some(v) => value = v,
                    None => overflow = true,
                }
                digits += 1;
                self.bump();
            }
            if digits == 0 {
                return Err(Error::lex(loc, "invalid hexadecimal literal"));
            }
        } else if first == b'0' && matches!(self.peek(1), Some(b'0'..=b'7')) {
            self.bump();
            while let Some(c @ b'0'..=b'7') = self.ctx.sources.ch() {
                let digit = (c - b'0') as u64;
                match value.checked_mul(8).and_then(|v| v.checked_add(digit)) {
                    Some(v) => value = v,
                    None => overflow = true,
                }
                self.bump();
            }
        } else {
            while let Some(c) = self.ctx.sources.ch() {
                if !c.is_ascii_digit() {
                    break;
                }
                let digit = (c - b'0') as u64;
                match value.checked_mul(10).and_then(|v| v.checked_add(digit)) {
                    Some(v) => value = v,
                    None => overflow = true,
                }
                self.bump();
            }
        }
        if overflow || value > i64::MAX as u64 {
            return Err(Error::lex(loc, "integer literal too large"));
        }
        let forced_long = if matches!(self.ctx.sources.ch(), Some(b'L' | b'l')) {
            self.bump();
            true
        } else {
            false
        };
        // Values above 2^31 - 1 promote to 64-bit on their own.
        if forced_long || value > i32::MAX as u64 {
            Ok(Some(TokenKind::Long(value as i64)))
        } else {
            Ok(Some(TokenKind::Int(value as i32)))
        }
    }

    fn escape(&self, escaped: u8) -> Result<u8> {
        Ok(match escaped {
            b'n' => b'\n',
            b'0' => 0,
            b't' => b'\t',
            b'r' => b'\r',
            b'a' => 0x07,
            b'b' => 0x08,
            b'f' => 0x0c,
            b'"' => b'"',
            b'\'' => b'\'',
            b'\\' => b'\\',
            _ => {
                return Err(Error::lex(
                    self.ctx.sources.cursor_loc(),
                    "invalid letter after escape",
                ));
            }
        })
    }

    fn scan_char_literal(&mut self) -> Result<Option<TokenKind>> {
        if !self.at(b'\'') {
            return Ok(None);
        }
        let loc = self.ctx.sources.mark_loc();
        self.bump();
        let Some(mut c) = self.ctx.sources.ch() else {
            return Err(Error::lex(loc, "unterminated character literal"));
        };
        self.bump();
        if c == b'\\' {
            let Some(esc) = self.ctx.sources.ch() else {
                return Err(Error::lex(loc, "unterminated character literal"));
            };
            c = self.escape(esc)?;
            self.bump();
        }
        if !self.at(b'\'') {
            return Err(Error::lex(loc, "invalid character literal"));
        }
        self.bump();
        Ok(Some(TokenKind::Char(c)))
    }

    fn scan_string_literal(&mut self) -> Result<Option<TokenKind>> {
        if !self.at(b'"') {
            return Ok(None);
        }
        let loc = self.ctx.sources.mark_loc();
        self.bump();
        let mut bytes = Vec::new();
        loop {
            match self.ctx.sources.ch() {
                Some(b'"') => {
                    self.bump();
                    break;
                }
                Some(b'\\') => {
                    self.bump();
                    let Some(esc) = self.ctx.sources.ch() else {
                        return Err(Error::lex(loc, "unterminated string literal"));
                    };
                    bytes.push(self.escape(esc)?);
                    self.bump();
                }
                Some(c) => {
                    bytes.push(c);
                    self.bump();
                }
                None => return Err(Error::lex(loc, "unterminated string literal")),
            }
        }
        let text = String::from_utf8(bytes).map_err(|_| Error::lex(loc, "invalid string literal"))?;
        Ok(Some(TokenKind::Str(self.ctx.symbols.intern(&text))))
    }

    fn scan_ident(&mut self) -> Option<Symbol> {
        let first = self.ctx.sources.ch()?;
        if !first.is_ascii_alphabetic() && first != b'_' {
            return None;
        }
        let mut name = String::new();
        while let Some(c) = self.ctx.sources.ch() {
            if c.is_ascii_alphanumeric() || c == b'_' {
                name.push(c as char);
                self.bump();
            } else {
                break;
            }
        }
        Some(self.ctx.symbols.intern(&name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;

    fn tokenize(text: &str) -> Compiler {
        let mut c = Compiler::new();
        Lexer::new(&mut c).tokenize_text("test.c", text).unwrap();
        c
    }

    fn kinds(c: &Compiler) -> Vec<TokenKind> {
        (0..c.tokens.len()).map(|i| c.tokens.get(i).kind).collect()
    }

    #[test]
    fn longer_spellings_win() {
        let c = tokenize("a <<= b << c <= d < e");
        let ks = kinds(&c);
        assert!(ks.contains(&TokenKind::ShlAssign));
        assert!(ks.contains(&TokenKind::Shl));
        assert!(ks.contains(&TokenKind::Le));
        assert!(ks.contains(&TokenKind::Lt));
    }

    #[test]
    fn keywords_need_a_boundary() {
        let mut c = tokenize("if ifx");
        assert!(c.tokens.eat(TokenKind::If));
        let sym = c.tokens.eat_ident().unwrap();
        assert_eq!(c.symbols.resolve(sym), "ifx");
    }

    #[test]
    fn integer_literal_bases_and_promotion() {
        let c = tokenize("255 0xff 0777 42L 2147483648");
        let ks = kinds(&c);
        assert_eq!(ks[0], TokenKind::Int(255));
        assert_eq!(ks[1], TokenKind::Int(255));
        assert_eq!(ks[2], TokenKind::Int(511));
        assert_eq!(ks[3], TokenKind::Long(42));
        // above 2^31 - 1 the literal promotes on its own
        assert_eq!(ks[4], TokenKind::Long(2147483648));
    }

    #[test]
    fn char_and_string_escapes() {
        let mut c = tokenize(r#"'\n' 'A' "a\tb\"c""#);
        assert_eq!(c.tokens.eat_char(), Some(b'\n'));
        assert_eq!(c.tokens.eat_char(), Some(b'A'));
        let sym = c.tokens.eat_str().unwrap();
        assert_eq!(c.symbols.resolve(sym), "a\tb\"c");
    }

    #[test]
    fn comments_are_trivia() {
        let c = tokenize("1 // line\n/* block\nstill */ 2");
        assert_eq!(kinds(&c)[..2], [TokenKind::Int(1), TokenKind::Int(2)]);
    }

    #[test]
    fn object_macro_expands() {
        let c = tokenize("#define TEN 10\nTEN");
        assert_eq!(kinds(&c)[0], TokenKind::Int(10));
    }

    #[test]
    fn function_macro_substitutes_arguments() {
        let c = tokenize("#define SQ(x) ((x)*(x))\nSQ(1+2)");
        let ks = kinds(&c);
        // ((1+2)*(1+2)) EOF
        let ints = ks.iter().filter(|k| matches!(k, TokenKind::Int(_))).count();
        assert_eq!(ints, 4);
        assert_eq!(ks.iter().filter(|&&k| k == TokenKind::Star).count(), 1);
    }

    #[test]
    fn nested_call_commas_stay_in_one_argument() {
        let c = tokenize("#define FIRST(a, b) a\nFIRST(f(1, 2), 3)");
        let ks = kinds(&c);
        // expands to f(1, 2); f stays an identifier since it's undefined
        assert_eq!(ks.iter().filter(|k| matches!(k, TokenKind::Int(_))).count(), 2);
    }

    #[test]
    fn expansion_cycle_is_guarded() {
        // LOOP references itself; the guard leaves the inner name alone
        let mut c = tokenize("#define LOOP 1 + LOOP\nLOOP");
        assert_eq!(c.tokens.eat_int(), Some(1));
        assert!(c.tokens.eat(TokenKind::Plus));
        assert!(c.tokens.eat_ident().is_some());
        assert!(c.tokens.eat(TokenKind::Eof));
    }

    #[test]
    fn undef_removes_a_macro() {
        let mut c = tokenize("#define X 1\n#undef X\nX");
        assert!(c.tokens.eat_ident().is_some());
    }

    #[test]
    fn conditional_inclusion() {
        let c = tokenize("#define YES 1\n#ifdef YES\n1\n#else\n2\n#endif\n#ifndef YES\n3\n#else\n4\n#endif");
        assert_eq!(kinds(&c)[..2], [TokenKind::Int(1), TokenKind::Int(4)]);
    }

    #[test]
    fn nested_skipped_regions_track_depth() {
        let c = tokenize("#ifdef NO\n#ifdef ALSO_NO\n1\n#endif\n2\n#endif\n3");
        assert_eq!(kinds(&c)[0], TokenKind::Int(3));
    }

    #[test]
    fn missing_endif_is_an_error() {
        let mut c = Compiler::new();
        let err = Lexer::new(&mut c)
            .tokenize_text("test.c", "#ifdef NO\n1\n")
            .unwrap_err();
        assert!(err.to_string().contains("#endif"));
    }

    #[test]
    fn token_paste_builds_a_fresh_identifier() {
        let mut c = tokenize("#define GLUE(a, b) a ## b\nGLUE(val, 1)");
        let sym = c.tokens.eat_ident().unwrap();
        assert_eq!(c.symbols.resolve(sym), "val1");
        assert!(c.tokens.eat(TokenKind::Eof));
    }

    #[test]
    fn builtin_va_macros_are_primed() {
        let c = tokenize("__builtin_va_list x;");
        // expands to `long x ;`
        let mut found = false;
        for i in 0..c.tokens.len() {
            if let TokenKind::Ident(sym) = c.tokens.get(i).kind {
                if c.symbols.resolve(sym) == "long" {
                    found = true;
                }
            }
        }
        assert!(found);
    }

    #[test]
    fn token_positions_cover_their_source_text() {
        let c = tokenize("int foo = 42;");
        for i in 0..c.tokens.len() {
            let t = c.tokens.get(i);
            assert!(t.start <= t.end);
            let frame = c.sources.frame(t.src);
            assert!(t.end <= frame.body.len());
        }
    }

    #[test]
    fn function_macro_without_arguments_is_an_error() {
        let mut c = Compiler::new();
        let err = Lexer::new(&mut c)
            .tokenize_text("test.c", "#define SQ(x) ((x)*(x))\nSQ")
            .unwrap_err();
        assert!(err.to_string().contains("requires arguments"));
    }

    #[test]
    fn missing_include_reports_the_name() {
        let mut c = Compiler::new();
        let err = Lexer::new(&mut c)
            .tokenize_text("test.c", "#include \"no/such/file.h\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("no/such/file.h"));
    }
}
