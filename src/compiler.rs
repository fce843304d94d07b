use std::path::Path;

use crate::atom::AtomPool;
use crate::emit::Emitter;
use crate::error::Result;
use crate::funcs::FuncTable;
use crate::lexer::Lexer;
use crate::macros::MacroTable;
use crate::parser::Parser;
use crate::source::{Loc, SourceSet};
use crate::strings::{ArrayPool, Interner, StringPool};
use crate::token::TokenStream;
use crate::types::TypeRegistry;
use crate::vars::VarTable;

/// The translation context: every pool the pipeline appends to, owned by
/// value and threaded through the lexer, parser, and emitter.
#[derive(Debug)]
pub struct Compiler {
    pub sources: SourceSet,
    pub symbols: Interner,
    pub strings: StringPool,
    pub arrays: ArrayPool,
    pub macros: MacroTable,
    pub tokens: TokenStream,
    pub types: TypeRegistry,
    pub vars: VarTable,
    pub funcs: FuncTable,
    pub atoms: AtomPool,
}

impl Compiler {
    pub fn new() -> Self {
        let mut symbols = Interner::new();
        let types = TypeRegistry::new(&mut symbols);
        Self {
            sources: SourceSet::new(),
            symbols,
            strings: StringPool::new(),
            arrays: ArrayPool::new(),
            macros: MacroTable::new(),
            tokens: TokenStream::new(),
            types,
            vars: VarTable::new(),
            funcs: FuncTable::new(),
            atoms: AtomPool::new(),
        }
    }

    /// Position of the token the parse cursor is at.
    pub fn token_loc(&self) -> Loc {
        let t = self.tokens.peek();
        self.sources.loc_of(t.src, t.line, t.column)
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

/// Compile the translation unit rooted at `path` to assembly text.
pub fn compile_file(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let mut compiler = Compiler::new();
    Lexer::new(&mut compiler).tokenize_file(path)?;
    finish(compiler, &path.display().to_string())
}

/// Compile an in-memory buffer; `name` is used for diagnostics and the
/// `.file` header.
pub fn compile_source(name: &str, text: &str) -> Result<String> {
    let mut compiler = Compiler::new();
    Lexer::new(&mut compiler).tokenize_text(name, text)?;
    finish(compiler, name)
}

fn finish(mut compiler: Compiler, file: &str) -> Result<String> {
    Parser::new(&mut compiler).parse_program()?;
    let mut out = Vec::new();
    Emitter::new(&compiler, &mut out).emit_program(file)?;
    Ok(String::from_utf8(out).expect("emitter produced valid UTF-8"))
}
