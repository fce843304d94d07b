use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::source::SrcId;
use crate::strings::Symbol;

const MAX_MACROS: usize = 1000;

/// A macro definition: a named `[start, end)` span of a source buffer
/// plus an ordered formal-parameter list (empty for object-like macros).
#[derive(Debug, Clone)]
pub struct MacroDef {
    pub name: Symbol,
    pub src: SrcId,
    pub start: usize,
    pub end: usize,
    pub params: Vec<Symbol>,
}

/// An actual argument captured at a call site: a raw byte span of the
/// calling buffer, re-scanned when the matching formal is referenced.
#[derive(Debug, Clone)]
pub struct MacroArg {
    pub name: Symbol,
    pub src: SrcId,
    pub start: usize,
    pub end: usize,
}

/// One entry of the expansion stack: the macro being expanded together
/// with its formal-to-actual bindings. Argument re-scans push frames of
/// their own (with no bindings), so the stack doubles as the cycle guard.
#[derive(Debug)]
pub struct MacroFrame {
    pub name: Symbol,
    pub args: Vec<MacroArg>,
}

#[derive(Debug, Default)]
pub struct MacroTable {
    defs: Vec<MacroDef>,
    by_name: HashMap<Symbol, usize>,
    frames: Vec<MacroFrame>,
}

impl MacroTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, def: MacroDef) -> Result<()> {
        if self.defs.len() >= MAX_MACROS {
            return Err(Error::capacity("macro table"));
        }
        self.by_name.insert(def.name, self.defs.len());
        self.defs.push(def);
        Ok(())
    }

    pub fn find(&self, name: Symbol) -> Option<&MacroDef> {
        self.by_name.get(&name).map(|&i| &self.defs[i])
    }

    pub fn remove(&mut self, name: Symbol) {
        self.by_name.remove(&name);
    }

    /// True when `name` is anywhere on the expansion stack. Expanding it
    /// again would recurse forever, so the tokenizer leaves the identifier
    /// alone instead.
    pub fn is_expanding(&self, name: Symbol) -> bool {
        self.frames.iter().any(|f| f.name == name)
    }

    pub fn push_frame(&mut self, frame: MacroFrame) {
        self.frames.push(frame);
    }

    pub fn pop_frame(&mut self) -> Option<MacroFrame> {
        self.frames.pop()
    }

    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    /// Look `name` up among the innermost frame's formals only; outer
    /// frames' bindings are invisible while an inner body is re-scanned.
    pub fn innermost_arg(&self, name: Symbol) -> Option<&MacroArg> {
        self.frames
            .last()
            .and_then(|f| f.args.iter().find(|a| a.name == name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strings::Interner;

    #[test]
    fn add_find_remove() {
        let mut syms = Interner::new();
        let mut table = MacroTable::new();
        let name = syms.intern("VALUE");
        table
            .add(MacroDef {
                name,
                src: SrcId::from_raw(0),
                start: 3,
                end: 7,
                params: Vec::new(),
            })
            .unwrap();
        assert!(table.find(name).is_some());
        table.remove(name);
        assert!(table.find(name).is_none());
    }

    #[test]
    fn cycle_guard_sees_all_frames() {
        let mut syms = Interner::new();
        let mut table = MacroTable::new();
        let outer = syms.intern("OUTER");
        let inner = syms.intern("INNER");
        table.push_frame(MacroFrame {
            name: outer,
            args: Vec::new(),
        });
        table.push_frame(MacroFrame {
            name: inner,
            args: Vec::new(),
        });
        assert!(table.is_expanding(outer));
        assert!(table.is_expanding(inner));
        table.pop_frame();
        assert!(!table.is_expanding(inner));
    }

    #[test]
    fn innermost_frame_shadows_outer_bindings() {
        let mut syms = Interner::new();
        let mut table = MacroTable::new();
        let x = syms.intern("x");
        table.push_frame(MacroFrame {
            name: syms.intern("SQ"),
            args: vec![MacroArg {
                name: x,
                src: SrcId::from_raw(0),
                start: 0,
                end: 3,
            }],
        });
        assert!(table.innermost_arg(x).is_some());
        table.push_frame(MacroFrame {
            name: x,
            args: Vec::new(),
        });
        assert!(table.innermost_arg(x).is_none());
    }
}
