//! End-to-end tests: compile a C source, then execute the emitted
//! assembly in a small x86-64 interpreter and check the exit code the
//! program would produce.

use std::collections::HashMap;

/// Where the data image (`.rodata` + `.data`) lands in simulated memory.
const DATA_BASE: u64 = 0x10000;
const MEM_SIZE: usize = 1 << 20;
const RETURN_SENTINEL: u64 = u64::MAX;

const RAX: usize = 0;
const RCX: usize = 1;
const RDX: usize = 2;
const RSP: usize = 4;
const RBP: usize = 5;

#[derive(Debug, Clone)]
enum Operand {
    Imm(i64),
    /// Register index and access width in bytes.
    Reg(usize, u8),
    Mem {
        base: Option<usize>,
        disp: i64,
        sym: Option<String>,
    },
    Label(String),
}

#[derive(Debug)]
enum DataItem {
    Bytes(Vec<u8>),
    QuadSym(String),
    Zero(usize),
}

#[derive(Debug)]
struct Program {
    instrs: Vec<(String, Vec<Operand>)>,
    labels: HashMap<String, usize>,
    data: Vec<(Option<String>, DataItem)>,
}

fn reg_of(name: &str) -> Option<(usize, u8)> {
    let (idx, width) = match name {
        "%rax" => (RAX, 8),
        "%eax" => (RAX, 4),
        "%al" => (RAX, 1),
        "%rcx" => (RCX, 8),
        "%ecx" => (RCX, 4),
        "%cl" => (RCX, 1),
        "%rdx" => (RDX, 8),
        "%edx" => (RDX, 4),
        "%dl" => (RDX, 1),
        "%rbx" => (3, 8),
        "%rsp" => (RSP, 8),
        "%rbp" => (RBP, 8),
        "%rsi" => (6, 8),
        "%esi" => (6, 4),
        "%sil" => (6, 1),
        "%rdi" => (7, 8),
        "%edi" => (7, 4),
        "%dil" => (7, 1),
        "%r8" => (8, 8),
        "%r8d" => (8, 4),
        "%r8b" => (8, 1),
        "%r9" => (9, 8),
        "%r9d" => (9, 4),
        "%r9b" => (9, 1),
        _ => return None,
    };
    Some((idx, width))
}

fn parse_operand(text: &str) -> Operand {
    let text = text.trim();
    if let Some(imm) = text.strip_prefix('$') {
        return Operand::Imm(imm.parse().expect("immediate"));
    }
    if let Some((idx, width)) = reg_of(text) {
        return Operand::Reg(idx, width);
    }
    if let Some(open) = text.find('(') {
        let close = text.rfind(')').expect("closing paren in operand");
        let inner = &text[open + 1..close];
        let prefix = &text[..open];
        if inner == "%rip" {
            return Operand::Mem {
                base: None,
                disp: 0,
                sym: Some(prefix.to_string()),
            };
        }
        let (base, _) = reg_of(inner).expect("base register");
        let disp = if prefix.is_empty() {
            0
        } else {
            prefix.parse().expect("displacement")
        };
        return Operand::Mem {
            base: Some(base),
            disp,
            sym: None,
        };
    }
    Operand::Label(text.to_string())
}

fn unescape(s: &str) -> Vec<u8> {
    let mut out = Vec::new();
    let mut bytes = s.bytes().peekable();
    while let Some(b) = bytes.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match bytes.next() {
            Some(b'n') => out.push(b'\n'),
            Some(b't') => out.push(b'\t'),
            Some(b'r') => out.push(b'\r'),
            Some(b'"') => out.push(b'"'),
            Some(b'\\') => out.push(b'\\'),
            Some(d @ b'0'..=b'7') => {
                let mut v = (d - b'0') as u32;
                for _ in 0..2 {
                    if let Some(&o @ b'0'..=b'7') = bytes.peek() {
                        v = v * 8 + (o - b'0') as u32;
                        bytes.next();
                    }
                }
                out.push(v as u8);
            }
            other => panic!("bad escape {other:?}"),
        }
    }
    out
}

impl Program {
    fn load(asm: &str) -> Self {
        let mut instrs = Vec::new();
        let mut labels = HashMap::new();
        let mut data: Vec<(Option<String>, DataItem)> = Vec::new();
        let mut in_text = true;
        for raw in asm.lines() {
            let line = raw.trim_end();
            if line.is_empty() {
                continue;
            }
            if !raw.starts_with('\t') {
                let label = line.trim_end_matches(':').to_string();
                if in_text {
                    labels.insert(label, instrs.len());
                } else {
                    data.push((Some(label), DataItem::Bytes(Vec::new())));
                }
                continue;
            }
            let content = line.trim_start();
            if let Some(directive) = content.strip_prefix('.') {
                let mut parts = directive.splitn(2, char::is_whitespace);
                let name = parts.next().unwrap_or_default();
                let arg = parts.next().unwrap_or("").trim();
                match name {
                    "text" => in_text = true,
                    "section" | "data" => in_text = false,
                    "file" | "globl" | "type" => {}
                    "string" => {
                        let open = arg.find('"').expect("open quote");
                        let close = arg.rfind('"').expect("close quote");
                        let mut bytes = unescape(&arg[open + 1..close]);
                        bytes.push(0);
                        data.push((None, DataItem::Bytes(bytes)));
                    }
                    "long" => {
                        let v: i64 = arg.parse().expect(".long value");
                        data.push((None, DataItem::Bytes((v as i32).to_le_bytes().to_vec())));
                    }
                    "quad" => {
                        if let Ok(v) = arg.parse::<i64>() {
                            data.push((None, DataItem::Bytes(v.to_le_bytes().to_vec())));
                        } else {
                            data.push((None, DataItem::QuadSym(arg.to_string())));
                        }
                    }
                    "byte" => {
                        let v: i64 = arg.parse().expect(".byte value");
                        data.push((None, DataItem::Bytes(vec![v as u8])));
                    }
                    "zero" => {
                        let n: usize = arg.parse().expect(".zero size");
                        data.push((None, DataItem::Zero(n)));
                    }
                    other => panic!("unknown directive .{other}"),
                }
                continue;
            }
            assert!(in_text, "instruction outside .text: {content}");
            let mut parts = content.splitn(2, char::is_whitespace);
            let mnemonic = parts.next().expect("mnemonic").to_string();
            let rest = parts.next().unwrap_or("").trim();
            let ops = if rest.is_empty() {
                Vec::new()
            } else {
                rest.split(',').map(parse_operand).collect()
            };
            instrs.push((mnemonic, ops));
        }
        Program {
            instrs,
            labels,
            data,
        }
    }

    fn layout_data(&self) -> (Vec<u8>, HashMap<String, u64>) {
        let mut syms = HashMap::new();
        let mut addr = DATA_BASE;
        for (label, item) in &self.data {
            if let Some(l) = label {
                syms.insert(l.clone(), addr);
            }
            addr += match item {
                DataItem::Bytes(b) => b.len() as u64,
                DataItem::QuadSym(_) => 8,
                DataItem::Zero(n) => *n as u64,
            };
        }
        let mut image = Vec::new();
        for (_, item) in &self.data {
            match item {
                DataItem::Bytes(b) => image.extend_from_slice(b),
                DataItem::QuadSym(sym) => {
                    let target = *syms.get(sym).expect("data symbol");
                    image.extend_from_slice(&target.to_le_bytes());
                }
                DataItem::Zero(n) => image.extend(std::iter::repeat_n(0u8, *n)),
            }
        }
        (image, syms)
    }

    fn run(&self, entry: &str) -> i64 {
        let (image, syms) = self.layout_data();
        let mut m = Machine {
            regs: [0; 16],
            mem: vec![0; MEM_SIZE],
            zf: false,
            sf: false,
            of: false,
            syms,
        };
        m.mem[DATA_BASE as usize..DATA_BASE as usize + image.len()].copy_from_slice(&image);
        m.regs[RSP] = (MEM_SIZE - 64) as u64;
        // sentinel return address: popping it ends the run
        m.regs[RSP] -= 8;
        let sp = m.regs[RSP] as usize;
        m.mem[sp..sp + 8].copy_from_slice(&RETURN_SENTINEL.to_le_bytes());

        let mut ip = *self.labels.get(entry).expect("entry point");
        let mut steps = 0u64;
        loop {
            steps += 1;
            assert!(steps < 50_000_000, "simulated program diverged");
            let (mnemonic, ops) = &self.instrs[ip];
            ip += 1;
            match mnemonic.as_str() {
                "pushq" => {
                    let v = m.get(&ops[0], 8);
                    m.push(v as u64);
                }
                "popq" => {
                    let v = m.pop();
                    m.set(&ops[0], 8, v as i64);
                }
                "movq" | "movabsq" => {
                    let v = m.get(&ops[0], 8);
                    m.set(&ops[1], 8, v);
                }
                "movl" => {
                    let v = m.get(&ops[0], 4);
                    m.set(&ops[1], 4, v);
                }
                "movb" => {
                    let v = m.get(&ops[0], 1);
                    m.set(&ops[1], 1, v);
                }
                "movsbq" => {
                    let v = m.get(&ops[0], 1);
                    m.set(&ops[1], 8, v);
                }
                "movslq" => {
                    let v = m.get(&ops[0], 4);
                    m.set(&ops[1], 8, v);
                }
                "leaq" => {
                    let addr = m.address_of(&ops[0]);
                    m.set(&ops[1], 8, addr as i64);
                }
                "addq" | "subq" | "imulq" | "andq" | "orq" | "xorq" if ops.len() == 2 => {
                    let b = m.get(&ops[0], 8);
                    let a = m.get(&ops[1], 8);
                    let r = m.alu64(mnemonic, a, b);
                    m.set(&ops[1], 8, r);
                }
                "imulq" if ops.len() == 3 => {
                    let imm = m.get(&ops[0], 8);
                    let src = m.get(&ops[1], 8);
                    m.set(&ops[2], 8, src.wrapping_mul(imm));
                }
                "addl" | "subl" | "imull" | "andl" | "orl" | "xorl" => {
                    let b = m.get(&ops[0], 4) as i32;
                    let a = m.get(&ops[1], 4) as i32;
                    let r = m.alu32(mnemonic, a, b);
                    m.set(&ops[1], 4, r as i64);
                }
                "addb" => {
                    let b = m.get(&ops[0], 1);
                    let a = m.get(&ops[1], 1);
                    m.set(&ops[1], 1, a.wrapping_add(b));
                }
                "subb" => {
                    let b = m.get(&ops[0], 1);
                    let a = m.get(&ops[1], 1);
                    m.set(&ops[1], 1, a.wrapping_sub(b));
                }
                "notq" => {
                    let v = m.get(&ops[0], 8);
                    m.set(&ops[0], 8, !v);
                }
                "notl" => {
                    let v = m.get(&ops[0], 4) as i32;
                    m.set(&ops[0], 4, (!v) as i64);
                }
                "cltq" => {
                    m.regs[RAX] = (m.regs[RAX] as u32 as i32) as i64 as u64;
                }
                "cltd" => {
                    let hi = if (m.regs[RAX] as u32 as i32) < 0 { u32::MAX } else { 0 };
                    m.regs[RDX] = hi as u64;
                }
                "cqto" => {
                    m.regs[RDX] = if (m.regs[RAX] as i64) < 0 { u64::MAX } else { 0 };
                }
                "idivl" => {
                    let divisor = m.get(&ops[0], 4) as i32 as i64;
                    let dividend = (((m.regs[RDX] as u32 as u64) << 32)
                        | (m.regs[RAX] as u32 as u64)) as i64;
                    let q = dividend / divisor;
                    let r = dividend % divisor;
                    m.regs[RAX] = q as i32 as u32 as u64;
                    m.regs[RDX] = r as i32 as u32 as u64;
                }
                "idivq" => {
                    let divisor = m.get(&ops[0], 8) as i128;
                    let dividend = (((m.regs[RDX] as u128) << 64) | m.regs[RAX] as u128) as i128;
                    let q = dividend / divisor;
                    let r = dividend % divisor;
                    m.regs[RAX] = q as i64 as u64;
                    m.regs[RDX] = r as i64 as u64;
                }
                "sall" | "sarl" => {
                    let count = (m.regs[RCX] & 31) as u32;
                    let v = m.get(&ops[1], 4) as i32;
                    let r = if mnemonic == "sall" { v.wrapping_shl(count) } else { v.wrapping_shr(count) };
                    m.set(&ops[1], 4, r as i64);
                }
                "salq" | "sarq" => {
                    let count = (m.regs[RCX] & 63) as u32;
                    let v = m.get(&ops[1], 8);
                    let r = if mnemonic == "salq" { v.wrapping_shl(count) } else { v.wrapping_shr(count) };
                    m.set(&ops[1], 8, r);
                }
                "testq" => {
                    let a = m.get(&ops[0], 8);
                    let b = m.get(&ops[1], 8);
                    let r = a & b;
                    m.zf = r == 0;
                    m.sf = r < 0;
                    m.of = false;
                }
                "cmpq" => {
                    let b = m.get(&ops[0], 8);
                    let a = m.get(&ops[1], 8);
                    let (r, ov) = a.overflowing_sub(b);
                    m.zf = r == 0;
                    m.sf = r < 0;
                    m.of = ov;
                }
                "sete" | "setne" | "setl" | "setle" | "setg" | "setge" => {
                    let v = match mnemonic.as_str() {
                        "sete" => m.zf,
                        "setne" => !m.zf,
                        "setl" => m.sf != m.of,
                        "setle" => m.zf || m.sf != m.of,
                        "setg" => !m.zf && m.sf == m.of,
                        _ => m.sf == m.of,
                    };
                    m.set(&ops[0], 1, v as i64);
                }
                "jmp" | "jz" | "jnz" | "je" => {
                    let take = match mnemonic.as_str() {
                        "jmp" => true,
                        "jz" | "je" => m.zf,
                        _ => !m.zf,
                    };
                    if take {
                        let Operand::Label(target) = &ops[0] else {
                            panic!("jump without a label")
                        };
                        ip = *self.labels.get(target).expect("jump target");
                    }
                }
                "call" => {
                    let Operand::Label(target) = &ops[0] else {
                        panic!("call without a label")
                    };
                    let dest = *self
                        .labels
                        .get(target)
                        .unwrap_or_else(|| panic!("undefined function '{target}'"));
                    m.push(ip as u64);
                    ip = dest;
                }
                "leave" => {
                    m.regs[RSP] = m.regs[RBP];
                    let v = m.pop();
                    m.regs[RBP] = v;
                }
                "ret" => {
                    let v = m.pop();
                    if v == RETURN_SENTINEL {
                        return m.regs[RAX] as i64;
                    }
                    ip = v as usize;
                }
                other => panic!("unhandled instruction '{other}'"),
            }
        }
    }
}

struct Machine {
    regs: [u64; 16],
    mem: Vec<u8>,
    zf: bool,
    sf: bool,
    of: bool,
    syms: HashMap<String, u64>,
}

impl Machine {
    fn address_of(&self, op: &Operand) -> u64 {
        match op {
            Operand::Mem { base, disp, sym } => {
                if let Some(sym) = sym {
                    return *self.syms.get(sym).unwrap_or_else(|| panic!("symbol {sym}"));
                }
                let base = base.map(|b| self.regs[b]).unwrap_or(0);
                base.wrapping_add(*disp as u64)
            }
            _ => panic!("address of a non-memory operand"),
        }
    }

    fn load(&self, addr: u64, width: u8) -> i64 {
        let a = addr as usize;
        match width {
            1 => self.mem[a] as i8 as i64,
            4 => i32::from_le_bytes(self.mem[a..a + 4].try_into().unwrap()) as i64,
            _ => i64::from_le_bytes(self.mem[a..a + 8].try_into().unwrap()),
        }
    }

    fn store(&mut self, addr: u64, width: u8, value: i64) {
        let a = addr as usize;
        match width {
            1 => self.mem[a] = value as u8,
            4 => self.mem[a..a + 4].copy_from_slice(&(value as i32).to_le_bytes()),
            _ => self.mem[a..a + 8].copy_from_slice(&value.to_le_bytes()),
        }
    }

    fn get(&self, op: &Operand, width: u8) -> i64 {
        match op {
            Operand::Imm(v) => *v,
            Operand::Reg(idx, w) => {
                let raw = self.regs[*idx];
                match (*w).min(width) {
                    1 => raw as u8 as i8 as i64,
                    4 => raw as u32 as i32 as i64,
                    _ => raw as i64,
                }
            }
            Operand::Mem { .. } => self.load(self.address_of(op), width),
            Operand::Label(l) => panic!("label {l} used as a value"),
        }
    }

    fn set(&mut self, op: &Operand, width: u8, value: i64) {
        match op {
            Operand::Reg(idx, w) => {
                let w = (*w).min(width);
                match w {
                    1 => {
                        self.regs[*idx] = (self.regs[*idx] & !0xff) | (value as u8 as u64);
                    }
                    4 => {
                        // writing a 32-bit register zeroes the upper half
                        self.regs[*idx] = value as u32 as u64;
                    }
                    _ => self.regs[*idx] = value as u64,
                }
            }
            Operand::Mem { .. } => self.store(self.address_of(op), width, value),
            _ => panic!("cannot assign to operand {op:?}"),
        }
    }

    fn push(&mut self, value: u64) {
        self.regs[RSP] -= 8;
        let sp = self.regs[RSP] as usize;
        self.mem[sp..sp + 8].copy_from_slice(&value.to_le_bytes());
    }

    fn pop(&mut self) -> u64 {
        let sp = self.regs[RSP] as usize;
        let v = u64::from_le_bytes(self.mem[sp..sp + 8].try_into().unwrap());
        self.regs[RSP] += 8;
        v
    }

    fn alu64(&mut self, mnemonic: &str, a: i64, b: i64) -> i64 {
        match mnemonic {
            "addq" => a.wrapping_add(b),
            "subq" => {
                let (r, ov) = a.overflowing_sub(b);
                self.zf = r == 0;
                self.sf = r < 0;
                self.of = ov;
                r
            }
            "imulq" => a.wrapping_mul(b),
            "andq" => a & b,
            "orq" => a | b,
            _ => a ^ b,
        }
    }

    fn alu32(&mut self, mnemonic: &str, a: i32, b: i32) -> i32 {
        match mnemonic {
            "addl" => a.wrapping_add(b),
            "subl" => {
                let (r, ov) = a.overflowing_sub(b);
                self.zf = r == 0;
                self.sf = r < 0;
                self.of = ov;
                r
            }
            "imull" => a.wrapping_mul(b),
            "andl" => a & b,
            "orl" => a | b,
            _ => a ^ b,
        }
    }
}

fn run_c(source: &str) -> i64 {
    let asm = rcc::compile_source("test.c", source).expect("compilation failed");
    Program::load(&asm).run("main")
}

// ---- the six canonical scenarios -------------------------------------

#[test]
fn arithmetic_precedence() {
    assert_eq!(run_c("int main(){ return 1+2*3; }"), 7);
}

#[test]
fn modulo_and_division() {
    assert_eq!(run_c("int main(){ int a=10; int b=3; return a%b + a/b; }"), 4);
}

#[test]
fn for_loop_sum() {
    assert_eq!(
        run_c("int main(){ int i; int s=0; for(i=1;i<=10;i++) s=s+i; return s; }"),
        55
    );
}

#[test]
fn recursive_fibonacci() {
    assert_eq!(
        run_c("int f(int n){ if(n<2) return n; return f(n-1)+f(n-2); } int main(){ return f(10); }"),
        55
    );
}

#[test]
fn macro_argument_reexpansion() {
    assert_eq!(
        run_c("#define SQ(x) ((x)*(x))\nint main(){ return SQ(1+2); }"),
        9
    );
}

#[test]
fn global_array_with_inferred_length() {
    assert_eq!(
        run_c("int a[]={1,2,3,4}; int main(){ int s=0; int i; for(i=0;i<4;i++) s+=a[i]; return s; }"),
        10
    );
}

// ---- wider coverage --------------------------------------------------

#[test]
fn while_with_break_and_continue() {
    assert_eq!(
        run_c(
            "int main(){ int i=0; int s=0; \
             while(1){ i++; if(i>10) break; if(i%2) continue; s+=i; } return s; }"
        ),
        30
    );
}

#[test]
fn do_while_runs_at_least_once() {
    assert_eq!(
        run_c("int main(){ int n=0; do { n++; } while(n<5); return n; }"),
        5
    );
}

#[test]
fn switch_with_fallthrough_and_default() {
    let program = "int pick(int v){ int r=0; \
                     switch(v){ \
                       case 1: r += 1; \
                       case 2: r += 2; break; \
                       case 3: r += 4; break; \
                       default: r = 100; \
                     } return r; } \
                   int main(){ return pick(1)*1000 + pick(2)*100 + pick(3)*10 + pick(9); }";
    // pick(1)=3 (falls through), pick(2)=2, pick(3)=4, pick(9)=100
    assert_eq!(run_c(program), 3000 + 200 + 40 + 100);
}

#[test]
fn pointers_and_address_of() {
    assert_eq!(
        run_c("int main(){ int a=5; int *p; p=&a; *p=7; return a + *p; }"),
        14
    );
}

#[test]
fn pointer_arithmetic_scales_by_element() {
    assert_eq!(
        run_c(
            "int main(){ int a[3]; int *p; a[0]=10; a[1]=20; a[2]=30; \
             p = &a[0]; return *(p+2) + p[1]; }"
        ),
        50
    );
}

#[test]
fn struct_members_and_arrow() {
    assert_eq!(
        run_c(
            "struct point { int x; int y; }; \
             int main(){ struct point p; struct point *q; \
             p.x=3; p.y=4; q=&p; q->y = q->y + 10; return p.x*100 + p.y; }"
        ),
        314
    );
}

#[test]
fn union_members_share_storage() {
    assert_eq!(
        run_c("union word { int i; char c; }; int main(){ union word w; w.i = 65; return w.c; }"),
        65
    );
}

#[test]
fn enum_constants_and_switch() {
    assert_eq!(
        run_c(
            "enum op { NOP, INC = 5, DEC }; \
             int main(){ int v = DEC; switch(v){ case 5: return 1; case 6: return 2; } return 3; }"
        ),
        2
    );
}

#[test]
fn ternary_expression() {
    assert_eq!(run_c("int main(){ int a=3; return a > 2 ? a*10 : a; }"), 30);
}

#[test]
fn compound_assignment_operators() {
    assert_eq!(
        run_c(
            "int main(){ int a=1; a += 9; a -= 2; a *= 3; a /= 4; a <<= 2; a |= 1; \
             a &= 30; a ^= 2; a %= 11; return a; }"
        ),
        {
            let mut a = 1i64;
            a += 9;
            a -= 2;
            a *= 3;
            a /= 4;
            a <<= 2;
            a |= 1;
            a &= 30;
            a ^= 2;
            a %= 11;
            a
        }
    );
}

#[test]
fn prefix_and_postfix_increment() {
    assert_eq!(
        run_c("int main(){ int i=5; int a; a = i++; return a*100 + i*10 + ++i; }"),
        5 * 100 + 6 * 10 + 7
    );
}

#[test]
fn logical_operators_normalize() {
    assert_eq!(
        run_c("int main(){ return (3 && 2)*1000 + (0 && 1)*100 + (0 || 5)*10 + !7; }"),
        1010
    );
}

#[test]
fn bitwise_and_shift_expressions() {
    assert_eq!(
        run_c("int main(){ return ((1<<4) | (255 & 15)) ^ 1; }"),
        ((1 << 4) | (255 & 15)) ^ 1
    );
}

#[test]
fn character_literals_and_strings() {
    assert_eq!(
        run_c("int main(){ char *s; s = \"AB\"; return s[1] + 'A'; }"),
        66 + 65
    );
}

#[test]
fn casts_and_long_arithmetic() {
    assert_eq!(
        run_c("int main(){ long big = 5000000000L; return (int)(big / 1000000000L); }"),
        5
    );
    assert_eq!(
        run_c("int main(){ char c; c = (char)321; return c; }"),
        65
    );
}

#[test]
fn sizeof_in_expressions() {
    assert_eq!(
        run_c(
            "struct pair { int a; int b; }; \
             int main(){ int v[10]; return sizeof(v) + sizeof(struct pair) + sizeof(char *); }"
        ),
        40 + 8 + 8
    );
}

#[test]
fn global_scalars_are_writable() {
    assert_eq!(
        run_c("int counter = 7; int bump(){ counter = counter + 2; return 0; } int main(){ bump(); bump(); return counter; }"),
        11
    );
}

#[test]
fn comma_sequences_evaluate_left_to_right() {
    assert_eq!(run_c("int main(){ int a; a = (1, 2, 3); return a; }"), 3);
}

#[test]
fn multiple_declarators_share_the_type() {
    assert_eq!(run_c("int main(){ int a = 1, b = 2, c; c = a + b; return c; }"), 3);
}

#[test]
fn typedefs_name_types() {
    assert_eq!(
        run_c("typedef long word; int main(){ word w; w = 1000000; return (int)(w / 1000); }"),
        1000
    );
}

#[test]
fn local_array_with_inferred_length_is_patched() {
    assert_eq!(
        run_c("int main(){ int a[] = {5, 6, 7}; return a[0]*100 + a[1]*10 + a[2]; }"),
        567
    );
}

#[test]
fn nested_function_calls() {
    assert_eq!(
        run_c(
            "int add(int a, int b){ return a + b; } \
             int twice(int x){ return add(x, x); } \
             int main(){ return add(twice(3), twice(4)); }"
        ),
        14
    );
}

#[test]
fn six_register_arguments() {
    assert_eq!(
        run_c(
            "int pack(int a, int b, int c, int d, int e, int f){ \
               return a + b*10 + c*100 + d*1000 + e*10000 + f*100000; } \
             int main(){ return pack(1, 2, 3, 4, 5, 6); }"
        ),
        654321
    );
}

#[test]
fn variadic_function_walks_the_save_area() {
    assert_eq!(
        run_c(
            "int sum(int n, ...){ \
               __builtin_va_list ap; int s = 0; int i; \
               __builtin_va_start(ap, n); \
               for(i = 0; i < n; i++) s += __builtin_va_arg(ap, int); \
               __builtin_va_end(ap); \
               return s; } \
             int main(){ return sum(3, 10, 20, 30) + sum(1, 5); }"
        ),
        65
    );
}

#[test]
fn conditional_compilation_picks_a_branch() {
    assert_eq!(
        run_c(
            "#define FAST\n\
             #ifdef FAST\n\
             int speed(){ return 2; }\n\
             #else\n\
             int speed(){ return 1; }\n\
             #endif\n\
             int main(){ return speed(); }"
        ),
        2
    );
}

#[test]
fn token_paste_names_a_variable() {
    assert_eq!(
        run_c(
            "#define NAMED(n) value ## n\n\
             int main(){ int value1 = 41; return NAMED(1) + 1; }"
        ),
        42
    );
}

#[test]
fn negative_numbers_and_unary_minus() {
    assert_eq!(run_c("int main(){ int a = -5; return -a * 3 + -(2 - 4); }"), 17);
}

#[test]
fn char_arithmetic_promotes() {
    assert_eq!(
        run_c("int main(){ char a = 'a'; char z; z = a + 25; return z == 'z'; }"),
        1
    );
}

#[test]
fn include_pulls_in_another_file() {
    let dir = std::env::temp_dir().join(format!("rcc-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("lib.h"), "int triple(int x){ return 3*x; }\n").unwrap();
    std::fs::write(
        dir.join("main.c"),
        "#include \"lib.h\"\nint main(){ return triple(14); }\n",
    )
    .unwrap();
    let asm = rcc::compile_file(dir.join("main.c")).expect("compilation failed");
    assert_eq!(Program::load(&asm).run("main"), 42);
    std::fs::remove_dir_all(&dir).ok();
}
