//! Assembly-text and diagnostics checks on the compiler's output.

use std::collections::HashSet;

fn compile(source: &str) -> String {
    rcc::compile_source("test.c", source).expect("compilation failed")
}

#[test]
fn functions_are_declared_for_the_linker() {
    let asm = compile("int helper(){ return 1; } int main(){ return helper(); }");
    assert!(asm.contains(".globl\thelper"));
    assert!(asm.contains(".type\thelper, @function"));
    assert!(asm.contains(".globl\tmain"));
    assert!(asm.contains("\nhelper:\n"));
    assert!(asm.contains("\nmain:\n"));
}

#[test]
fn prologue_and_epilogue_frame_the_body() {
    let asm = compile("int main(){ int a = 1; return a; }");
    let main_at = asm.find("\nmain:\n").unwrap();
    let tail = &asm[main_at..];
    let push = tail.find("pushq\t%rbp").unwrap();
    let setup = tail.find("movq\t%rsp, %rbp").unwrap();
    let reserve = tail.find("subq\t$16, %rsp").unwrap();
    let leave = tail.find("leave").unwrap();
    let ret = tail.find("\tret").unwrap();
    assert!(push < setup && setup < reserve && reserve < leave && leave < ret);
}

#[test]
fn pooled_strings_land_in_rodata() {
    let asm = compile(
        "extern int printf(char *fmt, ...); \
         int main(){ printf(\"%d\\n\", 42); printf(\"%d\\n\", 43); return 0; }",
    );
    assert!(asm.contains(".section\t.rodata"));
    // the same literal is pooled once
    assert_eq!(asm.matches(".string\t\"%d\\n\"").count(), 1);
    assert!(asm.contains(".LC0:"));
    // no vector registers before the variadic call
    assert!(asm.contains("movb\t$0, %al"));
}

#[test]
fn global_array_literals_land_in_rodata() {
    let asm = compile("int table[] = {3, 1, 4, 1, 5}; int main(){ return table[0]; }");
    let rodata = asm.find(".section\t.rodata").unwrap();
    let text = asm.find(".text").unwrap();
    let label = asm.find("table:").unwrap();
    assert!(rodata < label && label < text);
    assert_eq!(asm.matches(".long\t").count(), 5);
}

#[test]
fn uninitialized_globals_reserve_zeroed_storage() {
    let asm = compile("int counter; int main(){ return counter; }");
    assert!(asm.contains("counter:"));
    assert!(asm.contains(".zero\t4"));
}

#[test]
fn extern_globals_emit_no_storage() {
    let asm = compile("extern int errno; int main(){ return 0; }");
    assert!(!asm.contains("errno:"));
}

#[test]
fn labels_are_unique() {
    let asm = compile(
        "int main(){ int i; int s = 0; \
         for(i=0;i<3;i++){ if(i%2) s+=i; else s-=i; while(s<0) s++; } return s; }",
    );
    let mut seen = HashSet::new();
    for line in asm.lines() {
        if let Some(label) = line.strip_suffix(':') {
            if label.starts_with(".L") {
                assert!(seen.insert(label.to_string()), "duplicate label {label}");
            }
        }
    }
    assert!(!seen.is_empty());
}

#[test]
fn comparisons_use_the_flag_setters() {
    let asm = compile(
        "int main(int argc){ return (argc==1) + (argc!=2) + (argc<3) + (argc<=4) + (argc>5) + (argc>=6); }",
    );
    for set in ["sete", "setne", "setl\t", "setle", "setg\t", "setge"] {
        assert!(asm.contains(set), "missing {set}");
    }
    assert!(asm.contains("xorl\t%eax, %eax"));
    assert!(asm.contains("subl\t%edx, %ecx"));
}

// ---- diagnostics -----------------------------------------------------

#[test]
fn errors_carry_file_line_and_column() {
    let err = rcc::compile_source("prog.c", "int main(){\n  int a = $;\n}").unwrap_err();
    let text = err.to_string();
    assert!(text.starts_with("prog.c:2:"), "got: {text}");
}

#[test]
fn unknown_directive_is_reported() {
    let err = rcc::compile_source("prog.c", "#pragma once\n").unwrap_err();
    assert!(err.to_string().contains("unknown directive"));
}

#[test]
fn unterminated_string_is_reported() {
    let err = rcc::compile_source("prog.c", "char *s = \"abc;\n").unwrap_err();
    assert!(err.to_string().contains("unterminated string"));
}

#[test]
fn unbalanced_block_is_reported() {
    let err = rcc::compile_source("prog.c", "int main(){ return 0;").unwrap_err();
    assert!(err.to_string().contains("invalid block end"));
}

#[test]
fn wrong_arity_is_reported_with_the_callee() {
    let err = rcc::compile_source(
        "prog.c",
        "int two(int a, int b){ return a+b; } int main(){ return two(1,2,3); }",
    )
    .unwrap_err();
    let text = err.to_string();
    assert!(text.contains("wrong number of arguments"));
    assert!(text.contains("two"));
}

#[test]
fn assignment_needs_an_lvalue() {
    let err = rcc::compile_source("prog.c", "int main(){ 3 = 4; return 0; }").unwrap_err();
    assert!(err.to_string().contains("left-hand side"));
}
