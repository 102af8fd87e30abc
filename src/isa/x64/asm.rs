//! The assembly output buffer.
//!
//! Append-only `.data` and `.text` sections. The buffer starts with the
//! `_start` preamble; `finish()` closes the text section with the Linux
//! `exit(0)` syscall and then flushes the procedure section, so procedure
//! bodies follow the entry-point code without being fallen into.

/// Collects assembly text and writes it out section by section.
pub struct AsmBuffer {
    data: Vec<String>,
    text: Vec<String>,
    procedures: Vec<String>,
    procedure_mode: bool,
}

impl AsmBuffer {
    /// Create a buffer holding the program entry preamble.
    pub fn new() -> Self {
        let mut buffer = Self {
            data: Vec::new(),
            text: Vec::new(),
            procedures: Vec::new(),
            procedure_mode: false,
        };
        buffer.text.push(".global _start".to_string());
        buffer.text.push("_start:".to_string());
        buffer
    }

    /// Route subsequent text into the procedure section.
    pub fn enter_procedure_mode(&mut self) {
        self.procedure_mode = true;
    }

    /// Append a comment to the current text section.
    pub fn comment(&mut self, content: &str) {
        let line = format!("# {content}");
        self.section().push(line);
    }

    /// Append one instruction line to the current text section.
    ///
    /// A `movq $0, %reg` is strength-reduced to `xorq %reg, %reg` on the
    /// way in.
    pub fn push(&mut self, line: String) {
        if let Some(reg) = zero_move_register(&line) {
            let fixed = format!("\txorq {reg}, {reg}");
            self.section().push(fixed);
            return;
        }
        self.section().push(line);
    }

    /// Emit a global scalar into the `.data` section.
    pub fn global_variable(&mut self, name: &str, value: i64) {
        self.data.push(".align 8".to_string());
        self.data.push(format!("{name}:"));
        self.data.push(format!(".quad {value}"));
    }

    /// Emit a zeroed global array of `size_bytes` into the `.data` section.
    pub fn global_array(&mut self, name: &str, size_bytes: u32) {
        self.data.push(".align 8".to_string());
        self.data.push(format!("{name}:"));
        self.data.push(format!(".zero {size_bytes}"));
    }

    /// Render the finished assembly file.
    pub fn finish(mut self) -> String {
        // The exit epilogue is appended verbatim; the zero move stays a
        // plain move here.
        self.text.push("\tmovq $60, %rax".to_string());
        self.text.push("\tmovq $0, %rbx".to_string());
        self.text.push("\tsyscall".to_string());

        let mut out = String::new();
        out.push_str(".data\n");
        for line in &self.data {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str(".text\n");
        for line in self.text.iter().chain(self.procedures.iter()) {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    fn section(&mut self) -> &mut Vec<String> {
        if self.procedure_mode {
            &mut self.procedures
        } else {
            &mut self.text
        }
    }
}

impl Default for AsmBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// When `line` is exactly `\tmovq $0, %reg`, return the register operand.
fn zero_move_register(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("\tmovq $0, ")?;
    if rest.starts_with('%') && !rest.contains([',', '(', ')']) {
        Some(rest)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_program_is_preamble_and_exit() {
        let asm = AsmBuffer::new().finish();
        assert_eq!(
            asm,
            ".data\n.text\n.global _start\n_start:\n\tmovq $60, %rax\n\tmovq $0, %rbx\n\tsyscall\n"
        );
    }

    #[test]
    fn zero_moves_become_xor() {
        let mut asm = AsmBuffer::new();
        asm.push("\tmovq $0, %r15".to_string());
        asm.push("\tmovq $1, %r15".to_string());
        asm.push("\tmovq $0, x(%rip)".to_string());
        let out = asm.finish();
        assert!(out.contains("\txorq %r15, %r15\n"));
        assert!(out.contains("\tmovq $1, %r15\n"));
        // Stores to memory are not rewritten.
        assert!(out.contains("\tmovq $0, x(%rip)\n"));
    }

    #[test]
    fn procedure_text_lands_after_the_exit_epilogue() {
        let mut asm = AsmBuffer::new();
        asm.push("\tcall p".to_string());
        asm.enter_procedure_mode();
        asm.push("p:".to_string());
        asm.push("\tret".to_string());
        let out = asm.finish();

        let call = out.find("\tcall p").unwrap();
        let syscall = out.find("\tsyscall").unwrap();
        let body = out.find("p:\n\tret").unwrap();
        assert!(call < syscall);
        assert!(syscall < body);
    }

    #[test]
    fn data_directives() {
        let mut asm = AsmBuffer::new();
        asm.global_variable("x", 0);
        asm.global_array("a", 128);
        let out = asm.finish();
        assert!(out.contains(".align 8\nx:\n.quad 0\n"));
        assert!(out.contains(".align 8\na:\n.zero 128\n"));
    }
}
