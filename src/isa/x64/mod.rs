//! Context-sensitive x86-64 code generation.
//!
//! Blocks are emitted in their `(major, minor)` order. Inside a block the
//! generator works instruction by instruction against the per-block
//! liveness table: registers are acquired on demand, spilled when the class
//! runs dry, and every register-resident named variable is flushed back to
//! its memory home when the block ends. Temporaries never outlive a block
//! and are never flushed.

pub mod abi;
pub mod asm;
pub mod regs;

use crate::blocks::Blocks;
use crate::ir::{extract_label, Block, Opcode, TacInst};
use crate::liveness::{LivenessMap, LivenessTable};
use crate::result::{CodegenError, CodegenResult};
use crate::symtab::{SymbolKind, SymbolTables};
use log::trace;

use self::abi::{AddressTable, GlobalTable, Location, StackTable, SCALAR_SLOT};
use self::asm::AsmBuffer;
use self::regs::{Reg, RegClass, RegisterAllocationTable};

/// Width of one AVX spill slot in bytes.
const VECTOR_SLOT: u32 = 32;

/// Generates assembly from the blocked three-address code.
pub struct CodeGenerator<'a> {
    blocks: &'a Blocks,
    tables: &'a SymbolTables,
    regs: RegisterAllocationTable,
    addrs: AddressTable,
    globals: GlobalTable,
    stack: StackTable,
    asm: AsmBuffer,
}

impl<'a> CodeGenerator<'a> {
    /// Emit the whole program and return the assembly text.
    pub fn generate(blocks: &'a Blocks, tables: &'a SymbolTables) -> CodegenResult<String> {
        let mut this = Self {
            blocks,
            tables,
            regs: RegisterAllocationTable::new(),
            addrs: AddressTable::new(),
            globals: GlobalTable::new(),
            stack: StackTable::new(),
            asm: AsmBuffer::new(),
        };
        for &b in blocks.order() {
            this.emit_block(b)?;
        }
        Ok(this.asm.finish())
    }

    fn emit_block(&mut self, b: Block) -> CodegenResult<()> {
        let liveness = LivenessTable::compute(&self.blocks[b]);
        let insts = self.blocks[b].insts.clone();
        let changes_control = self.blocks[b].changes_control_at_end();
        if insts.is_empty() {
            return Ok(());
        }

        let last = insts.len() - 1;
        for (i, inst) in insts.iter().enumerate() {
            if i == last && changes_control {
                // Registers must reach memory before control leaves; the
                // stores are plain moves and do not disturb the flags a
                // preceding comparison set.
                self.flush_registers();
                self.emit_inst(inst, &liveness)?;
            } else {
                self.emit_inst(inst, &liveness)?;
                if i == last {
                    self.flush_registers();
                }
            }
        }
        Ok(())
    }

    fn emit_inst(&mut self, inst: &TacInst, liveness: &LivenessTable) -> CodegenResult<()> {
        trace!("emit {inst}");
        self.asm.comment(&inst.to_string());

        self.addrs
            .insert_if_literal(&inst.arg1, inst.scope, self.tables);
        self.addrs
            .insert_if_literal(&inst.arg2, inst.scope, self.tables);

        let live = liveness.at(inst.id);
        match inst.op {
            Opcode::Nop => self.asm.push("\tnop".to_string()),
            Opcode::EnterProc => self.emit_enter_proc(inst)?,
            Opcode::ExitProc => self.emit_exit_proc(),
            // Parameter and return slots were laid out by the prologue.
            Opcode::ProcParam | Opcode::Retval => {}
            Opcode::Label => self.emit_label(inst),
            Opcode::UncondJmp
            | Opcode::Call
            | Opcode::JmpE
            | Opcode::JmpL
            | Opcode::JmpG
            | Opcode::JmpLe
            | Opcode::JmpGe
            | Opcode::JmpNe
            | Opcode::JmpZero => self.emit_labelled(inst.op, &inst.arg1),
            Opcode::Read => self.emit_read(inst)?,
            Opcode::Write => self.emit_write(inst)?,
            Opcode::Negate => {
                let reg = self.force_register(live, &inst.arg1, RegClass::Gpr, false)?;
                self.asm.push(format!("\tnegq {}", reg.operand()));
            }
            Opcode::Assign => {
                if inst.is_declaration() {
                    self.emit_declaration(inst)?;
                } else {
                    self.emit_special_assign(inst, live)?;
                }
            }
            Opcode::Add | Opcode::Sub | Opcode::Mult | Opcode::Div => {
                self.emit_general_binary(inst, live)?;
            }
            Opcode::LessThan
            | Opcode::GreaterThan
            | Opcode::GeThan
            | Opcode::LeThan
            | Opcode::Equals
            | Opcode::NotEquals => self.emit_conditional(inst, live)?,
            Opcode::ArrayIndex => self.emit_array_index(inst, live)?,
            Opcode::Vadd | Opcode::Vsub => self.emit_vector_binary(inst, live)?,
            Opcode::Vassign => self.emit_vector_broadcast(inst, live)?,
            Opcode::Vload => self.emit_vector_load(inst, live)?,
            Opcode::Vstore => self.emit_vector_store(inst, live)?,
        }
        Ok(())
    }

    fn emit_label(&mut self, inst: &TacInst) {
        let stripped = extract_label(&inst.arg1);
        // Procedure entry labels open the procedure section; everything
        // from here on is emitted after the program's exit epilogue.
        if let Some((SymbolKind::Procedure { .. }, _)) = self.tables.lookup(inst.scope, stripped) {
            self.asm.enter_procedure_mode();
        }
        self.asm.push(format!("{stripped}:"));
    }

    fn emit_labelled(&mut self, op: Opcode, label: &str) {
        let mnemonic = match op {
            Opcode::UncondJmp => "jmp",
            Opcode::Call => "call",
            Opcode::JmpE => "je",
            Opcode::JmpL => "jl",
            Opcode::JmpG => "jg",
            Opcode::JmpLe => "jle",
            Opcode::JmpGe => "jge",
            Opcode::JmpNe => "jne",
            Opcode::JmpZero => "jz",
            _ => unreachable!("not a labelled instruction: {op}"),
        };
        self.asm
            .push(format!("\t{mnemonic} {}", extract_label(label)));
    }

    /// Global-scope declarations go to the `.data` section; inside a
    /// procedure they get a frame slot (8 bytes, or the element count times
    /// 8 for arrays).
    fn emit_declaration(&mut self, inst: &TacInst) -> CodegenResult<()> {
        let name = &inst.result;
        if self.stack.in_global_scope() {
            match self.tables.lookup(inst.scope, name) {
                Some((
                    SymbolKind::Variable {
                        is_array: true,
                        array_size,
                        ..
                    },
                    _,
                )) => {
                    let size = *array_size as u32 * SCALAR_SLOT;
                    self.asm.global_array(name, size);
                    self.globals.insert_global_array(name, size);
                }
                Some((SymbolKind::Variable { value, .. }, _)) => {
                    self.asm.global_variable(name, *value);
                    self.globals.insert_global_variable(name, SCALAR_SLOT);
                }
                _ => {
                    return Err(CodegenError::Internal(format!(
                        "declaration of unknown symbol `{name}`"
                    )))
                }
            }
            self.addrs.insert(name, Location::Global(name.clone()));
        } else {
            let size = self.tables.size_bytes(inst.scope, name);
            self.stack.allocate(name, size);
            let offset = self.stack.rendered_offset(name).unwrap();
            self.addrs.insert(name, Location::Stack(offset));
        }
        Ok(())
    }

    /// Two-address `movq src, dst`. The source is materialized through a
    /// register when both sides would otherwise be memory operands.
    fn emit_special_assign(&mut self, inst: &TacInst, live: &LivenessMap) -> CodegenResult<()> {
        let src = self.location_of(&inst.arg1)?;

        let (dst_addr, dst_is_memory) = match self.addrs.get(&inst.result).cloned() {
            Some(loc) => (loc.address(), loc.in_memory() || loc.is_reg_address()),
            None => {
                let reg = self.get_register(live, &inst.result, RegClass::Gpr, false);
                (reg.operand(), false)
            }
        };

        let src_addr = if src.in_memory() && dst_is_memory {
            let reg = self.force_register(live, &inst.arg1, RegClass::Gpr, false)?;
            reg.operand()
        } else {
            src.address()
        };

        self.asm.push(format!("\tmovq {src_addr}, {dst_addr}"));
        Ok(())
    }

    /// `result := arg1 op arg2` in destructive two-address form: the first
    /// operand's register receives the result and the operand is rehomed to
    /// its memory location so later flushes cannot clobber it.
    fn emit_general_binary(&mut self, inst: &TacInst, live: &LivenessMap) -> CodegenResult<()> {
        let mnemonic = match inst.op {
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mult => "imul",
            Opcode::Div => "idiv",
            _ => unreachable!(),
        };
        let reg = self.force_register(live, &inst.arg1, RegClass::Gpr, false)?;
        let other = self.location_of(&inst.arg2)?.address();
        self.asm
            .push(format!("\t{mnemonic}q {other}, {}", reg.operand()));

        if inst.arg1 != inst.result {
            self.rehome_operand(&inst.arg1);
        }
        self.regs.set_register_value(reg, &inst.result);
        self.addrs.insert(
            &inst.result,
            Location::Register {
                reg,
                is_address: false,
            },
        );
        Ok(())
    }

    /// `cmpq arg2, arg1`. When the boolean result is wanted, a fresh
    /// register receives it through `set*`/`movzbq`; the operand register
    /// is never reused for the result.
    fn emit_conditional(&mut self, inst: &TacInst, live: &LivenessMap) -> CodegenResult<()> {
        let reg = self.force_register(live, &inst.arg1, RegClass::Gpr, false)?;
        let other = self.location_of(&inst.arg2)?.address();
        self.asm
            .push(format!("\tcmpq {other}, {}", reg.operand()));

        if inst.has_result() {
            let cc = match inst.op {
                Opcode::LessThan => "l",
                Opcode::GreaterThan => "g",
                Opcode::GeThan => "ge",
                Opcode::LeThan => "le",
                Opcode::Equals => "e",
                Opcode::NotEquals => "ne",
                _ => unreachable!(),
            };
            let result = self.get_register(live, &inst.result, RegClass::Gpr, false);
            self.asm.push(format!("\tset{cc} {}", result.low8_operand()));
            self.asm.push(format!(
                "\tmovzbq {}, {}",
                result.low8_operand(),
                result.operand()
            ));
        }
        Ok(())
    }

    /// `leaq (base, index, 8), result`; the result register carries an
    /// element address.
    fn emit_array_index(&mut self, inst: &TacInst, live: &LivenessMap) -> CodegenResult<()> {
        let index = self.force_register(live, &inst.arg2, RegClass::Gpr, false)?;
        let base = self.force_register(live, &inst.arg1, RegClass::Gpr, true)?;
        let result = self.get_register(live, &inst.result, RegClass::Gpr, true);
        self.asm.push(format!(
            "\tleaq ({}, {}, 8), {}",
            base.operand(),
            index.operand(),
            result.operand()
        ));
        Ok(())
    }

    fn emit_write(&mut self, inst: &TacInst) -> CodegenResult<()> {
        let source = self.location_of(&inst.arg1)?.address();
        let saved = self.push_in_use_gprs();
        self.asm.push("\tpushq %rsi".to_string());
        self.asm.push("\tpushq %rdi".to_string());
        self.asm.push(format!("\tmovq {source}, %rdi"));
        self.asm.push("\tcall write_pl_0".to_string());
        self.asm.push("\tpopq %rdi".to_string());
        self.asm.push("\tpopq %rsi".to_string());
        self.pop_gprs(saved);
        Ok(())
    }

    /// `read_pl_0` leaves the value in `%rax`; it is stored straight to the
    /// variable's memory home.
    fn emit_read(&mut self, inst: &TacInst) -> CodegenResult<()> {
        let name = &inst.arg1;
        let home = if self.globals.is_global(name) {
            Location::Global(name.clone())
        } else {
            if !self.stack.in_stack(name) {
                self.stack.allocate(name, SCALAR_SLOT);
            }
            Location::Stack(self.stack.rendered_offset(name).unwrap())
        };

        let saved = self.push_in_use_gprs();
        self.asm.push("\tcall read_pl_0".to_string());
        self.asm.push(format!("\tmovq %rax, {}", home.address()));
        self.pop_gprs(saved);
        self.addrs.insert(name, home);
        Ok(())
    }

    /// Procedure prologue: frame setup plus one 8-byte slot per parameter
    /// and for the return value.
    fn emit_enter_proc(&mut self, inst: &TacInst) -> CodegenResult<()> {
        let name = &inst.arg1;
        let (params, return_name) = match self.tables.lookup(inst.scope, name) {
            Some((
                SymbolKind::Procedure {
                    params,
                    return_name,
                    ..
                },
                _,
            )) => (params.clone(), return_name.clone()),
            _ => {
                return Err(CodegenError::Internal(format!(
                    "entering unknown procedure `{name}`"
                )))
            }
        };

        self.stack.new_base_address();
        let frame_size = SCALAR_SLOT * (params.len() as u32 + return_name.is_some() as u32);
        self.asm.push("\tpushq %rbp".to_string());
        self.asm.push("\tmovq %rsp, %rbp".to_string());
        self.asm.push(format!("\tsubq ${frame_size}, %rsp"));

        for (param, _) in &params {
            self.stack.allocate(param, SCALAR_SLOT);
            let offset = self.stack.rendered_offset(param).unwrap();
            self.addrs.insert(param, Location::Stack(offset));
        }
        if let Some(ret) = &return_name {
            self.stack.allocate(ret, SCALAR_SLOT);
            let offset = self.stack.rendered_offset(ret).unwrap();
            self.addrs.insert(ret, Location::Stack(offset));
        }
        Ok(())
    }

    fn emit_exit_proc(&mut self) {
        self.asm.push("\tmovq %rbp, %rsp".to_string());
        self.asm.push("\tpopq %rbp".to_string());
        self.asm.push("\tret".to_string());
        self.stack.reset_to_previous_base_address();
        self.addrs.clear_registers();
        self.regs.clear();
    }

    fn emit_vector_binary(&mut self, inst: &TacInst, live: &LivenessMap) -> CodegenResult<()> {
        let mnemonic = if inst.op == Opcode::Vadd {
            "vaddpd"
        } else {
            "vsubpd"
        };
        let a = self.force_register(live, &inst.arg1, RegClass::Avx, false)?;
        let b = self.force_register(live, &inst.arg2, RegClass::Avx, false)?;
        let dst = self.get_register(live, &inst.result, RegClass::Avx, false);
        self.asm.push(format!(
            "\t{mnemonic} {}, {}, {}",
            b.operand(),
            a.operand(),
            dst.operand()
        ));
        Ok(())
    }

    /// Broadcast a scalar into all four lanes of the result register.
    fn emit_vector_broadcast(&mut self, inst: &TacInst, live: &LivenessMap) -> CodegenResult<()> {
        let scalar = self.force_register(live, &inst.arg1, RegClass::Gpr, false)?;
        let dst = self.get_register(live, &inst.result, RegClass::Avx, false);
        self.asm.push(format!(
            "\tvmovq {}, {}",
            scalar.operand(),
            dst.xmm_operand()
        ));
        self.asm.push(format!(
            "\tvpbroadcastq {}, {}",
            dst.xmm_operand(),
            dst.operand()
        ));
        Ok(())
    }

    fn emit_vector_load(&mut self, inst: &TacInst, live: &LivenessMap) -> CodegenResult<()> {
        let index = self.force_register(live, &inst.arg2, RegClass::Gpr, false)?;
        let base = self.force_register(live, &inst.arg1, RegClass::Gpr, true)?;
        let dst = self.get_register(live, &inst.result, RegClass::Avx, false);
        self.asm.push(format!(
            "\tvmovdqu ({}, {}, 8), {}",
            base.operand(),
            index.operand(),
            dst.operand()
        ));
        Ok(())
    }

    fn emit_vector_store(&mut self, inst: &TacInst, live: &LivenessMap) -> CodegenResult<()> {
        let value = self.force_register(live, &inst.arg1, RegClass::Avx, false)?;
        let index = self.force_register(live, &inst.arg2, RegClass::Gpr, false)?;
        let base = self.force_register(live, &inst.result, RegClass::Gpr, true)?;
        self.asm.push(format!(
            "\tvmovdqu {}, ({}, {}, 8)",
            value.operand(),
            base.operand(),
            index.operand()
        ));
        Ok(())
    }

    /// Obtain a register for `variable`.
    ///
    /// A register already holding the variable is reused when the variable
    /// is dead with no next use here, spilling a memory-resident variable's
    /// old value first. Otherwise a free register of the class is taken, or
    /// an in-use one is spilled. Finally the variable is moved in from
    /// memory when it lives there, and the register is bound to it.
    fn get_register(
        &mut self,
        live: &LivenessMap,
        variable: &str,
        class: RegClass,
        address: bool,
    ) -> Reg {
        let mut reused = false;
        let reg = match self.addrs.register_of(variable) {
            Some(current) if current.class() == class && !live.is_live(variable) => {
                if self.globals.is_global(variable) || self.stack.in_stack(variable) {
                    self.store_content_from_register(current);
                }
                reused = true;
                current
            }
            _ => self.take_register(class),
        };

        if !reused {
            self.move_in_if_memory(variable, reg, address);
        }
        self.regs.set_register_value(reg, variable);
        self.addrs.insert(
            variable,
            Location::Register {
                reg,
                is_address: address,
            },
        );
        reg
    }

    /// A register that must hold `variable`'s current value.
    ///
    /// When the variable already sits in a register of the right class it
    /// is used as is; a register holding the variable's *address* when its
    /// value is wanted forces a load through the address into a fresh
    /// register.
    fn force_register(
        &mut self,
        live: &LivenessMap,
        variable: &str,
        class: RegClass,
        address: bool,
    ) -> CodegenResult<Reg> {
        if let Some(Location::Register { reg, is_address }) =
            self.addrs.get(variable).cloned()
        {
            if reg.class() == class {
                if is_address && !address {
                    let fresh = self.take_register(class);
                    self.asm.push(format!(
                        "\tmovq {}, {}",
                        reg.as_memory(),
                        fresh.operand()
                    ));
                    self.regs.free_register(reg);
                    self.regs.set_register_value(fresh, variable);
                    self.addrs.insert(
                        variable,
                        Location::Register {
                            reg: fresh,
                            is_address: false,
                        },
                    );
                    return Ok(fresh);
                }
                return Ok(reg);
            }
        }
        Ok(self.get_register(live, variable, class, address))
    }

    /// A free register of `class`, spilling one when none is free.
    fn take_register(&mut self, class: RegClass) -> Reg {
        if let Some(reg) = self.regs.unused_register(class) {
            return reg;
        }
        let victim = self
            .regs
            .register_in_use(class)
            .expect("register class is empty");
        self.store_content_from_register(victim);
        victim
    }

    fn move_in_if_memory(&mut self, variable: &str, reg: Reg, address: bool) {
        if let Some(location) = self.addrs.get(variable) {
            if !location.in_register() {
                let mnemonic = match (reg.class(), address) {
                    (RegClass::Avx, _) => "vmovdqu",
                    (RegClass::Gpr, true) => "leaq",
                    (RegClass::Gpr, false) => "movq",
                };
                self.asm.push(format!(
                    "\t{mnemonic} {}, {}",
                    location.address(),
                    reg.operand()
                ));
            }
        }
    }

    /// Save whatever `reg` holds back to memory and release it.
    fn store_content_from_register(&mut self, reg: Reg) {
        let Some(variable) = self.regs.variable_in_register(reg).map(str::to_string) else {
            return;
        };
        // Literal names hold immediates; nothing to save.
        if variable.parse::<i64>().is_ok() {
            self.regs.free_register(reg);
            self.addrs
                .insert(&variable, Location::Immediate(variable.clone()));
            return;
        }
        // A register holding the *address* of a memory-resident variable is
        // a derived pointer; the home is intact and the pointer can be
        // rematerialized with another `leaq`.
        let holds_address = matches!(self.addrs.get(&variable), Some(l) if l.is_reg_address());
        if holds_address
            && (self.globals.is_global(&variable) || self.stack.in_stack(&variable))
        {
            self.regs.free_register(reg);
            self.rehome_operand(&variable);
            return;
        }
        self.store_variable(&variable, reg);
    }

    fn store_variable(&mut self, variable: &str, reg: Reg) {
        if self.globals.is_global(variable) {
            self.store_in_global(variable, reg);
        } else {
            self.store_in_stack(variable, reg);
        }
    }

    fn store_in_global(&mut self, variable: &str, reg: Reg) {
        let mnemonic = if reg.class() == RegClass::Avx {
            "vmovdqu"
        } else {
            "movq"
        };
        self.asm
            .push(format!("\t{mnemonic} {}, {variable}(%rip)", reg.operand()));
        self.regs.free_register(reg);
        self.addrs
            .insert(variable, Location::Global(variable.to_string()));
    }

    fn store_in_stack(&mut self, variable: &str, reg: Reg) {
        if !self.stack.in_stack(variable) {
            let size = if reg.class() == RegClass::Avx {
                VECTOR_SLOT
            } else {
                SCALAR_SLOT
            };
            self.stack.allocate(variable, size);
        }
        let offset = self.stack.rendered_offset(variable).unwrap();
        let mnemonic = if reg.class() == RegClass::Avx {
            "vmovdqu"
        } else {
            "movq"
        };
        self.asm
            .push(format!("\t{mnemonic} {}, {offset}(%rbp)", reg.operand()));
        self.regs.free_register(reg);
        self.addrs.insert(variable, Location::Stack(offset));
    }

    /// After a destructive binary operation the first operand no longer
    /// lives in its register; point it back at its memory home (or its
    /// immediate value) so block-end flushes stay correct.
    fn rehome_operand(&mut self, variable: &str) {
        if self.globals.is_global(variable) {
            self.addrs
                .insert(variable, Location::Global(variable.to_string()));
        } else if let Some(offset) = self.stack.rendered_offset(variable) {
            self.addrs.insert(variable, Location::Stack(offset));
        } else if variable.parse::<i64>().is_ok() {
            self.addrs
                .insert(variable, Location::Immediate(variable.to_string()));
        } else {
            self.addrs.remove(variable);
        }
    }

    /// Flush every register-resident named variable back to its memory
    /// home and release all registers. Temporaries are dropped.
    fn flush_registers(&mut self) {
        for (variable, reg, is_address) in self.addrs.register_entries() {
            // Address registers are derived pointers, not values; the
            // memory home is already current.
            if is_address {
                continue;
            }
            if self.globals.is_global(&variable) {
                self.store_in_global(&variable, reg);
            } else if self.stack.in_stack(&variable) {
                self.store_in_stack(&variable, reg);
            }
        }
        self.addrs.clear_registers();
        self.regs.clear();
    }

    fn push_in_use_gprs(&mut self) -> Vec<Reg> {
        let saved: Vec<Reg> = self
            .regs
            .registers_in_use()
            .into_iter()
            .filter(|r| r.class() == RegClass::Gpr)
            .collect();
        for reg in &saved {
            self.asm.push(format!("\tpushq {}", reg.operand()));
        }
        saved
    }

    fn pop_gprs(&mut self, saved: Vec<Reg>) {
        for reg in saved.iter().rev() {
            self.asm.push(format!("\tpopq {}", reg.operand()));
        }
    }

    fn location_of(&self, variable: &str) -> CodegenResult<Location> {
        self.addrs.get(variable).cloned().ok_or_else(|| {
            CodegenError::Internal(format!("failed register lookup for `{variable}`"))
        })
    }
}
