use std::rc::Rc;

use crate::backend::common_data_bus::CDBPacket;
use crate::cpu::CPUConfig;
use crate::instructions::instructions::{FUType, Instr, Opcode, WordType, FU_TYPE_COUNT};
use crate::memory_subsystem::memory_subsystem::MemorySubsystem;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum FUState {
    IDLE,
    EXECUTING,
    // finished, but the result has not been drained onto the bus yet
    COMPLETED,
}

/// A functional unit: one execution resource per operation category, with a
/// configured latency. The unit computes its result on the last latency
/// cycle and then holds it in COMPLETED state until the bus takes it.
pub(crate) struct FU {
    pub(crate) kind: FUType,
    latency: u8,
    state: FUState,
    cycles_remaining: u8,
    instr: Option<Rc<Instr>>,
    rob_index: u16,
    rs_index: u16,
    pc: usize,
    rs1_value: WordType,
    rs2_value: WordType,
    result: WordType,
}

impl FU {
    fn new(kind: FUType, latency: u8) -> Self {
        assert!(latency > 0, "FU: latency must be at least one cycle.");

        Self {
            kind,
            latency,
            state: FUState::IDLE,
            cycles_remaining: 0,
            instr: None,
            rob_index: 0,
            rs_index: 0,
            pc: 0,
            rs1_value: 0,
            rs2_value: 0,
            result: 0,
        }
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.state != FUState::IDLE
    }

    pub(crate) fn is_done(&self) -> bool {
        self.state == FUState::COMPLETED
    }

    pub(crate) fn issue(
        &mut self,
        instr: Rc<Instr>,
        rob_index: u16,
        rs_index: u16,
        pc: usize,
        rs1_value: WordType,
        rs2_value: WordType,
    ) {
        debug_assert!(self.state == FUState::IDLE);
        debug_assert!(instr.fu_type == self.kind);

        self.state = FUState::EXECUTING;
        self.cycles_remaining = self.latency;
        self.instr = Some(instr);
        self.rob_index = rob_index;
        self.rs_index = rs_index;
        self.pc = pc;
        self.rs1_value = rs1_value;
        self.rs2_value = rs2_value;
    }

    pub(crate) fn advance(&mut self, memory_subsystem: &mut MemorySubsystem) {
        if self.state != FUState::EXECUTING {
            return;
        }

        self.cycles_remaining -= 1;
        if self.cycles_remaining > 0 {
            return;
        }

        self.result = self.compute(memory_subsystem);
        self.state = FUState::COMPLETED;
    }

    fn compute(&self, memory_subsystem: &mut MemorySubsystem) -> WordType {
        let instr = self.instr.as_ref().unwrap();

        match instr.opcode {
            Opcode::ADD => self.rs1_value.wrapping_add(self.rs2_value),
            Opcode::SUB => self.rs1_value.wrapping_sub(self.rs2_value),
            Opcode::MUL => self.rs1_value.wrapping_mul(self.rs2_value),
            Opcode::DIV => {
                if self.rs2_value == 0 {
                    0
                } else {
                    self.rs1_value.wrapping_div(self.rs2_value)
                }
            }
            Opcode::AND => self.rs1_value & self.rs2_value,
            Opcode::OR => self.rs1_value | self.rs2_value,
            Opcode::XOR => self.rs1_value ^ self.rs2_value,
            Opcode::ADDI => self.rs1_value.wrapping_add(instr.imm),
            Opcode::LI => instr.imm,
            Opcode::MOV => self.rs1_value,
            Opcode::LW | Opcode::SW => {
                let addr = self.rs1_value.wrapping_add(instr.imm);
                if instr.is_load {
                    memory_subsystem.read(addr)
                } else {
                    memory_subsystem.write(addr, self.rs2_value);
                    self.rs2_value
                }
            }
            Opcode::BEQ => self.branch_target(self.rs1_value == self.rs2_value),
            Opcode::BNE => self.branch_target(self.rs1_value != self.rs2_value),
            Opcode::BLT => self.branch_target(self.rs1_value < self.rs2_value),
            Opcode::BGE => self.branch_target(self.rs1_value >= self.rs2_value),
            Opcode::JMP => instr.imm,
            Opcode::PRINT => {
                println!("PRINT r{}={}", instr.rs1, self.rs1_value);
                0
            }
            Opcode::NOP | Opcode::EXIT => 0,
        }
    }

    // A branch resolves to the next program counter value.
    fn branch_target(&self, taken: bool) -> WordType {
        if taken {
            self.instr.as_ref().unwrap().imm
        } else {
            (self.pc + 1) as WordType
        }
    }

    pub(crate) fn take_output(&self) -> CDBPacket {
        debug_assert!(self.state == FUState::COMPLETED);

        CDBPacket {
            result: self.result,
            rob_index: self.rob_index,
            rs_index: self.rs_index,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.state = FUState::IDLE;
        self.cycles_remaining = 0;
        self.instr = None;
        self.rob_index = 0;
        self.rs_index = 0;
        self.pc = 0;
        self.rs1_value = 0;
        self.rs2_value = 0;
        self.result = 0;
    }
}

/// The functional unit bank: a fixed collection with exactly one unit per
/// operation category, scanned in a fixed order when draining results.
pub(crate) struct FUTable {
    units: Vec<FU>,
}

impl FUTable {
    pub(crate) fn new(cpu_config: &CPUConfig) -> FUTable {
        // index order matches the FUType discriminants
        let units = vec![
            FU::new(FUType::ALU, cpu_config.alu_latency),
            FU::new(FUType::MUL, cpu_config.mul_latency),
            FU::new(FUType::LSU, cpu_config.lsu_latency),
            FU::new(FUType::BRANCH, cpu_config.branch_latency),
        ];
        debug_assert_eq!(units.len(), FU_TYPE_COUNT);

        FUTable { units }
    }

    pub(crate) fn count(&self) -> usize {
        self.units.len()
    }

    pub(crate) fn get_index_mut(&mut self, index: usize) -> &mut FU {
        &mut self.units[index]
    }

    pub(crate) fn get(&self, kind: FUType) -> &FU {
        &self.units[kind as usize]
    }

    pub(crate) fn get_mut(&mut self, kind: FUType) -> &mut FU {
        &mut self.units[kind as usize]
    }
}
