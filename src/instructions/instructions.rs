use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::cpu::GENERAL_ARCH_REG_CNT;

pub(crate) type RegisterType = u16;
pub(crate) type WordType = i32;

#[derive(Debug, Clone, Copy)]
pub(crate) struct SourceLocation {
    pub(crate) line: usize,
    pub(crate) column: usize,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Opcode {
    ADD,
    SUB,
    MUL,
    DIV,
    AND,
    OR,
    XOR,
    ADDI,
    LI,
    MOV,
    LW,
    SW,
    BEQ,
    BNE,
    BLT,
    BGE,
    JMP,
    NOP,
    PRINT,
    EXIT,
}

/// The functional unit category an instruction executes on.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum FUType {
    ALU,
    MUL,
    LSU,
    BRANCH,
}

pub(crate) const FU_TYPE_COUNT: usize = 4;

pub(crate) fn mnemonic(opcode: Opcode) -> &'static str {
    match opcode {
        Opcode::ADD => "ADD",
        Opcode::SUB => "SUB",
        Opcode::MUL => "MUL",
        Opcode::DIV => "DIV",
        Opcode::AND => "AND",
        Opcode::OR => "OR",
        Opcode::XOR => "XOR",
        Opcode::ADDI => "ADDI",
        Opcode::LI => "LI",
        Opcode::MOV => "MOV",
        Opcode::LW => "LW",
        Opcode::SW => "SW",
        Opcode::BEQ => "BEQ",
        Opcode::BNE => "BNE",
        Opcode::BLT => "BLT",
        Opcode::BGE => "BGE",
        Opcode::JMP => "JMP",
        Opcode::NOP => "NOP",
        Opcode::PRINT => "PRINT",
        Opcode::EXIT => "EXIT",
    }
}

pub(crate) fn get_opcode(mnemonic: &str) -> Option<Opcode> {
    let string = mnemonic.to_uppercase();
    let mnemonic_uppercased = string.as_str();

    match mnemonic_uppercased {
        "ADD" => Some(Opcode::ADD),
        "SUB" => Some(Opcode::SUB),
        "MUL" => Some(Opcode::MUL),
        "DIV" => Some(Opcode::DIV),
        "AND" => Some(Opcode::AND),
        "OR" => Some(Opcode::OR),
        "XOR" => Some(Opcode::XOR),
        "ADDI" => Some(Opcode::ADDI),
        "LI" => Some(Opcode::LI),
        "MOV" => Some(Opcode::MOV),
        "LW" => Some(Opcode::LW),
        "SW" => Some(Opcode::SW),
        "BEQ" => Some(Opcode::BEQ),
        "BNE" => Some(Opcode::BNE),
        "BLT" => Some(Opcode::BLT),
        "BGE" => Some(Opcode::BGE),
        "JMP" => Some(Opcode::JMP),
        "NOP" => Some(Opcode::NOP),
        "PRINT" => Some(Opcode::PRINT),
        "EXIT" => Some(Opcode::EXIT),
        _ => None,
    }
}

pub(crate) fn get_register(name: &str) -> Option<RegisterType> {
    let reg_name = &name[1..];
    let reg: RegisterType = match reg_name.parse() {
        Ok(reg) => reg,
        Err(_) => return None,
    };

    if reg >= GENERAL_ARCH_REG_CNT {
        return None;
    }
    Some(reg)
}

/// An operand as it appears in the assembly text. Only the loader deals in
/// these; an issued instruction carries flat register/immediate fields.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Operand {
    Register(RegisterType),
    // The operand is directly specified in the instruction itself.
    Immediate(WordType),
    // Base register plus word offset.
    Memory(RegisterType, WordType),
    // An address in the code (a resolved label).
    Code(usize),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Register(reg) => write!(f, "r{}", reg),
            Operand::Immediate(val) => write!(f, "#{}", val),
            Operand::Memory(base, 0) => write!(f, "[r{}]", base),
            Operand::Memory(base, offset) => write!(f, "[r{}, #{}]", base, offset),
            Operand::Code(addr) => write!(f, "{}", addr),
        }
    }
}

/// A decoded instruction. Immutable once issued; the reorder buffer, the
/// reservation station and the functional unit all share it by reference.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Instr {
    pub(crate) opcode: Opcode,
    pub(crate) fu_type: FUType,
    pub(crate) rs1: RegisterType,
    pub(crate) rs2: RegisterType,
    pub(crate) rd: RegisterType,
    pub(crate) imm: WordType,
    pub(crate) use_rs1: bool,
    pub(crate) use_rs2: bool,
    pub(crate) use_rd: bool,
    pub(crate) is_load: bool,
    // A control instruction halts fetch until its target is known.
    pub(crate) is_control: bool,
    pub(crate) is_exit: bool,
    pub(crate) loc: Option<SourceLocation>,
}

impl Instr {
    pub(crate) fn is_mem(&self) -> bool {
        self.fu_type == FUType::LSU
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", mnemonic(self.opcode))?;

        match self.opcode {
            Opcode::ADD
            | Opcode::SUB
            | Opcode::MUL
            | Opcode::DIV
            | Opcode::AND
            | Opcode::OR
            | Opcode::XOR => write!(f, " r{},r{},r{}", self.rd, self.rs1, self.rs2)?,
            Opcode::ADDI => write!(f, " r{},r{},#{}", self.rd, self.rs1, self.imm)?,
            Opcode::LI => write!(f, " r{},#{}", self.rd, self.imm)?,
            Opcode::MOV => write!(f, " r{},r{}", self.rd, self.rs1)?,
            Opcode::LW => write!(f, " r{},[r{}, #{}]", self.rd, self.rs1, self.imm)?,
            Opcode::SW => write!(f, " r{},[r{}, #{}]", self.rs2, self.rs1, self.imm)?,
            Opcode::BEQ | Opcode::BNE | Opcode::BLT | Opcode::BGE => {
                write!(f, " r{},r{},{}", self.rs1, self.rs2, self.imm)?
            }
            Opcode::JMP => write!(f, " {}", self.imm)?,
            Opcode::PRINT => write!(f, " r{}", self.rs1)?,
            Opcode::NOP | Opcode::EXIT => {}
        }

        if let Some(loc) = self.loc {
            write!(f, " ; {}", loc)?;
        }

        Ok(())
    }
}

pub(crate) const NOP: Instr = create_no_operand(Opcode::NOP, false);
pub(crate) const EXIT: Instr = create_no_operand(Opcode::EXIT, true);

const fn create_no_operand(opcode: Opcode, is_exit: bool) -> Instr {
    Instr {
        opcode,
        fu_type: FUType::ALU,
        rs1: 0,
        rs2: 0,
        rd: 0,
        imm: 0,
        use_rs1: false,
        use_rs2: false,
        use_rd: false,
        is_load: false,
        is_control: is_exit,
        is_exit,
        loc: None,
    }
}

pub(crate) fn create_instr(
    opcode: Opcode,
    operands: &[Operand],
    loc: SourceLocation,
) -> Result<Instr, String> {
    let mut instr = Instr {
        opcode,
        fu_type: FUType::ALU,
        rs1: 0,
        rs2: 0,
        rd: 0,
        imm: 0,
        use_rs1: false,
        use_rs2: false,
        use_rd: false,
        is_load: false,
        is_control: false,
        is_exit: false,
        loc: Some(loc),
    };

    match opcode {
        Opcode::ADD
        | Opcode::SUB
        | Opcode::MUL
        | Opcode::DIV
        | Opcode::AND
        | Opcode::OR
        | Opcode::XOR => {
            if operands.len() != 3 {
                return Err(format!(
                    "{:?} expects 3 arguments, but {} are provided",
                    opcode,
                    operands.len()
                ));
            }

            if matches!(opcode, Opcode::MUL | Opcode::DIV) {
                instr.fu_type = FUType::MUL;
            }

            match operands[0] {
                Operand::Register(reg) => {
                    instr.rd = reg;
                    instr.use_rd = true;
                }
                _ => return Err(format!("{:?} expects a register as first argument", opcode)),
            }

            match operands[1] {
                Operand::Register(reg) => {
                    instr.rs1 = reg;
                    instr.use_rs1 = true;
                }
                _ => return Err(format!("{:?} expects a register as second argument", opcode)),
            }

            match operands[2] {
                Operand::Register(reg) => {
                    instr.rs2 = reg;
                    instr.use_rs2 = true;
                }
                _ => return Err(format!("{:?} expects a register as third argument", opcode)),
            }
        }
        Opcode::ADDI => {
            if operands.len() != 3 {
                return Err(format!(
                    "{:?} expects 3 arguments, but {} are provided",
                    opcode,
                    operands.len()
                ));
            }

            match operands[0] {
                Operand::Register(reg) => {
                    instr.rd = reg;
                    instr.use_rd = true;
                }
                _ => return Err(format!("{:?} expects a register as first argument", opcode)),
            }

            match operands[1] {
                Operand::Register(reg) => {
                    instr.rs1 = reg;
                    instr.use_rs1 = true;
                }
                _ => return Err(format!("{:?} expects a register as second argument", opcode)),
            }

            match operands[2] {
                Operand::Immediate(imm) => instr.imm = imm,
                _ => {
                    return Err(format!(
                        "{:?} expects an immediate as third argument",
                        opcode
                    ))
                }
            }
        }
        Opcode::LI => {
            if operands.len() != 2 {
                return Err(format!(
                    "{:?} expects 2 arguments, but {} are provided",
                    opcode,
                    operands.len()
                ));
            }

            match operands[0] {
                Operand::Register(reg) => {
                    instr.rd = reg;
                    instr.use_rd = true;
                }
                _ => return Err(format!("{:?} expects a register as first argument", opcode)),
            }

            match operands[1] {
                Operand::Immediate(imm) => instr.imm = imm,
                _ => {
                    return Err(format!(
                        "{:?} expects an immediate as second argument",
                        opcode
                    ))
                }
            }
        }
        Opcode::MOV => {
            if operands.len() != 2 {
                return Err(format!(
                    "{:?} expects 2 arguments, but {} are provided",
                    opcode,
                    operands.len()
                ));
            }

            match operands[0] {
                Operand::Register(reg) => {
                    instr.rd = reg;
                    instr.use_rd = true;
                }
                _ => return Err(format!("{:?} expects a register as first argument", opcode)),
            }

            match operands[1] {
                Operand::Register(reg) => {
                    instr.rs1 = reg;
                    instr.use_rs1 = true;
                }
                _ => return Err(format!("{:?} expects a register as second argument", opcode)),
            }
        }
        Opcode::LW => {
            if operands.len() != 2 {
                return Err(format!(
                    "{:?} expects 2 arguments, but {} are provided",
                    opcode,
                    operands.len()
                ));
            }

            instr.fu_type = FUType::LSU;
            instr.is_load = true;

            match operands[0] {
                Operand::Register(reg) => {
                    instr.rd = reg;
                    instr.use_rd = true;
                }
                _ => return Err(format!("{:?} expects a register as first argument", opcode)),
            }

            match operands[1] {
                Operand::Memory(base, offset) => {
                    instr.rs1 = base;
                    instr.use_rs1 = true;
                    instr.imm = offset;
                }
                _ => {
                    return Err(format!(
                        "{:?} expects a memory address as second argument",
                        opcode
                    ))
                }
            }
        }
        Opcode::SW => {
            if operands.len() != 2 {
                return Err(format!(
                    "{:?} expects 2 arguments, but {} are provided",
                    opcode,
                    operands.len()
                ));
            }

            instr.fu_type = FUType::LSU;

            match operands[0] {
                Operand::Register(reg) => {
                    instr.rs2 = reg;
                    instr.use_rs2 = true;
                }
                _ => return Err(format!("{:?} expects a register as first argument", opcode)),
            }

            match operands[1] {
                Operand::Memory(base, offset) => {
                    instr.rs1 = base;
                    instr.use_rs1 = true;
                    instr.imm = offset;
                }
                _ => {
                    return Err(format!(
                        "{:?} expects a memory address as second argument",
                        opcode
                    ))
                }
            }
        }
        Opcode::BEQ | Opcode::BNE | Opcode::BLT | Opcode::BGE => {
            if operands.len() != 3 {
                return Err(format!(
                    "{:?} expects 3 arguments, but {} are provided",
                    opcode,
                    operands.len()
                ));
            }

            instr.fu_type = FUType::BRANCH;
            instr.is_control = true;

            match operands[0] {
                Operand::Register(reg) => {
                    instr.rs1 = reg;
                    instr.use_rs1 = true;
                }
                _ => return Err(format!("{:?} expects a register as first argument", opcode)),
            }

            match operands[1] {
                Operand::Register(reg) => {
                    instr.rs2 = reg;
                    instr.use_rs2 = true;
                }
                _ => return Err(format!("{:?} expects a register as second argument", opcode)),
            }

            match operands[2] {
                Operand::Code(target) => instr.imm = target as WordType,
                _ => return Err(format!("{:?} expects a label as third argument", opcode)),
            }
        }
        Opcode::JMP => {
            if operands.len() != 1 {
                return Err(format!(
                    "{:?} expects 1 argument, but {} are provided",
                    opcode,
                    operands.len()
                ));
            }

            instr.fu_type = FUType::BRANCH;
            instr.is_control = true;

            match operands[0] {
                Operand::Code(target) => instr.imm = target as WordType,
                _ => return Err(format!("{:?} expects a label as first argument", opcode)),
            }
        }
        Opcode::PRINT => {
            if operands.len() != 1 {
                return Err(format!(
                    "{:?} expects 1 argument, but {} are provided",
                    opcode,
                    operands.len()
                ));
            }

            match operands[0] {
                Operand::Register(reg) => {
                    instr.rs1 = reg;
                    instr.use_rs1 = true;
                }
                _ => return Err(format!("{:?} expects a register as first argument", opcode)),
            }
        }
        Opcode::NOP | Opcode::EXIT => {
            if !operands.is_empty() {
                return Err(format!(
                    "{:?} expects 0 arguments, but {} are provided",
                    opcode,
                    operands.len()
                ));
            }

            if opcode == Opcode::EXIT {
                instr.is_control = true;
                instr.is_exit = true;
            }
        }
    }

    Ok(instr)
}

pub(crate) struct Data {
    pub(crate) value: WordType,
    pub(crate) offset: u64,
}

pub(crate) struct Program {
    pub(crate) data_items: HashMap<String, Rc<Data>>,
    pub(crate) code: Vec<Rc<Instr>>,
    pub(crate) entry_point: usize,
}

impl Program {
    pub(crate) fn get_instr(&self, pos: usize) -> Rc<Instr> {
        Rc::clone(&self.code[pos])
    }
}

pub(crate) struct InstrQueueSlot {
    pub(crate) instr: Rc<Instr>,
    pub(crate) pc: usize,
}

// The InstrQueue sits between frontend and backend.
pub(crate) struct InstrQueue {
    capacity: u16,
    head: u64,
    tail: u64,
    slots: Vec<InstrQueueSlot>,
}

impl InstrQueue {
    pub(crate) fn new(capacity: u16) -> Self {
        let mut slots = Vec::with_capacity(capacity as usize);
        for _ in 0..capacity {
            slots.push(InstrQueueSlot {
                instr: Rc::new(NOP),
                pc: 0,
            });
        }

        InstrQueue {
            capacity,
            head: 0,
            tail: 0,
            slots,
        }
    }

    pub(crate) fn size(&self) -> u16 {
        (self.tail - self.head) as u16
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub(crate) fn is_full(&self) -> bool {
        self.size() == self.capacity
    }

    pub(crate) fn enqueue(&mut self, instr: Rc<Instr>, pc: usize) {
        assert!(!self.is_full(), "Can't enqueue when InstrQueue is full.");

        let index = (self.tail % self.capacity as u64) as usize;
        self.slots[index] = InstrQueueSlot { instr, pc };
        self.tail += 1;
    }

    pub(crate) fn head(&self) -> &InstrQueueSlot {
        assert!(!self.is_empty(), "Can't peek when InstrQueue is empty.");

        let index = (self.head % self.capacity as u64) as usize;
        &self.slots[index]
    }

    pub(crate) fn dequeue(&mut self) {
        assert!(!self.is_empty(), "Can't dequeue when InstrQueue is empty.");
        self.head += 1;
    }
}
