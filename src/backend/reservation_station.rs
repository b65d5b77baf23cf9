use std::collections::VecDeque;
use std::fmt;
use std::fmt::Display;
use std::rc::Rc;

use crate::backend::common_data_bus::CDBPacket;
use crate::instructions::instructions::{mnemonic, Instr, WordType};

pub(crate) const MAX_SOURCE_COUNT: usize = 2;

/// A source operand of a buffered micro-operation: either already resolved
/// to a value, or pending on the reservation station that will broadcast it.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum OperandState {
    Unused,
    Value(WordType),
    Pending(u16),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum RSState {
    IDLE,
    BUSY,
}

/// A single reservation station. Valid from issue until its result has been
/// consumed off the bus; release happens one phase after broadcast so that a
/// sibling holding a pending reference to this slot is woken first.
pub(crate) struct RS {
    pub(crate) state: RSState,
    pub(crate) running: bool,
    // set while an older memory operation is still in flight
    pub(crate) locked: bool,
    pub(crate) instr: Option<Rc<Instr>>,
    pub(crate) rob_index: u16,
    pub(crate) operands: [OperandState; MAX_SOURCE_COUNT],
}

impl RS {
    fn new() -> Self {
        Self {
            state: RSState::IDLE,
            running: false,
            locked: false,
            instr: None,
            rob_index: 0,
            operands: [OperandState::Unused, OperandState::Unused],
        }
    }

    fn reset(&mut self) {
        self.state = RSState::IDLE;
        self.running = false;
        self.locked = false;
        self.instr = None;
        self.rob_index = 0;
        self.operands = [OperandState::Unused, OperandState::Unused];
    }

    pub(crate) fn operands_ready(&self) -> bool {
        !self
            .operands
            .iter()
            .any(|operand| matches!(operand, OperandState::Pending(_)))
    }

    /// Resolves every operand that waits on the broadcasting station.
    pub(crate) fn update_operands(&mut self, packet: &CDBPacket) {
        for operand in self.operands.iter_mut() {
            if *operand == OperandState::Pending(packet.rs_index) {
                *operand = OperandState::Value(packet.result);
            }
        }
    }

    pub(crate) fn operand_value(&self, index: usize) -> WordType {
        match self.operands[index] {
            OperandState::Value(value) => value,
            OperandState::Unused => 0,
            OperandState::Pending(rs_index) => {
                panic!("RS: operand {} still pending on rs {}", index, rs_index)
            }
        }
    }
}

impl Display for RS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RS")?;
        if let Some(instr) = &self.instr {
            write!(f, " {}", mnemonic(instr.opcode))?;
        }
        for operand in &self.operands {
            match operand {
                OperandState::Unused => {}
                OperandState::Value(value) => write!(f, " {}", value)?,
                OperandState::Pending(rs_index) => write!(f, " rs{}?", rs_index)?,
            }
        }
        Ok(())
    }
}

/// The reservation station set. Free slots live on a stack; memory
/// operations additionally pass through a program-order queue that keeps all
/// but the oldest one locked.
pub(crate) struct RSTable {
    pub(crate) capacity: u16,
    array: Vec<RS>,
    free_stack: Vec<u16>,
    mem_order: VecDeque<u16>,
}

impl RSTable {
    pub(crate) fn new(capacity: u16) -> Self {
        let mut array = Vec::with_capacity(capacity as usize);
        let mut free_stack = Vec::with_capacity(capacity as usize);
        for i in 0..capacity {
            array.push(RS::new());
            free_stack.push(capacity - 1 - i);
        }

        RSTable {
            capacity,
            array,
            free_stack,
            mem_order: VecDeque::new(),
        }
    }

    pub(crate) fn get(&self, rs_index: u16) -> &RS {
        &self.array[rs_index as usize]
    }

    pub(crate) fn get_mut(&mut self, rs_index: u16) -> &mut RS {
        &mut self.array[rs_index as usize]
    }

    pub(crate) fn has_free(&self) -> bool {
        !self.free_stack.is_empty()
    }

    pub(crate) fn allocate(
        &mut self,
        instr: Rc<Instr>,
        rob_index: u16,
        operands: [OperandState; MAX_SOURCE_COUNT],
    ) -> u16 {
        let rs_index = match self.free_stack.pop() {
            Some(rs_index) => rs_index,
            None => panic!("RSTable: no free reservation station."),
        };

        let is_mem = instr.is_mem();
        let rs = &mut self.array[rs_index as usize];
        debug_assert!(rs.state == RSState::IDLE);

        rs.state = RSState::BUSY;
        rs.running = false;
        rs.instr = Some(instr);
        rs.rob_index = rob_index;
        rs.operands = operands;
        rs.locked = false;

        if is_mem {
            // all but the oldest in-flight memory operation stay locked
            rs.locked = !self.mem_order.is_empty();
            self.mem_order.push_back(rs_index);
        }

        rs_index
    }

    pub(crate) fn release(&mut self, rs_index: u16) {
        let is_mem = {
            let rs = &self.array[rs_index as usize];
            debug_assert!(rs.state == RSState::BUSY);
            rs.instr.as_ref().map_or(false, |instr| instr.is_mem())
        };

        if is_mem {
            let head = self.mem_order.pop_front();
            debug_assert_eq!(head, Some(rs_index), "RSTable: memory release out of order");
            if let Some(&next) = self.mem_order.front() {
                self.array[next as usize].locked = false;
            }
        }

        self.array[rs_index as usize].reset();
        self.free_stack.push(rs_index);
    }
}
