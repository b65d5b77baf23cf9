use std::rc::Rc;

use crate::backend::common_data_bus::CDBPacket;
use crate::instructions::instructions::{Instr, WordType};

/// A single in-flight instruction. The slot doubles as the renamed result
/// store until the instruction commits: `result` is valid only once `ready`
/// is set by the broadcast of the producing functional unit.
pub(crate) struct ROBSlot {
    pub(crate) instr: Option<Rc<Instr>>,
    pub(crate) pc: usize,
    pub(crate) ready: bool,
    pub(crate) result: WordType,
}

impl ROBSlot {
    fn reset(&mut self) {
        self.instr = None;
        self.pc = 0;
        self.ready = false;
        self.result = 0;
    }
}

/// The reorder buffer: a circular log of all in-flight instructions.
/// Slots are allocated at the tail and freed strictly at the head, so commit
/// order equals issue order no matter in which order results arrive.
pub(crate) struct ROB {
    capacity: u16,
    head: u64,
    tail: u64,
    slots: Vec<ROBSlot>,
}

impl ROB {
    pub(crate) fn new(capacity: u16) -> Self {
        let mut slots = Vec::with_capacity(capacity as usize);
        for _ in 0..capacity {
            slots.push(ROBSlot {
                instr: None,
                pc: 0,
                ready: false,
                result: 0,
            });
        }

        Self {
            capacity,
            head: 0,
            tail: 0,
            slots,
        }
    }

    pub(crate) fn get(&self, slot_index: u16) -> &ROBSlot {
        &self.slots[slot_index as usize]
    }

    pub(crate) fn allocate(&mut self, instr: Rc<Instr>, pc: usize) -> u16 {
        assert!(self.has_space(), "ROB: can't allocate if no space.");

        let index = (self.tail % self.capacity as u64) as u16;
        let slot = &mut self.slots[index as usize];
        slot.instr = Some(instr);
        slot.pc = pc;
        slot.ready = false;
        slot.result = 0;
        self.tail += 1;
        index
    }

    pub(crate) fn update(&mut self, packet: &CDBPacket) {
        let slot = &mut self.slots[packet.rob_index as usize];
        debug_assert!(slot.instr.is_some(), "ROB: update of an unused slot");
        debug_assert!(!slot.ready, "ROB: slot {} updated twice", packet.rob_index);

        slot.ready = true;
        slot.result = packet.result;
    }

    pub(crate) fn head_index(&self) -> u16 {
        assert!(!self.is_empty(), "ROB: no head index when empty.");
        (self.head % self.capacity as u64) as u16
    }

    pub(crate) fn pop(&mut self) {
        assert!(!self.is_empty(), "ROB: can't pop when empty.");

        let index = (self.head % self.capacity as u64) as usize;
        self.slots[index].reset();
        self.head += 1;
    }

    pub(crate) fn size(&self) -> u16 {
        (self.tail - self.head) as u16
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub(crate) fn has_space(&self) -> bool {
        self.capacity > self.size()
    }
}
