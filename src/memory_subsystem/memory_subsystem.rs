use std::rc::Rc;

use crate::cpu::CPUConfig;
use crate::instructions::instructions::{Program, WordType};

/// A flat, word-addressed memory. Loads and stores are applied synchronously
/// by the memory functional unit at the end of its latency; ordering between
/// memory operations is enforced upstream by the reservation station lock.
pub(crate) struct MemorySubsystem {
    pub(crate) memory: Vec<WordType>,
}

impl MemorySubsystem {
    pub(crate) fn new(cpu_config: &CPUConfig) -> MemorySubsystem {
        MemorySubsystem {
            memory: vec![0; cpu_config.memory_size as usize],
        }
    }

    pub(crate) fn init(&mut self, program: &Rc<Program>) {
        for word in self.memory.iter_mut() {
            *word = 0;
        }

        for data in program.data_items.values() {
            self.memory[data.offset as usize] = data.value;
        }
    }

    pub(crate) fn read(&self, addr: WordType) -> WordType {
        self.memory[Self::to_index(addr, self.memory.len())]
    }

    pub(crate) fn write(&mut self, addr: WordType, value: WordType) {
        let len = self.memory.len();
        self.memory[Self::to_index(addr, len)] = value;
    }

    fn to_index(addr: WordType, len: usize) -> usize {
        assert!(
            addr >= 0 && (addr as usize) < len,
            "MemorySubsystem: address {} out of bounds (memory size {}).",
            addr,
            len
        );
        addr as usize
    }
}
