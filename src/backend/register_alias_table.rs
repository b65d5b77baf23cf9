use crate::instructions::instructions::RegisterType;

/// The register alias table. A register that is currently being renamed maps
/// to the reorder buffer slot of its newest in-flight producer; an absent
/// entry means the architectural register file is authoritative. At most one
/// live mapping exists per register: a younger writer simply overwrites the
/// mapping, and commit clears it only if it still points at the committing
/// slot.
pub(crate) struct RAT {
    table: Vec<Option<u16>>,
}

impl RAT {
    pub(crate) fn new(arch_reg_count: u16) -> Self {
        Self {
            table: vec![None; arch_reg_count as usize],
        }
    }

    pub(crate) fn get(&self, arch_reg: RegisterType) -> Option<u16> {
        self.table[arch_reg as usize]
    }

    pub(crate) fn set(&mut self, arch_reg: RegisterType, rob_index: u16) {
        self.table[arch_reg as usize] = Some(rob_index);
    }

    pub(crate) fn clear(&mut self, arch_reg: RegisterType) {
        self.table[arch_reg as usize] = None;
    }
}
