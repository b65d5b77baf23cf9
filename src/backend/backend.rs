use std::cell::RefCell;
use std::rc::Rc;

use log::debug;

use crate::backend::common_data_bus::CDB;
use crate::backend::functional_unit::FUTable;
use crate::backend::register_alias_table::RAT;
use crate::backend::reorder_buffer::ROB;
use crate::backend::reservation_station::{OperandState, RSState, RSTable, MAX_SOURCE_COUNT};
use crate::cpu::{ArchRegFile, CPUConfig, PerfCounters, Trace, GENERAL_ARCH_REG_CNT};
use crate::frontend::frontend::FrontendControl;
use crate::instructions::instructions::{InstrQueue, RegisterType};
use crate::memory_subsystem::memory_subsystem::MemorySubsystem;

/// The out-of-order backend: issue, execute, writeback and commit over the
/// reorder buffer, the reservation stations, the register alias table and
/// the functional unit bank.
pub(crate) struct Backend {
    instr_queue: Rc<RefCell<InstrQueue>>,
    arch_reg_file: Rc<RefCell<ArchRegFile>>,
    memory_subsystem: Rc<RefCell<MemorySubsystem>>,
    frontend_control: Rc<RefCell<FrontendControl>>,
    rs_table: RSTable,
    rob: ROB,
    rat: RAT,
    // per reorder buffer slot: the reservation station that will produce its
    // value, or None once the value is already available
    rst: Vec<Option<u16>>,
    cdb: CDB,
    fu_table: FUTable,
    trace: Trace,
    pub(crate) exit: bool,
    perf_counters: Rc<RefCell<PerfCounters>>,
}

impl Backend {
    pub(crate) fn new(
        cpu_config: &CPUConfig,
        instr_queue: Rc<RefCell<InstrQueue>>,
        memory_subsystem: Rc<RefCell<MemorySubsystem>>,
        arch_reg_file: Rc<RefCell<ArchRegFile>>,
        frontend_control: Rc<RefCell<FrontendControl>>,
        perf_counters: Rc<RefCell<PerfCounters>>,
    ) -> Backend {
        Backend {
            trace: cpu_config.trace.clone(),
            instr_queue,
            memory_subsystem,
            arch_reg_file,
            frontend_control,
            rs_table: RSTable::new(cpu_config.rs_count),
            rob: ROB::new(cpu_config.rob_capacity),
            rat: RAT::new(GENERAL_ARCH_REG_CNT),
            rst: vec![None; cpu_config.rob_capacity as usize],
            cdb: CDB::new(),
            fu_table: FUTable::new(cpu_config),
            exit: false,
            perf_counters,
        }
    }

    /// One clock cycle. The phases run in reverse data-flow order so that no
    /// phase consumes state another phase produced in the same cycle.
    pub(crate) fn do_cycle(&mut self) {
        self.cycle_commit();
        self.cycle_writeback();
        self.cycle_execute();
        self.cycle_issue();
    }

    // Retires the oldest reorder buffer slot once its result has arrived.
    // Younger completed instructions wait behind a not-yet-ready head.
    fn cycle_commit(&mut self) {
        if self.rob.is_empty() {
            return;
        }

        let head_index = self.rob.head_index();
        if !self.rob.get(head_index).ready {
            return;
        }

        let (instr, result) = {
            let rob_slot = self.rob.get(head_index);
            (
                Rc::clone(rob_slot.instr.as_ref().unwrap()),
                rob_slot.result,
            )
        };

        if instr.use_rd {
            self.arch_reg_file
                .borrow_mut()
                .set_value(instr.rd, result);

            // a younger writer may have overwritten the mapping; only the
            // newest producer clears it
            if self.rat.get(instr.rd) == Some(head_index) {
                self.rat.clear(instr.rd);
            }
        }

        self.rob.pop();
        self.rst[head_index as usize] = None;
        self.perf_counters.borrow_mut().commit_cnt += 1;

        if self.trace.commit {
            debug!("Commit [{}]", instr);
        }

        if instr.is_exit {
            self.exit = true;
        } else if instr.is_control {
            // the branch has resolved; re-steer fetch
            let mut frontend_control = self.frontend_control.borrow_mut();
            frontend_control.pc = result as usize;
            frontend_control.halted = false;
        }
    }

    // Broadcasts the bus contents to every waiting reservation station, then
    // releases the producing station and marks the reorder buffer slot
    // ready. Release happens here, not at dispatch, so that pending operand
    // references stay meaningful until the wakeup has run.
    fn cycle_writeback(&mut self) {
        if self.cdb.is_empty() {
            return;
        }

        let packet = *self.cdb.data();

        for rs_index in 0..self.rs_table.capacity {
            let rs = self.rs_table.get_mut(rs_index);
            if rs.state == RSState::BUSY {
                rs.update_operands(&packet);
            }
        }

        self.rs_table.release(packet.rs_index);
        self.rob.update(&packet);
        self.cdb.pop();
        self.perf_counters.borrow_mut().broadcast_cnt += 1;

        if self.trace.broadcast {
            debug!(
                "Broadcast rob={} rs={} result={}",
                packet.rob_index, packet.rs_index, packet.result
            );
        }
    }

    // Advances every busy functional unit, drains at most one completed unit
    // onto the bus, and dispatches ready reservation stations to idle units.
    fn cycle_execute(&mut self) {
        {
            let mut memory_subsystem = self.memory_subsystem.borrow_mut();
            for fu_index in 0..self.fu_table.count() {
                self.fu_table
                    .get_index_mut(fu_index)
                    .advance(&mut memory_subsystem);
            }
        }

        // The bus carries a single result per cycle. A unit that loses the
        // race stays completed and broadcasts on a later cycle.
        if self.cdb.is_empty() {
            for fu_index in 0..self.fu_table.count() {
                let fu = self.fu_table.get_index_mut(fu_index);
                if fu.is_done() {
                    self.cdb.push(fu.take_output());
                    fu.clear();
                    break;
                }
            }
        }

        for rs_index in 0..self.rs_table.capacity {
            let rs = self.rs_table.get(rs_index);
            if rs.state != RSState::BUSY || rs.running || rs.locked || !rs.operands_ready() {
                continue;
            }

            let instr = Rc::clone(rs.instr.as_ref().unwrap());
            if self.fu_table.get(instr.fu_type).is_busy() {
                continue;
            }

            let rob_index = rs.rob_index;
            let pc = self.rob.get(rob_index).pc;
            let rs1_value = rs.operand_value(0);
            let rs2_value = rs.operand_value(1);

            if self.trace.dispatch {
                debug!("Dispatch [{}]", instr);
            }

            let fu = self.fu_table.get_mut(instr.fu_type);
            fu.issue(instr, rob_index, rs_index, pc, rs1_value, rs2_value);
            self.rs_table.get_mut(rs_index).running = true;
            self.perf_counters.borrow_mut().dispatch_cnt += 1;
        }
    }

    // Takes at most one instruction off the queue, renames its source
    // operands and allocates a reorder buffer slot plus a reservation
    // station. A full buffer or station set stalls the queue head in place.
    fn cycle_issue(&mut self) {
        let mut instr_queue = self.instr_queue.borrow_mut();
        if instr_queue.is_empty() {
            return;
        }

        if !self.rob.has_space() || !self.rs_table.has_free() {
            if self.trace.issue {
                debug!("Issue stalled: structural hazard");
            }
            return;
        }

        let (instr, pc) = {
            let slot = instr_queue.head();
            (Rc::clone(&slot.instr), slot.pc)
        };

        let arch_reg_file = self.arch_reg_file.borrow();
        let mut operands = [OperandState::Unused; MAX_SOURCE_COUNT];
        if instr.use_rs1 {
            operands[0] = self.resolve_operand(instr.rs1, &arch_reg_file);
        }
        if instr.use_rs2 {
            operands[1] = self.resolve_operand(instr.rs2, &arch_reg_file);
        }
        drop(arch_reg_file);

        let rob_index = self.rob.allocate(Rc::clone(&instr), pc);

        // last writer wins: future readers of rd see the newest producer
        if instr.use_rd {
            self.rat.set(instr.rd, rob_index);
        }

        let rs_index = self
            .rs_table
            .allocate(Rc::clone(&instr), rob_index, operands);
        self.rst[rob_index as usize] = Some(rs_index);

        if self.trace.issue {
            debug!("Issue [{}]", instr);
        }
        self.perf_counters.borrow_mut().issue_cnt += 1;

        instr_queue.dequeue();
    }

    // Renaming read of a single source operand: the register file if no
    // producer is in flight, the reorder buffer slot if the producer already
    // finished, and otherwise a pending reference to the station that will
    // broadcast the value.
    fn resolve_operand(
        &self,
        arch_reg: RegisterType,
        arch_reg_file: &ArchRegFile,
    ) -> OperandState {
        match self.rat.get(arch_reg) {
            None => OperandState::Value(arch_reg_file.get_value(arch_reg)),
            Some(rob_index) => {
                let rob_slot = self.rob.get(rob_index);
                if rob_slot.ready {
                    OperandState::Value(rob_slot.result)
                } else {
                    let rs_index = self.rst[rob_index as usize]
                        .expect("Backend: in-flight producer without a reservation station");
                    OperandState::Pending(rs_index)
                }
            }
        }
    }
}
