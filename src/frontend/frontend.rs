use std::cell::RefCell;
use std::rc::Rc;

use log::debug;

use crate::cpu::{CPUConfig, PerfCounters, Trace};
use crate::instructions::instructions::{InstrQueue, Program, EXIT};

/// Fetch state shared between the frontend and the backend. Fetch halts on
/// every control instruction; commit installs the resolved program counter
/// and lifts the halt.
pub(crate) struct FrontendControl {
    pub(crate) halted: bool,
    pub(crate) pc: usize,
}

/// The in-order frontend: fetches at most one decoded instruction per cycle
/// into the instruction queue.
pub(crate) struct Frontend {
    instr_queue: Rc<RefCell<InstrQueue>>,
    frontend_control: Rc<RefCell<FrontendControl>>,
    program_option: Option<Rc<Program>>,
    trace: Trace,
    perf_counters: Rc<RefCell<PerfCounters>>,
}

impl Frontend {
    pub(crate) fn new(
        cpu_config: &CPUConfig,
        instr_queue: Rc<RefCell<InstrQueue>>,
        frontend_control: Rc<RefCell<FrontendControl>>,
        perf_counters: Rc<RefCell<PerfCounters>>,
    ) -> Frontend {
        Frontend {
            instr_queue,
            frontend_control,
            program_option: None,
            trace: cpu_config.trace.clone(),
            perf_counters,
        }
    }

    pub(crate) fn init(&mut self, program: &Rc<Program>) {
        self.program_option = Some(Rc::clone(program));
        let mut frontend_control = self.frontend_control.borrow_mut();
        frontend_control.pc = program.entry_point;
        frontend_control.halted = false;
    }

    pub(crate) fn do_cycle(&mut self) {
        let program = match &self.program_option {
            None => return,
            Some(program) => program,
        };

        let mut frontend_control = self.frontend_control.borrow_mut();
        if frontend_control.halted {
            return;
        }

        let mut instr_queue = self.instr_queue.borrow_mut();
        if instr_queue.is_full() {
            return;
        }

        let pc = frontend_control.pc;
        let instr = if pc >= program.code.len() {
            // running off the end of the program terminates it
            Rc::new(EXIT)
        } else {
            program.get_instr(pc)
        };

        if self.trace.decode {
            debug!("Fetch pc={} [{}]", pc, instr);
        }

        let is_control = instr.is_control;
        instr_queue.enqueue(instr, pc);
        frontend_control.pc = pc + 1;
        self.perf_counters.borrow_mut().decode_cnt += 1;

        // no speculation: wait for the backend to resolve the target
        if is_control {
            frontend_control.halted = true;
        }
    }
}
