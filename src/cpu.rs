use std::cell::RefCell;
use std::error::Error;
use std::fs::File;
use std::rc::Rc;

use log::debug;
use serde::Deserialize;

use crate::backend::backend::Backend;
use crate::frontend::frontend::{Frontend, FrontendControl};
use crate::instructions::instructions::{InstrQueue, Program, RegisterType, WordType};
use crate::memory_subsystem::memory_subsystem::MemorySubsystem;

pub(crate) const GENERAL_ARCH_REG_CNT: u16 = 32;
// exit code convention: the value of r0 when the program terminates
pub(crate) const EXIT_CODE_REG: RegisterType = 0;

pub(crate) struct PerfCounters {
    pub(crate) decode_cnt: u64,
    pub(crate) issue_cnt: u64,
    pub(crate) dispatch_cnt: u64,
    pub(crate) broadcast_cnt: u64,
    pub(crate) commit_cnt: u64,
    pub(crate) cycle_cnt: u64,
}

impl PerfCounters {
    pub(crate) fn new() -> Self {
        Self {
            decode_cnt: 0,
            issue_cnt: 0,
            dispatch_cnt: 0,
            broadcast_cnt: 0,
            commit_cnt: 0,
            cycle_cnt: 0,
        }
    }
}

#[derive(Clone, Deserialize, Debug, Default)]
#[serde(default)]
pub(crate) struct Trace {
    pub(crate) decode: bool,
    pub(crate) issue: bool,
    pub(crate) dispatch: bool,
    pub(crate) broadcast: bool,
    pub(crate) commit: bool,
    pub(crate) cycle: bool,
}

#[derive(Clone, Deserialize, Debug)]
pub(crate) struct CPUConfig {
    // the capacity of the reorder buffer
    pub(crate) rob_capacity: u16,
    // the number of reservation stations
    pub(crate) rs_count: u16,
    // the size of the instruction queue between frontend and backend
    pub(crate) instr_queue_capacity: u16,
    // the size of the memory in machine words
    pub(crate) memory_size: u32,
    // the latency of each functional unit category, in cycles
    pub(crate) alu_latency: u8,
    pub(crate) mul_latency: u8,
    pub(crate) lsu_latency: u8,
    pub(crate) branch_latency: u8,
    // the simulation aborts when this many cycles pass without termination
    pub(crate) max_cycles: u64,
    // if processing of a single instruction should be traced
    #[serde(default)]
    pub(crate) trace: Trace,
}

impl Default for CPUConfig {
    fn default() -> Self {
        Self {
            rob_capacity: 32,
            rs_count: 8,
            instr_queue_capacity: 8,
            memory_size: 128,
            alu_latency: 1,
            mul_latency: 3,
            lsu_latency: 2,
            branch_latency: 1,
            max_cycles: 100_000,
            trace: Trace::default(),
        }
    }
}

pub(crate) fn load_cpu_config(file_path: &str) -> Result<CPUConfig, Box<dyn Error>> {
    let file = File::open(file_path)?;
    let config = serde_yaml::from_reader(file)?;
    Ok(config)
}

pub(crate) struct ArchRegFile {
    entries: Vec<WordType>,
}

impl ArchRegFile {
    fn new(reg_count: u16) -> ArchRegFile {
        ArchRegFile {
            entries: vec![0; reg_count as usize],
        }
    }

    pub(crate) fn get_value(&self, reg: RegisterType) -> WordType {
        self.entries[reg as usize]
    }

    pub(crate) fn set_value(&mut self, reg: RegisterType, value: WordType) {
        self.entries[reg as usize] = value;
    }
}

pub(crate) struct CPU {
    backend: Backend,
    frontend: Frontend,
    memory_subsystem: Rc<RefCell<MemorySubsystem>>,
    arch_reg_file: Rc<RefCell<ArchRegFile>>,
    max_cycles: u64,
    trace: Trace,
    perf_counters: Rc<RefCell<PerfCounters>>,
}

impl CPU {
    pub(crate) fn new(cpu_config: &CPUConfig) -> CPU {
        let instr_queue = Rc::new(RefCell::new(InstrQueue::new(
            cpu_config.instr_queue_capacity,
        )));

        let perf_counters = Rc::new(RefCell::new(PerfCounters::new()));

        let memory_subsystem = Rc::new(RefCell::new(MemorySubsystem::new(cpu_config)));

        let arch_reg_file = Rc::new(RefCell::new(ArchRegFile::new(GENERAL_ARCH_REG_CNT)));

        let frontend_control = Rc::new(RefCell::new(FrontendControl {
            halted: false,
            pc: 0,
        }));

        let backend = Backend::new(
            cpu_config,
            Rc::clone(&instr_queue),
            Rc::clone(&memory_subsystem),
            Rc::clone(&arch_reg_file),
            Rc::clone(&frontend_control),
            Rc::clone(&perf_counters),
        );

        let frontend = Frontend::new(
            cpu_config,
            Rc::clone(&instr_queue),
            Rc::clone(&frontend_control),
            Rc::clone(&perf_counters),
        );

        CPU {
            backend,
            frontend,
            memory_subsystem,
            arch_reg_file,
            max_cycles: cpu_config.max_cycles,
            trace: cpu_config.trace.clone(),
            perf_counters: Rc::clone(&perf_counters),
        }
    }

    /// Drives the simulation until the terminating instruction commits. The
    /// caller bounds the run through `max_cycles`.
    pub(crate) fn run(&mut self, program: &Rc<Program>) {
        self.frontend.init(program);
        self.memory_subsystem.borrow_mut().init(program);

        while !self.backend.exit {
            {
                let mut perf_counters = self.perf_counters.borrow_mut();
                perf_counters.cycle_cnt += 1;
                assert!(
                    perf_counters.cycle_cnt <= self.max_cycles,
                    "CPU: simulation exceeded the bound of {} cycles.",
                    self.max_cycles
                );

                if self.trace.cycle {
                    debug!(
                        "[Cycles:{}][Decoded={}][Issued={}][Dispatched={}][Broadcast={}][Committed={}][IPC={:.2}]",
                        perf_counters.cycle_cnt,
                        perf_counters.decode_cnt,
                        perf_counters.issue_cnt,
                        perf_counters.dispatch_cnt,
                        perf_counters.broadcast_cnt,
                        perf_counters.commit_cnt,
                        perf_counters.commit_cnt as f32 / perf_counters.cycle_cnt as f32
                    );
                }
            }

            self.backend.do_cycle();
            self.frontend.do_cycle();
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.backend.exit
    }

    pub(crate) fn committed(&self) -> u64 {
        self.perf_counters.borrow().commit_cnt
    }

    pub(crate) fn cycles(&self) -> u64 {
        self.perf_counters.borrow().cycle_cnt
    }

    pub(crate) fn reg_value(&self, reg: RegisterType) -> WordType {
        self.arch_reg_file.borrow().get_value(reg)
    }

    pub(crate) fn memory_word(&self, offset: u64) -> WordType {
        self.memory_subsystem.borrow().memory[offset as usize]
    }

    pub(crate) fn exit_code(&self) -> i32 {
        self.reg_value(EXIT_CODE_REG) & 0xff
    }
}
