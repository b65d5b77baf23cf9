use std::path::PathBuf;
use std::process::exit;
use std::rc::Rc;

use structopt::StructOpt;

use crate::cpu::{load_cpu_config, CPU};
use crate::loader::loader::{load, LoadError};

mod backend;
mod cpu;
#[cfg(test)]
mod cpu_tests;
mod frontend;
mod instructions;
mod loader;
mod memory_subsystem;

#[derive(StructOpt, Debug)]
#[structopt(name = "Out-of-order CPU Emulator")]
struct Opt {
    /// Path of the assembly file to load
    #[structopt(short, long, parse(from_os_str))]
    file: PathBuf,

    /// Sets a custom config file
    #[structopt(short, long, parse(from_os_str), default_value = "cpu.yaml")]
    config: PathBuf,
}

fn main() {
    env_logger::init();

    let opt = Opt::from_args();

    let cpu_config_path = opt.config.to_str().unwrap();
    let cpu_config = match load_cpu_config(cpu_config_path) {
        Ok(config) => config,
        Err(error) => {
            println!("Failed to load {}. Cause: {}", cpu_config_path, error);
            exit(1);
        }
    };

    let path = opt.file.to_str().unwrap();
    println!("Loading {}", path);
    let program = match load(cpu_config.clone(), path) {
        Ok(program) => Rc::new(program),
        Err(err) => {
            println!("Loading program '{}' failed.", path);
            match err {
                LoadError::IOError(msg) | LoadError::ParseError(msg) => println!("{}", msg),
                LoadError::AnalysisError(msg_vec) => {
                    for msg in msg_vec {
                        println!("{}", msg);
                    }
                }
            }
            exit(1);
        }
    };

    let mut cpu = CPU::new(&cpu_config);
    cpu.run(&program);

    println!(
        "Program complete! [Cycles={}][Instructions={}][IPC={:.2}]",
        cpu.cycles(),
        cpu.committed(),
        cpu.committed() as f32 / cpu.cycles() as f32
    );

    exit(cpu.exit_code());
}
