use std::collections::HashMap;
use std::fs;
use std::rc::Rc;

use pest::iterators::{Pair, Pairs};
use pest::Parser;
use pest_derive::Parser;
use regex::Regex;
use thiserror::Error;

use crate::cpu::CPUConfig;
use crate::instructions::instructions::{
    create_instr, get_opcode, get_register, Data, Instr, Operand, Program, SourceLocation,
    WordType,
};

#[derive(Parser)]
#[grammar = "loader/assembly.pest"]
struct AssemblyParser;

#[derive(Error, Debug)]
pub(crate) enum LoadError {
    #[error("{0}")]
    IOError(String),

    #[error("{0}")]
    ParseError(String),

    #[error("{}", .0.join("\n"))]
    AnalysisError(Vec<String>),
}

/// Two-pass assembler: the first pass collects labels and data items, the
/// second pass builds the instructions with every reference resolved.
struct Loader {
    cpu_config: CPUConfig,
    heap_size: u64,
    code: Vec<Instr>,
    data_section: HashMap<String, Rc<Data>>,
    labels: HashMap<String, usize>,
    instr_cnt: usize,
    entry_point: usize,
    errors: Vec<String>,
}

impl Loader {
    fn new(cpu_config: CPUConfig) -> Loader {
        Loader {
            cpu_config,
            heap_size: 0,
            code: Vec::new(),
            data_section: HashMap::new(),
            labels: HashMap::new(),
            instr_cnt: 0,
            entry_point: 0,
            errors: Vec::new(),
        }
    }

    fn load(mut self, input: &str) -> Result<Program, LoadError> {
        let mut parsed = AssemblyParser::parse(Rule::file, input)
            .map_err(|err| LoadError::ParseError(format!("{}", err)))?;

        let file_pair = parsed.next().unwrap();
        self.first_pass(file_pair.clone().into_inner());
        self.second_pass(file_pair.into_inner());

        if self.heap_size > self.cpu_config.memory_size as u64 {
            self.errors.push(format!(
                "The data section needs {} words, but the memory has only {}",
                self.heap_size, self.cpu_config.memory_size
            ));
        }

        if !self.errors.is_empty() {
            return Err(LoadError::AnalysisError(self.errors));
        }

        let mut code = Vec::with_capacity(self.code.len());
        for instr in self.code {
            code.push(Rc::new(instr));
        }
        Ok(Program {
            code,
            data_items: self.data_section,
            entry_point: self.entry_point,
        })
    }

    fn first_pass(&mut self, root: Pairs<Rule>) {
        for pair in root {
            match pair.as_rule() {
                Rule::label => self.parse_label(pair),
                Rule::data_line => self.parse_data(pair),
                Rule::instr => self.instr_cnt += 1,
                _ => {}
            }
        }
    }

    fn second_pass(&mut self, root: Pairs<Rule>) {
        for pair in root {
            match pair.as_rule() {
                Rule::directive_line => self.parse_directive(pair),
                Rule::instr => self.parse_instr(pair),
                _ => {}
            }
        }
    }

    fn parse_directive(&mut self, pair: Pair<Rule>) {
        let inner = pair.into_inner().next().unwrap();
        match inner.as_rule() {
            Rule::global_directive => {
                let target = inner.into_inner().next().unwrap();
                if let Some(entry_point) = self.lookup_label(&target) {
                    self.entry_point = entry_point;
                }
            }
            Rule::section_directive => {}
            _ => unreachable!(),
        }
    }

    fn parse_label(&mut self, pair: Pair<Rule>) {
        let (line, column) = Self::line_column(&pair);
        let mut inner_pairs = pair.into_inner();

        let label = String::from(inner_pairs.next().unwrap().as_str());

        if self.labels.contains_key(&label) {
            self.errors.push(format!(
                "Duplicate label '{}' at [{}:{}]",
                label, line, column
            ));
        } else {
            self.labels.insert(label, self.instr_cnt);
        }
    }

    fn parse_data(&mut self, pair: Pair<Rule>) {
        let mut inner_pairs = pair.into_inner();
        let var_pair = inner_pairs.next().unwrap();
        let (line, column) = Self::line_column(&var_pair);
        let value_pair = inner_pairs.next().unwrap();

        let variable_name = String::from(var_pair.as_str());
        if !is_valid_variable_name(&variable_name) {
            self.errors.push(format!(
                "Illegal variable name '{}' at [{}:{}]",
                variable_name, line, column
            ));
            return;
        }

        let value = match self.parse_integer(&value_pair) {
            Ok(value) => value,
            Err(msg) => {
                self.errors.push(msg);
                return;
            }
        };

        if self.data_section.contains_key(&variable_name) {
            self.errors.push(format!(
                "Duplicate variable declaration '{}' at [{}:{}]",
                variable_name, line, column
            ));
            return;
        }

        self.data_section.insert(
            variable_name,
            Rc::new(Data {
                value,
                offset: self.heap_size,
            }),
        );
        self.heap_size += 1;
    }

    fn parse_instr(&mut self, pair: Pair<Rule>) {
        let (line, column) = Self::line_column(&pair);
        let mut inner_pairs = pair.into_inner();

        let mnemonic = inner_pairs.next().unwrap().as_str();
        let opcode = match get_opcode(mnemonic) {
            Some(opcode) => opcode,
            None => {
                self.errors.push(format!(
                    "Unknown mnemonic '{}' at [{}:{}]",
                    mnemonic, line, column
                ));
                return;
            }
        };

        let mut operands = Vec::new();
        for operand_pair in inner_pairs {
            match self.parse_operand(&operand_pair) {
                Some(operand) => operands.push(operand),
                None => return,
            }
        }

        match create_instr(opcode, &operands, SourceLocation { line, column }) {
            Ok(instr) => self.code.push(instr),
            Err(msg) => self.errors.push(format!("{} at [{}:{}]", msg, line, column)),
        }
    }

    fn parse_operand(&mut self, pair: &Pair<Rule>) -> Option<Operand> {
        let (line, column) = Self::line_column(pair);
        match pair.as_rule() {
            Rule::register => self.parse_register(pair).map(Operand::Register),
            Rule::immediate => self.parse_immediate(pair).map(Operand::Immediate),
            Rule::memory_access => {
                let mut inner_pairs = pair.clone().into_inner();
                let base = self.parse_register(&inner_pairs.next().unwrap())?;
                let offset = match inner_pairs.next() {
                    Some(offset_pair) => self.parse_immediate(&offset_pair)?,
                    None => 0,
                };
                Some(Operand::Memory(base, offset))
            }
            Rule::variable_address => {
                let variable_name = &pair.as_str()[1..];
                match self.data_section.get(variable_name) {
                    Some(data) => Some(Operand::Immediate(data.offset as WordType)),
                    None => {
                        self.errors.push(format!(
                            "Unknown variable '{}' at [{}:{}]",
                            variable_name, line, column
                        ));
                        None
                    }
                }
            }
            Rule::label_ref => self.lookup_label(pair).map(Operand::Code),
            _ => {
                self.errors.push(format!(
                    "Unknown operand '{}' at [{}:{}]",
                    pair.as_str(),
                    line,
                    column
                ));
                None
            }
        }
    }

    fn parse_register(&mut self, pair: &Pair<Rule>) -> Option<u16> {
        let (line, column) = Self::line_column(pair);
        let name = pair.as_str();
        match get_register(name) {
            Some(reg) => Some(reg),
            None => {
                self.errors.push(format!(
                    "Illegal register '{}' at [{}:{}]",
                    name, line, column
                ));
                None
            }
        }
    }

    fn parse_immediate(&mut self, pair: &Pair<Rule>) -> Option<WordType> {
        let (line, column) = Self::line_column(pair);
        let text = &pair.as_str()[1..];
        let (negative, digits) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text),
        };

        let parsed = match digits.strip_prefix("0x") {
            Some(hex) => i64::from_str_radix(hex, 16),
            None => digits.parse::<i64>(),
        };

        let value = match parsed {
            Ok(value) if negative => -value,
            Ok(value) => value,
            Err(_) => {
                self.errors.push(format!(
                    "Illegal immediate '{}' at [{}:{}]",
                    pair.as_str(),
                    line,
                    column
                ));
                return None;
            }
        };

        if value < WordType::MIN as i64 || value > WordType::MAX as i64 {
            self.errors.push(format!(
                "Immediate '{}' does not fit in a machine word at [{}:{}]",
                pair.as_str(),
                line,
                column
            ));
            return None;
        }

        Some(value as WordType)
    }

    fn parse_integer(&mut self, pair: &Pair<Rule>) -> Result<WordType, String> {
        let (line, column) = Self::line_column(pair);
        match pair.as_str().trim().parse::<i64>() {
            Ok(value) if value >= WordType::MIN as i64 && value <= WordType::MAX as i64 => {
                Ok(value as WordType)
            }
            _ => Err(format!(
                "Illegal data value '{}' at [{}:{}]",
                pair.as_str(),
                line,
                column
            )),
        }
    }

    fn lookup_label(&mut self, pair: &Pair<Rule>) -> Option<usize> {
        let (line, column) = Self::line_column(pair);
        let label = pair.as_str();

        match self.labels.get(label) {
            Some(code_address) => Some(*code_address),
            None => {
                self.errors.push(format!(
                    "Unknown label '{}' at [{}:{}]",
                    label, line, column
                ));
                None
            }
        }
    }

    fn line_column(pair: &Pair<Rule>) -> (usize, usize) {
        pair.as_span().start_pos().line_col()
    }
}

fn is_valid_variable_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }

    // a variable must not shadow a register name
    let re = Regex::new(r"^(?i)R\d+$").unwrap();
    if re.is_match(name) {
        return false;
    }

    if get_opcode(name).is_some() {
        // it can't be an existing mnemonic
        return false;
    }

    true
}

pub(crate) fn load(cpu_config: CPUConfig, path: &str) -> Result<Program, LoadError> {
    let input = fs::read_to_string(path)
        .map_err(|err| LoadError::IOError(format!("Error reading file '{}': {}", path, err)))?;
    load_from_string(cpu_config, &input)
}

pub(crate) fn load_from_string(cpu_config: CPUConfig, src: &str) -> Result<Program, LoadError> {
    Loader::new(cpu_config).load(src)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instructions::instructions::Opcode;

    fn load_ok(src: &str) -> Program {
        load_from_string(CPUConfig::default(), src).unwrap()
    }

    #[test]
    fn test_load_simple_program() {
        let program = load_ok(
            r#"
.text
    LI r1, #5;
    ADDI r2, r1, #10;
"#,
        );

        assert_eq!(program.code.len(), 2);
        assert_eq!(program.entry_point, 0);
        assert_eq!(program.code[0].opcode, Opcode::LI);
        assert_eq!(program.code[1].opcode, Opcode::ADDI);
        assert_eq!(program.code[1].imm, 10);
    }

    #[test]
    fn test_label_resolves_to_instruction_index() {
        let program = load_ok(
            r#"
.text
    LI r1, #0;
loop:
    ADDI r1, r1, #1;
    BLT r1, r2, loop;
"#,
        );

        assert_eq!(program.code.len(), 3);
        assert_eq!(program.code[2].imm, 1);
    }

    #[test]
    fn test_global_directive_sets_entry_point() {
        let program = load_ok(
            r#"
.global _start
.text
    NOP;
_start:
    LI r1, #1;
"#,
        );

        assert_eq!(program.entry_point, 1);
    }

    #[test]
    fn test_data_section_offsets() {
        let program = load_ok(
            r#"
.data
    var_a: .word 5
    var_b: .word -3
.text
    LI r1, =var_b;
    LW r2, [r1];
"#,
        );

        assert_eq!(program.data_items.get("var_a").unwrap().offset, 0);
        assert_eq!(program.data_items.get("var_b").unwrap().value, -3);
        // =var_b resolves to the data offset
        assert_eq!(program.code[0].imm, 1);
    }

    #[test]
    fn test_memory_access_with_offset() {
        let program = load_ok(
            r#"
.text
    LW r2, [r1, #3];
"#,
        );

        assert_eq!(program.code[0].rs1, 1);
        assert_eq!(program.code[0].imm, 3);
    }

    #[test]
    fn test_hex_immediate() {
        let program = load_ok(
            r#"
.text
    LI r1, #0x2A;
"#,
        );

        assert_eq!(program.code[0].imm, 42);
    }

    #[test]
    fn test_unknown_label_is_an_analysis_error() {
        let result = load_from_string(
            CPUConfig::default(),
            r#"
.text
    JMP nowhere;
"#,
        );

        match result {
            Err(LoadError::AnalysisError(errors)) => {
                assert!(errors[0].contains("Unknown label"));
            }
            _ => panic!("expected an analysis error"),
        }
    }

    #[test]
    fn test_duplicate_label_is_an_analysis_error() {
        let result = load_from_string(
            CPUConfig::default(),
            r#"
.text
here:
    NOP;
here:
    NOP;
"#,
        );

        match result {
            Err(LoadError::AnalysisError(errors)) => {
                assert!(errors[0].contains("Duplicate label"));
            }
            _ => panic!("expected an analysis error"),
        }
    }

    #[test]
    fn test_register_out_of_range() {
        let result = load_from_string(
            CPUConfig::default(),
            r#"
.text
    LI r32, #1;
"#,
        );

        match result {
            Err(LoadError::AnalysisError(errors)) => {
                assert!(errors[0].contains("Illegal register"));
            }
            _ => panic!("expected an analysis error"),
        }
    }

    #[test]
    fn test_missing_semicolon_is_a_parse_error() {
        let result = load_from_string(
            CPUConfig::default(),
            r#"
.text
    LI r1, #1
"#,
        );

        assert!(matches!(result, Err(LoadError::ParseError(_))));
    }
}
