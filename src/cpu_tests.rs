use std::rc::Rc;

use crate::cpu::{CPUConfig, CPU};
use crate::instructions::instructions::{Program, RegisterType, WordType};

#[cfg(test)]
mod tests {
    use crate::loader::loader::load_from_string;

    use super::*;

    #[test]
    fn test_same_src_dst_reg() {
        let src = r#"
.text
    LI r0, #5;
    ADDI r0, r0, #10;
"#;
        let mut harness = TestHarness::default();
        harness.run(src);
        harness.assert_reg_value(0, 15);
    }

    #[test]
    fn test_add() {
        let src = r#"
.text
    LI r0, #100;
    LI r1, #10;
    ADD r2, r0, r1;
"#;
        let mut harness = TestHarness::default();
        harness.run(src);
        harness.assert_reg_value(0, 100);
        harness.assert_reg_value(1, 10);
        harness.assert_reg_value(2, 110);
    }

    #[test]
    fn test_sub_mul_div() {
        let src = r#"
.text
    LI r0, #100;
    LI r1, #10;
    SUB r2, r0, r1;
    MUL r3, r0, r1;
    DIV r4, r0, r1;
"#;
        let mut harness = TestHarness::default();
        harness.run(src);
        harness.assert_reg_value(2, 90);
        harness.assert_reg_value(3, 1000);
        harness.assert_reg_value(4, 10);
    }

    #[test]
    fn test_div_by_zero_yields_zero() {
        let src = r#"
.text
    LI r1, #7;
    DIV r2, r1, r31;
"#;
        let mut harness = TestHarness::default();
        harness.run(src);
        harness.assert_reg_value(2, 0);
    }

    #[test]
    fn test_and_or_xor() {
        let src = r#"
.text
    LI r0, #0xC;
    LI r1, #0xA;
    AND r2, r0, r1;
    OR r3, r0, r1;
    XOR r4, r0, r1;
"#;
        let mut harness = TestHarness::default();
        harness.run(src);
        harness.assert_reg_value(2, 8);
        harness.assert_reg_value(3, 14);
        harness.assert_reg_value(4, 6);
    }

    // A younger reader must pick the producing slot up through the alias
    // table and wake up when the producer broadcasts.
    #[test]
    fn test_raw_dependency_chain_through_alias_table() {
        let src = r#"
.text
    LI r2, #7;
    LI r3, #8;
    LI r5, #9;
    ADD r1, r2, r3;
    ADD r4, r1, r5;
"#;
        let mut harness = TestHarness::default();
        harness.run(src);
        harness.assert_reg_value(1, 15);
        harness.assert_reg_value(4, 24);
    }

    #[test]
    fn test_dependency_chain() {
        let src = r#"
.text
    LI r0, #1;
    MOV r1, r0;
    MOV r2, r1;
    MOV r3, r2;
    MOV r4, r3;
    MOV r5, r4;
    MOV r6, r5;
    MOV r7, r6;
    MOV r8, r7;
"#;
        let mut harness = TestHarness::default();
        harness.run(src);
        harness.assert_reg_value(8, 1);
    }

    #[test]
    fn test_waw() {
        let src = r#"
.text
    LI r0, #1;
    LI r0, #2;
    LI r0, #3;
    LI r0, #4;
    LI r0, #5;
    LI r0, #6;
    LI r0, #7;
    LI r0, #8;
"#;
        let mut harness = TestHarness::default();
        harness.run(src);
        harness.assert_reg_value(0, 8);
    }

    // Two outstanding writers of r7: the commit of the older one must leave
    // the alias table pointing at the younger one, and a reader between the
    // two must still observe the older value.
    #[test]
    fn test_waw_alias_table_overwrite() {
        let src = r#"
.text
    LI r7, #1;
    MOV r8, r7;
    LI r7, #2;
    MOV r9, r7;
"#;
        let mut harness = TestHarness::default();
        harness.run(src);
        harness.assert_reg_value(7, 2);
        harness.assert_reg_value(8, 1);
        harness.assert_reg_value(9, 2);
    }

    // The multiply finishes long after the younger ALU instructions, which
    // must not commit ahead of it.
    #[test]
    fn test_out_of_order_completion_in_order_commit() {
        let src = r#"
.text
    LI r1, #3;
    LI r2, #4;
    MUL r3, r1, r2;
    ADD r4, r1, r2;
    SUB r5, r2, r1;
"#;
        let mut harness = TestHarness::default();
        harness.run(src);
        harness.assert_reg_value(3, 12);
        harness.assert_reg_value(4, 7);
        harness.assert_reg_value(5, 1);
        assert_eq!(harness.committed(), 6);
    }

    // The multiply and one of the single-cycle ALU instructions finish in
    // the same cycle; the loser keeps its result until the bus frees up.
    #[test]
    fn test_bus_contention() {
        let src = r#"
.text
    LI r1, #4;
    LI r2, #5;
    MUL r3, r1, r2;
    ADD r4, r1, r2;
    SUB r5, r2, r1;
    XOR r6, r1, r2;
"#;
        let mut harness = TestHarness::default();
        harness.run(src);
        harness.assert_reg_value(3, 20);
        harness.assert_reg_value(4, 9);
        harness.assert_reg_value(5, 1);
        harness.assert_reg_value(6, 1);
    }

    #[test]
    fn test_loop_bne() {
        let src = r#"
.text
    LI r0, #10;
    LI r1, #0;
loop:
    ADDI r0, r0, #-1;
    ADDI r1, r1, #1;
    BNE r0, r31, loop;
"#;
        let mut harness = TestHarness::default();
        harness.run(src);
        harness.assert_reg_value(0, 0);
        harness.assert_reg_value(1, 10);
    }

    #[test]
    fn test_loop_beq_jmp() {
        let src = r#"
.text
    LI r0, #10;
    LI r1, #0;
loop:
    ADDI r0, r0, #-1;
    ADDI r1, r1, #1;
    BEQ r0, r31, end;
    JMP loop;
end:
"#;
        let mut harness = TestHarness::default();
        harness.run(src);
        harness.assert_reg_value(0, 0);
        harness.assert_reg_value(1, 10);
    }

    #[test]
    fn test_loop_bge() {
        let src = r#"
.text
    LI r0, #10;
    LI r1, #0;
    LI r2, #1;
loop:
    ADDI r0, r0, #-1;
    ADDI r1, r1, #1;
    BGE r0, r2, loop;
"#;
        let mut harness = TestHarness::default();
        harness.run(src);
        harness.assert_reg_value(0, 0);
        harness.assert_reg_value(1, 10);
    }

    #[test]
    fn test_blt_signed_comparison() {
        let src = r#"
.text
    LI r1, #-5;
    LI r2, #3;
    BLT r1, r2, less;
    LI r3, #0;
    JMP end;
less:
    LI r3, #1;
end:
"#;
        let mut harness = TestHarness::default();
        harness.run(src);
        harness.assert_reg_value(3, 1);
    }

    #[test]
    fn test_nested_loop() {
        let src = r#"
.text
    LI r0, #10;
loop_outer:
    LI r1, #10;
loop_inner:
    ADDI r1, r1, #-1;
    ADDI r2, r2, #1;
    BNE r1, r31, loop_inner;
    ADDI r0, r0, #-1;
    BNE r0, r31, loop_outer;
"#;
        let mut harness = TestHarness::default();
        harness.run(src);
        harness.assert_reg_value(2, 100);
    }

    #[test]
    fn test_lw_sw() {
        let src = r#"
.data
    var_a: .word 5
    var_b: .word 10
    var_c: .word 0
.text
    LI r0, =var_a;
    LW r0, [r0];
    LI r1, =var_b;
    LW r1, [r1];
    ADD r2, r0, r1;
    LI r3, =var_c;
    SW r2, [r3];
"#;
        let mut harness = TestHarness::default();
        harness.run(src);
        harness.assert_variable_value("var_c", 15);
    }

    // The load must not dispatch before the older store to the same address
    // has broadcast, even though both become ready at issue time.
    #[test]
    fn test_store_load_ordering() {
        let src = r#"
.data
    var_a: .word 1
.text
    LI r0, =var_a;
    LI r1, #42;
    SW r1, [r0];
    LW r2, [r0];
"#;
        let mut harness = TestHarness::default();
        harness.run(src);
        harness.assert_reg_value(2, 42);
        harness.assert_variable_value("var_a", 42);
    }

    // A dependent use right behind a load wakes up off the load broadcast.
    #[test]
    fn test_load_use_dependency() {
        let src = r#"
.data
    var_a: .word 11
.text
    LI r1, =var_a;
    LW r2, [r1];
    ADDI r3, r2, #1;
"#;
        let mut harness = TestHarness::default();
        harness.run(src);
        harness.assert_reg_value(3, 12);
    }

    #[test]
    fn test_lw_with_offset() {
        let src = r#"
.data
    var_a: .word 7
    var_b: .word 9
.text
    LI r1, =var_a;
    LW r2, [r1, #1];
"#;
        let mut harness = TestHarness::default();
        harness.run(src);
        harness.assert_reg_value(2, 9);
    }

    #[test]
    fn test_sw_loop() {
        let src = r#"
.data
    var_a: .word 0
.text
    LI r0, #100;
    LI r1, =var_a;
    LI r2, #0;
loop:
    ADDI r2, r2, #1;
    ADDI r0, r0, #-1;
    SW r2, [r1];
    BNE r0, r31, loop;
"#;
        let mut harness = TestHarness::default();
        harness.run(src);
        harness.assert_variable_value("var_a", 100);
    }

    // A single reservation station serializes issue without deadlock or a
    // wrong result; the queue head just stalls until the release.
    #[test]
    fn test_single_reservation_station() {
        let src = r#"
.text
    LI r1, #4;
    LI r2, #5;
    MUL r3, r1, r2;
    ADD r4, r1, r2;
    ADD r5, r3, r4;
"#;
        let mut cpu_config = CPUConfig::default();
        cpu_config.rs_count = 1;
        let mut harness = TestHarness::with_config(cpu_config);
        harness.run(src);
        harness.assert_reg_value(5, 29);
        assert_eq!(harness.committed(), 6);
    }

    // More in-flight instructions than the reorder buffer can hold: issue
    // stalls until commit frees the head slots, and the loop still runs to
    // completion.
    #[test]
    fn test_small_reorder_buffer() {
        let src = r#"
.text
    LI r0, #10;
    LI r1, #0;
loop:
    ADDI r0, r0, #-1;
    ADDI r1, r1, #1;
    MUL r2, r1, r1;
    BNE r0, r31, loop;
"#;
        let mut cpu_config = CPUConfig::default();
        cpu_config.rob_capacity = 4;
        cpu_config.rs_count = 2;
        cpu_config.instr_queue_capacity = 2;
        let mut harness = TestHarness::with_config(cpu_config);
        harness.run(src);
        harness.assert_reg_value(1, 10);
        harness.assert_reg_value(2, 100);
    }

    #[test]
    fn test_explicit_exit_stops_fetch() {
        let src = r#"
.text
    LI r0, #1;
    EXIT;
    LI r0, #2;
"#;
        let mut harness = TestHarness::default();
        harness.run(src);
        harness.assert_reg_value(0, 1);
        assert_eq!(harness.committed(), 2);
    }

    #[test]
    fn test_running_off_the_end_terminates() {
        let src = r#"
.text
    LI r0, #1;
    LI r1, #2;
    LI r2, #3;
"#;
        let mut harness = TestHarness::default();
        harness.run(src);
        assert!(harness.cpu.is_finished());
        // the three instructions plus the fabricated EXIT
        assert_eq!(harness.committed(), 4);
    }

    #[test]
    fn test_exit_code_comes_from_r0() {
        let src = r#"
.text
    LI r0, #7;
    EXIT;
"#;
        let mut harness = TestHarness::default();
        harness.run(src);
        assert_eq!(harness.cpu.exit_code(), 7);
    }

    #[test]
    fn test_entry_point() {
        let src = r#"
.global _start
.text
    LI r0, #1;
_start:
    LI r1, #2;
"#;
        let mut harness = TestHarness::default();
        harness.run(src);
        harness.assert_reg_value(0, 0);
        harness.assert_reg_value(1, 2);
    }

    #[test]
    fn test_print_runs_to_completion() {
        let src = r#"
.text
    LI r1, #123;
    PRINT r1;
"#;
        let mut harness = TestHarness::default();
        harness.run(src);
        harness.assert_reg_value(1, 123);
    }

    #[test]
    #[should_panic(expected = "exceeded")]
    fn test_cycle_bound_aborts_runaway_program() {
        let src = r#"
.text
loop:
    JMP loop;
"#;
        let mut cpu_config = CPUConfig::default();
        cpu_config.max_cycles = 200;
        let mut harness = TestHarness::with_config(cpu_config);
        harness.run(src);
    }

    struct TestHarness {
        program: Option<Rc<Program>>,
        cpu: CPU,
        cpu_config: CPUConfig,
    }

    impl TestHarness {
        fn default() -> TestHarness {
            Self::with_config(CPUConfig::default())
        }

        fn with_config(cpu_config: CPUConfig) -> TestHarness {
            TestHarness {
                program: None,
                cpu: CPU::new(&cpu_config),
                cpu_config,
            }
        }

        fn run(&mut self, src: &str) {
            let program = match load_from_string(self.cpu_config.clone(), src) {
                Ok(program) => Rc::new(program),
                Err(err) => panic!("Loading program failed: {}", err),
            };
            self.program = Some(Rc::clone(&program));
            self.cpu.run(&program);
        }

        fn committed(&self) -> u64 {
            self.cpu.committed()
        }

        fn assert_reg_value(&self, reg: RegisterType, value: WordType) {
            assert_eq!(
                self.cpu.reg_value(reg),
                value,
                "register r{} does not have the expected value",
                reg
            );
        }

        fn assert_variable_value(&self, name: &str, value: WordType) {
            let program = self.program.as_ref().expect("Program not initialized");
            let data_item = program.data_items.get(name).expect("Data item not found");
            assert_eq!(
                self.cpu.memory_word(data_item.offset),
                value,
                "variable '{}' does not have the expected value",
                name
            );
        }
    }
}
