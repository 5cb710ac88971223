//! Interrupt, HALT and reset behaviour.

mod common;

use common::System;
use cpu_z80::{pins, PF};

#[test]
fn im1_accept_after_nop() {
    let mut sys = System::new(&[]);
    sys.mem.load(0x0100, &[0x00, 0x00]); // NOP; NOP
    sys.cpu.prefetch(0x0100);
    sys.bus = sys.cpu.pins();
    sys.cpu.regs.sp = 0x8000;
    sys.cpu.regs.iff1 = true;
    sys.cpu.regs.iff2 = true;
    sys.cpu.regs.im = 1;

    // one tick runs the prefetch pseudo-overlap, driving the NOP's fetch
    sys.tick();
    assert!(sys.cpu.opdone());

    sys.int_level = true;
    let ticks = sys.step_instr();
    assert_eq!(ticks, 4 + 13, "NOP plus mode 1 acknowledge");

    assert_eq!(sys.bus.addr(), 0x0038, "handler fetch address");
    assert!(sys.bus.test(pins::M1 | pins::MREQ | pins::RD));
    assert_eq!(sys.cpu.regs.sp, 0x7FFE);
    assert_eq!(sys.mem.peek(0x7FFE), 0x01, "pushed PC low");
    assert_eq!(sys.mem.peek(0x7FFF), 0x01, "pushed PC high");
    assert!(!sys.cpu.regs.iff1);
    assert!(!sys.cpu.regs.iff2);
    assert_eq!(sys.cpu.regs.wz, 0x0038);
}

#[test]
fn im2_accept_reads_vector_table() {
    let mut sys = System::new(&[0x00, 0x00]); // NOP; NOP
    sys.cpu.regs.sp = 0x8000;
    sys.cpu.regs.iff1 = true;
    sys.cpu.regs.iff2 = true;
    sys.cpu.regs.im = 2;
    sys.cpu.regs.i = 0x20;
    sys.int_vector = 0xFE;
    sys.mem.load(0x20FE, &[0x34, 0x12]); // handler at 0x1234

    assert_eq!(sys.step_instr(), 4, "plain NOP first");
    sys.int_level = true;
    let ticks = sys.step_instr();
    assert_eq!(ticks, 4 + 19, "NOP plus mode 2 acknowledge");

    assert_eq!(sys.bus.addr(), 0x1234, "handler fetch address");
    assert_eq!(sys.cpu.regs.sp, 0x7FFE);
    assert_eq!(sys.mem.peek(0x7FFE), 0x02, "pushed PC low");
    assert_eq!(sys.mem.peek(0x7FFF), 0x00, "pushed PC high");
    assert_eq!(sys.cpu.regs.wz, 0x1234);
}

#[test]
fn im2_vector_low_bit_is_masked() {
    let mut sys = System::new(&[0x00]);
    sys.cpu.regs.sp = 0x8000;
    sys.cpu.regs.iff1 = true;
    sys.cpu.regs.im = 2;
    sys.cpu.regs.i = 0x20;
    sys.int_vector = 0xFF; // odd vector: table entry is read from 0x20FE
    sys.mem.load(0x20FE, &[0x78, 0x56]);

    sys.int_level = true;
    sys.step_instr();
    assert_eq!(sys.bus.addr(), 0x5678);
}

#[test]
fn im0_executes_supplied_byte() {
    let mut sys = System::new(&[0x00, 0x00]);
    sys.cpu.regs.sp = 0x8000;
    sys.cpu.regs.iff1 = true;
    sys.cpu.regs.im = 0;
    sys.int_vector = 0xCF; // RST 08h

    assert_eq!(sys.step_instr(), 4);
    sys.int_level = true;
    let ticks = sys.step_instr();
    assert_eq!(ticks, 4 + 13, "RST via mode 0 matches mode 1 timing");
    assert_eq!(sys.bus.addr(), 0x0008, "RST 08h target");
    assert_eq!(sys.mem.peek(0x7FFE), 0x02, "pushed resume address");
}

#[test]
fn nmi_accept_preserves_iff2() {
    let mut sys = System::new(&[0x00, 0x00, 0x00]);
    sys.cpu.regs.sp = 0x8000;
    sys.cpu.regs.iff1 = true;
    sys.cpu.regs.iff2 = true;

    assert_eq!(sys.step_instr(), 4);
    sys.nmi_level = true;
    let ticks = sys.step_instr();
    assert_eq!(ticks, 4 + 11, "NOP plus NMI accept");

    assert_eq!(sys.bus.addr(), 0x0066, "NMI handler fetch");
    assert!(!sys.cpu.regs.iff1, "IFF1 cleared");
    assert!(sys.cpu.regs.iff2, "IFF2 keeps the pre-NMI enable");
    assert_eq!(sys.cpu.regs.sp, 0x7FFE);
    assert_eq!(sys.mem.peek(0x7FFE), 0x02);
    assert_eq!(sys.cpu.regs.wz, 0x0066);

    // level stays high: no second accept without a new edge
    let ticks = sys.step_instr();
    assert_eq!(ticks, 4, "handler runs normally");
}

#[test]
fn ei_defers_interrupt_by_one_instruction() {
    // EI; NOP; NOP with INT held the whole time: the accept happens at the
    // end of the NOP after EI, not at the end of EI itself.
    let mut sys = System::new(&[0xFB, 0x00, 0x00]);
    sys.cpu.regs.sp = 0x8000;
    sys.cpu.regs.im = 1;
    sys.int_level = true;

    assert_eq!(sys.step_instr(), 4, "EI completes without an accept");
    assert!(sys.cpu.regs.iff1);
    assert!(sys.cpu.ei_delay);

    let ticks = sys.step_instr();
    assert_eq!(ticks, 4 + 13, "the following instruction samples the line");
    assert_eq!(sys.bus.addr(), 0x0038);
    assert_eq!(sys.mem.peek(0x7FFE), 0x02, "PC after the deferred NOP");
}

#[test]
fn back_to_back_ei_keeps_deferring() {
    let mut sys = System::new(&[0xFB, 0xFB, 0x00]);
    sys.cpu.regs.sp = 0x8000;
    sys.cpu.regs.im = 1;
    sys.int_level = true;

    assert_eq!(sys.step_instr(), 4, "first EI");
    assert_eq!(sys.step_instr(), 4, "second EI still shadows the sample");
    let ticks = sys.step_instr();
    assert_eq!(ticks, 4 + 13);
    assert_eq!(sys.mem.peek(0x7FFE), 0x03, "PC after the NOP at 0x0002");
}

#[test]
fn halt_asserts_pin_and_wakes_on_interrupt() {
    let mut sys = System::new(&[0xFB, 0x76]); // EI; HALT
    sys.cpu.regs.sp = 0x8000;
    sys.cpu.regs.im = 1;

    sys.step_instr(); // EI
    sys.step_instr(); // HALT
    assert!(sys.cpu.regs.halted);
    assert!(sys.bus.test(pins::HALT));

    // the halt loop keeps fetching 4T NOP-shaped cycles
    let r_before = sys.cpu.regs.r;
    assert_eq!(sys.step_instr(), 4);
    assert!(sys.cpu.regs.r != r_before, "refresh keeps running while halted");
    assert!(sys.bus.test(pins::HALT));

    sys.int_level = true;
    let ticks = sys.step_instr();
    assert_eq!(ticks, 4 + 13, "one more halt pass, then the accept");
    assert!(!sys.cpu.regs.halted);
    assert!(!sys.bus.test(pins::HALT), "HALT releases on accept");
    assert_eq!(sys.bus.addr(), 0x0038);
    assert_eq!(sys.mem.peek(0x7FFE), 0x02, "resume address is past the halt opcode");
    assert_eq!(sys.mem.peek(0x7FFF), 0x00);
}

#[test]
fn reti_pulses_the_virtual_pin() {
    let mut sys = System::new(&[0xED, 0x4D]); // RETI
    sys.cpu.regs.sp = 0x8000;
    sys.mem.load(0x8000, &[0x10, 0x00]); // return to 0x0010
    sys.mem.write(0x0010, 0x76); // HALT

    let mut reti_ticks = 0;
    for _ in 0..20 {
        sys.tick();
        if sys.bus.test(pins::RETI) {
            reti_ticks += 1;
        }
        if sys.cpu.regs.halted {
            break;
        }
    }
    assert_eq!(reti_ticks, 1, "RETI is a one T-state pulse");
    assert_eq!(sys.cpu.regs.pc, 0x0011, "returned and fetched the HALT");
}

#[test]
fn retn_restores_iff1_from_iff2() {
    let mut sys = System::new(&[0xED, 0x45]); // RETN
    sys.cpu.regs.sp = 0x8000;
    sys.cpu.regs.iff1 = false;
    sys.cpu.regs.iff2 = true;
    sys.mem.load(0x8000, &[0x10, 0x00]);

    sys.step_instr();
    assert!(sys.cpu.regs.iff1, "IFF2 copied back");
    assert_eq!(sys.bus.addr(), 0x0010);
}

#[test]
fn int_ignored_while_iff1_clear() {
    let mut sys = System::new(&[0x00, 0x00, 0x00, 0x76]);
    sys.cpu.regs.im = 1;
    sys.int_level = true;

    assert_eq!(sys.step_instr(), 4);
    assert_eq!(sys.step_instr(), 4);
    assert_eq!(sys.step_instr(), 4);
    assert_eq!(sys.cpu.regs.pc, 0x0004, "straight-line execution");
}

#[test]
fn res_sampled_at_instruction_end() {
    let mut sys = System::new(&[0x00, 0x00, 0x00]);
    sys.cpu.regs.i = 0x44;
    sys.cpu.regs.im = 2;
    sys.cpu.regs.iff1 = true;
    sys.cpu.regs.iff2 = true;
    sys.cpu.regs.set_bc(0xBEEF);

    sys.step_instr();
    sys.res_level = true;
    sys.step_instr();
    sys.res_level = false;

    assert_eq!(sys.bus.addr(), 0x0000, "fetching from the reset vector");
    assert!(sys.bus.test(pins::M1 | pins::MREQ | pins::RD));
    assert_eq!(sys.cpu.regs.i, 0);
    assert_eq!(sys.cpu.regs.r, 0);
    assert_eq!(sys.cpu.regs.im, 0);
    assert!(!sys.cpu.regs.iff1);
    assert!(!sys.cpu.regs.iff2);
    assert_eq!(sys.cpu.regs.bc(), 0xBEEF, "working registers survive reset");
}

#[test]
fn interrupt_after_ld_a_i_clears_parity() {
    let mut sys = System::new(&[0xED, 0x57]); // LD A,I
    sys.cpu.regs.sp = 0x8000;
    sys.cpu.regs.iff1 = true;
    sys.cpu.regs.iff2 = true;
    sys.cpu.regs.im = 1;
    sys.int_level = true;

    let ticks = sys.step_instr();
    assert_eq!(ticks, 9 + 13, "LD A,I then the accept at its boundary");
    assert!(sys.cpu.regs.f & PF == 0, "the copied IFF2 is wiped by the accept");
}
