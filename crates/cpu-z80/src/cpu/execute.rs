//! The per-T-state step sequencer.
//!
//! `exec_step` runs at most once per tick, on the T-states the pipeline
//! word enables. Steps 0 and 1 are shared by every instruction (IR latch,
//! decode + refresh); everything after that dispatches through the block
//! selected at decode time, with step indices counting the instruction's
//! active T-states in order. The pipeline words in `decode.rs` enable
//! exactly one T-state per arm, so the two files mirror each other.

#![allow(clippy::too_many_lines)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

use crate::alu;
use crate::decode::{
    uses_hl_mem, CB, DDCB_BIT_PIP, DDCB_PIP, DDCB_RMW_PIP, DISP_IMM_PIP, DISP_PIP, ED, IM2_PIP,
    MAIN,
};
use crate::flags::{sz53, sz53p, CF, HF, NF, PF, SF, XF, YF, ZF};
use crate::pins::{self, Pins};

use super::{Block, Index, Prefix, Z80};

impl Z80 {
    /// Execute one enabled step and advance the step counter.
    pub(super) fn exec_step(&mut self, pins: Pins) -> Pins {
        let step = self.op.step;
        self.op.step = self.op.step.wrapping_add(1);
        match step {
            0 => self.step_latch(pins),
            1 => self.step_decode(pins),
            _ => match self.block {
                Block::Main => self.step_main(step, pins),
                Block::Cb => self.step_cb(step, pins),
                Block::Ed => self.step_ed(step, pins),
                Block::DdCb => self.step_ddcb(step, pins),
                Block::Disp => self.step_disp(step, pins),
                Block::DispImm => self.step_disp_imm(step, pins),
                Block::IntAck => self.step_int_ack(step, pins),
                Block::Nmi => self.step_nmi(step, pins),
            },
        }
    }

    /// Shared step 0 (M1/T3): latch the fetched opcode from the data bus.
    fn step_latch(&mut self, pins: Pins) -> Pins {
        self.ir = pins.data();
        pins
    }

    /// Shared step 1 (M1/T4): pick the decode table from the pending
    /// prefix, load the opcode's pipeline, drive the refresh cycle.
    fn step_decode(&mut self, pins: Pins) -> Pins {
        let prefix = self.prefix;
        self.prefix = Prefix::None;

        if prefix == Prefix::None {
            // A new instruction starts here; prefixed continuations keep
            // the per-instruction state of their first M1.
            self.prev_q = self.last_q;
            self.last_q = 0;
            self.last_was_ld_a_ir = false;
            self.ei_delay = false;
            self.index = Index::Hl;
        }

        match prefix {
            Prefix::None | Prefix::Dd | Prefix::Fd => {
                match prefix {
                    Prefix::Dd => self.index = Index::Ix,
                    Prefix::Fd => self.index = Index::Iy,
                    _ => {}
                }
                if prefix != Prefix::None && self.ir == 0xCB {
                    self.block = Block::DdCb;
                    self.op.pip = DDCB_PIP;
                } else if self.index != Index::Hl && uses_hl_mem(self.ir) {
                    self.block = if self.ir == 0x36 { Block::DispImm } else { Block::Disp };
                    self.op.pip = if self.ir == 0x36 { DISP_IMM_PIP } else { DISP_PIP };
                } else {
                    self.block = Block::Main;
                    self.op.pip = MAIN[self.ir as usize];
                }
            }
            Prefix::Cb => {
                self.block = Block::Cb;
                self.index = Index::Hl;
                self.op.pip = CB[self.ir as usize];
            }
            Prefix::Ed => {
                self.block = Block::Ed;
                self.index = Index::Hl;
                self.op.pip = ED[self.ir as usize];
            }
        }
        self.refresh(pins)
    }

    /// Main-table step dispatch. Step 2 is the first active T-state after
    /// the decode; the comments give each group's machine-cycle breakdown.
    fn step_main(&mut self, step: u16, pins: Pins) -> Pins {
        let ir = self.ir;
        let y = (ir >> 3) & 7;
        let z = ir & 7;
        let p = (ir >> 4) & 3;
        match (ir, step) {
            // nop (M:1 T:4)
            (0x00, 2) => self.fetch(pins),

            // ld rr,nn (M:3 T:10)
            (0x01 | 0x11 | 0x21 | 0x31, 2) => {
                let addr = self.pc_inc();
                self.mread(pins, addr)
            }
            (0x01 | 0x11 | 0x21 | 0x31, 3) => {
                let v = (self.rp16(p) & 0xFF00) | u16::from(pins.data());
                self.set_rp16(p, v);
                pins
            }
            (0x01 | 0x11 | 0x21 | 0x31, 4) => {
                let addr = self.pc_inc();
                self.mread(pins, addr)
            }
            (0x01 | 0x11 | 0x21 | 0x31, 5) => {
                let v = (self.rp16(p) & 0x00FF) | u16::from(pins.data()) << 8;
                self.set_rp16(p, v);
                pins
            }
            (0x01 | 0x11 | 0x21 | 0x31, 6) => self.fetch(pins),

            // ld (bc),a / ld (de),a (M:2 T:7)
            (0x02 | 0x12, 2) => {
                let addr = if ir == 0x02 { self.regs.bc() } else { self.regs.de() };
                self.regs.wz =
                    u16::from(self.regs.a) << 8 | (addr.wrapping_add(1) & 0x00FF);
                self.mwrite(pins, addr, self.regs.a)
            }
            (0x02 | 0x12, 3) => self.fetch(pins),

            // ld a,(bc) / ld a,(de) (M:2 T:7)
            (0x0A | 0x1A, 2) => {
                let addr = if ir == 0x0A { self.regs.bc() } else { self.regs.de() };
                self.regs.wz = addr.wrapping_add(1);
                self.mread(pins, addr)
            }
            (0x0A | 0x1A, 3) => {
                self.regs.a = pins.data();
                pins
            }
            (0x0A | 0x1A, 4) => self.fetch(pins),

            // inc rr (M:2 T:6)
            (0x03 | 0x13 | 0x23 | 0x33, 2) => {
                self.set_rp16(p, self.rp16(p).wrapping_add(1));
                self.fetch(pins)
            }

            // dec rr (M:2 T:6)
            (0x0B | 0x1B | 0x2B | 0x3B, 2) => {
                self.set_rp16(p, self.rp16(p).wrapping_sub(1));
                self.fetch(pins)
            }

            // inc r (M:1 T:4)
            (0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x3C, 2) => {
                let r = alu::inc8(self.reg8(y));
                self.set_reg8(y, r.value);
                self.set_f((self.regs.f & CF) | r.flags);
                self.fetch(pins)
            }

            // dec r (M:1 T:4)
            (0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x3D, 2) => {
                let r = alu::dec8(self.reg8(y));
                self.set_reg8(y, r.value);
                self.set_f((self.regs.f & CF) | r.flags);
                self.fetch(pins)
            }

            // ld r,n (M:2 T:7)
            (0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x3E, 2) => {
                let addr = self.pc_inc();
                self.mread(pins, addr)
            }
            (0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x3E, 3) => {
                self.set_reg8(y, pins.data());
                pins
            }
            (0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x3E, 4) => self.fetch(pins),

            // rlca (M:1 T:4)
            (0x07, 2) => {
                let carry = self.regs.a >> 7;
                self.regs.a = self.regs.a.rotate_left(1);
                self.set_f(
                    (self.regs.f & (SF | ZF | PF))
                        | (self.regs.a & (YF | XF))
                        | if carry != 0 { CF } else { 0 },
                );
                self.fetch(pins)
            }

            // rrca (M:1 T:4)
            (0x0F, 2) => {
                let carry = self.regs.a & 1;
                self.regs.a = self.regs.a.rotate_right(1);
                self.set_f(
                    (self.regs.f & (SF | ZF | PF))
                        | (self.regs.a & (YF | XF))
                        | if carry != 0 { CF } else { 0 },
                );
                self.fetch(pins)
            }

            // rla (M:1 T:4)
            (0x17, 2) => {
                let carry = self.regs.a >> 7;
                self.regs.a = (self.regs.a << 1) | (self.regs.f & CF);
                self.set_f(
                    (self.regs.f & (SF | ZF | PF))
                        | (self.regs.a & (YF | XF))
                        | if carry != 0 { CF } else { 0 },
                );
                self.fetch(pins)
            }

            // rra (M:1 T:4)
            (0x1F, 2) => {
                let carry = self.regs.a & 1;
                self.regs.a = (self.regs.a >> 1) | ((self.regs.f & CF) << 7);
                self.set_f(
                    (self.regs.f & (SF | ZF | PF))
                        | (self.regs.a & (YF | XF))
                        | if carry != 0 { CF } else { 0 },
                );
                self.fetch(pins)
            }

            // ex af,af' (M:1 T:4)
            (0x08, 2) => {
                core::mem::swap(&mut self.regs.a, &mut self.regs.a_alt);
                core::mem::swap(&mut self.regs.f, &mut self.regs.f_alt);
                self.fetch(pins)
            }

            // add hl,rr (M:2 T:11)
            (0x09 | 0x19 | 0x29 | 0x39, 2) => {
                let hl = self.hl_view();
                self.regs.wz = hl.wrapping_add(1);
                let (v, flags) = alu::add16(hl, self.rp16(p));
                self.set_hl_view(v);
                self.set_f((self.regs.f & (SF | ZF | PF)) | flags);
                self.fetch(pins)
            }

            // djnz d (M:3/4 T:8/13)
            (0x10, 2) => {
                let addr = self.pc_inc();
                self.mread(pins, addr)
            }
            (0x10, 3) => {
                self.disp = pins.data() as i8;
                self.regs.b = self.regs.b.wrapping_sub(1);
                if self.regs.b == 0 {
                    self.skip_to(2, 4);
                } else {
                    self.regs.wz = self.regs.pc.wrapping_add(self.disp as u16);
                    self.regs.pc = self.regs.wz;
                }
                pins
            }
            (0x10, 4) => self.fetch(pins),

            // jr d (M:3 T:12)
            (0x18, 2) => {
                let addr = self.pc_inc();
                self.mread(pins, addr)
            }
            (0x18, 3) => {
                self.disp = pins.data() as i8;
                self.regs.wz = self.regs.pc.wrapping_add(self.disp as u16);
                self.regs.pc = self.regs.wz;
                pins
            }
            (0x18, 4) => self.fetch(pins),

            // jr cc,d (M:2/3 T:7/12)
            (0x20 | 0x28 | 0x30 | 0x38, 2) => {
                let addr = self.pc_inc();
                self.mread(pins, addr)
            }
            (0x20 | 0x28 | 0x30 | 0x38, 3) => {
                self.disp = pins.data() as i8;
                if self.cond(y - 4) {
                    self.regs.wz = self.regs.pc.wrapping_add(self.disp as u16);
                    self.regs.pc = self.regs.wz;
                } else {
                    self.skip_to(2, 4);
                }
                pins
            }
            (0x20 | 0x28 | 0x30 | 0x38, 4) => self.fetch(pins),

            // ld (nn),hl (M:5 T:16)
            (0x22, 2) => {
                let addr = self.pc_inc();
                self.mread(pins, addr)
            }
            (0x22, 3) => {
                self.regs.wz = (self.regs.wz & 0xFF00) | u16::from(pins.data());
                pins
            }
            (0x22, 4) => {
                let addr = self.pc_inc();
                self.mread(pins, addr)
            }
            (0x22, 5) => {
                self.regs.wz = (self.regs.wz & 0x00FF) | u16::from(pins.data()) << 8;
                pins
            }
            (0x22, 6) => {
                let addr = self.regs.wz;
                self.regs.wz = addr.wrapping_add(1);
                let lo = self.hl_view() as u8;
                self.mwrite(pins, addr, lo)
            }
            (0x22, 7) => {
                let hi = (self.hl_view() >> 8) as u8;
                self.mwrite(pins, self.regs.wz, hi)
            }
            (0x22, 8) => self.fetch(pins),

            // ld hl,(nn) (M:5 T:16)
            (0x2A, 2) => {
                let addr = self.pc_inc();
                self.mread(pins, addr)
            }
            (0x2A, 3) => {
                self.regs.wz = (self.regs.wz & 0xFF00) | u16::from(pins.data());
                pins
            }
            (0x2A, 4) => {
                let addr = self.pc_inc();
                self.mread(pins, addr)
            }
            (0x2A, 5) => {
                self.regs.wz = (self.regs.wz & 0x00FF) | u16::from(pins.data()) << 8;
                pins
            }
            (0x2A, 6) => {
                let addr = self.regs.wz;
                self.regs.wz = addr.wrapping_add(1);
                self.mread(pins, addr)
            }
            (0x2A, 7) => {
                let v = (self.hl_view() & 0xFF00) | u16::from(pins.data());
                self.set_hl_view(v);
                pins
            }
            (0x2A, 8) => self.mread(pins, self.regs.wz),
            (0x2A, 9) => {
                let v = (self.hl_view() & 0x00FF) | u16::from(pins.data()) << 8;
                self.set_hl_view(v);
                pins
            }
            (0x2A, 10) => self.fetch(pins),

            // ld (nn),a (M:4 T:13)
            (0x32, 2) => {
                let addr = self.pc_inc();
                self.mread(pins, addr)
            }
            (0x32, 3) => {
                self.regs.wz = (self.regs.wz & 0xFF00) | u16::from(pins.data());
                pins
            }
            (0x32, 4) => {
                let addr = self.pc_inc();
                self.mread(pins, addr)
            }
            (0x32, 5) => {
                self.regs.wz = (self.regs.wz & 0x00FF) | u16::from(pins.data()) << 8;
                pins
            }
            (0x32, 6) => {
                let addr = self.regs.wz;
                self.regs.wz = u16::from(self.regs.a) << 8
                    | (addr.wrapping_add(1) & 0x00FF);
                self.mwrite(pins, addr, self.regs.a)
            }
            (0x32, 7) => self.fetch(pins),

            // ld a,(nn) (M:4 T:13)
            (0x3A, 2) => {
                let addr = self.pc_inc();
                self.mread(pins, addr)
            }
            (0x3A, 3) => {
                self.regs.wz = (self.regs.wz & 0xFF00) | u16::from(pins.data());
                pins
            }
            (0x3A, 4) => {
                let addr = self.pc_inc();
                self.mread(pins, addr)
            }
            (0x3A, 5) => {
                self.regs.wz = (self.regs.wz & 0x00FF) | u16::from(pins.data()) << 8;
                pins
            }
            (0x3A, 6) => {
                let addr = self.regs.wz;
                self.regs.wz = addr.wrapping_add(1);
                self.mread(pins, addr)
            }
            (0x3A, 7) => {
                self.regs.a = pins.data();
                pins
            }
            (0x3A, 8) => self.fetch(pins),

            // inc (hl) / dec (hl) (M:3 T:11)
            (0x34 | 0x35, 2) => self.mread(pins, self.ea()),
            (0x34 | 0x35, 3) => {
                self.dlatch = pins.data();
                pins
            }
            (0x34 | 0x35, 4) => {
                let r = if ir == 0x34 { alu::inc8(self.dlatch) } else { alu::dec8(self.dlatch) };
                self.set_f((self.regs.f & CF) | r.flags);
                self.mwrite(pins, self.ea(), r.value)
            }
            (0x34 | 0x35, 5) => self.fetch(pins),

            // ld (hl),n (M:3 T:10)
            (0x36, 2) => {
                let addr = self.pc_inc();
                self.mread(pins, addr)
            }
            (0x36, 3) => {
                self.dlatch = pins.data();
                pins
            }
            (0x36, 4) => self.mwrite(pins, self.regs.hl(), self.dlatch),
            (0x36, 5) => self.fetch(pins),

            // daa (M:1 T:4)
            (0x27, 2) => {
                let r = alu::daa8(self.regs.a, self.regs.f);
                self.regs.a = r.value;
                self.set_f(r.flags);
                self.fetch(pins)
            }

            // cpl (M:1 T:4)
            (0x2F, 2) => {
                self.regs.a = !self.regs.a;
                self.set_f(
                    (self.regs.f & (SF | ZF | PF | CF))
                        | HF
                        | NF
                        | (self.regs.a & (YF | XF)),
                );
                self.fetch(pins)
            }

            // scf (M:1 T:4)
            (0x37, 2) => {
                let xy = self.scf_xy();
                self.set_f((self.regs.f & (SF | ZF | PF)) | CF | xy);
                self.fetch(pins)
            }

            // ccf (M:1 T:4)
            (0x3F, 2) => {
                let old_cf = self.regs.f & CF;
                let xy = self.scf_xy();
                self.set_f(
                    (self.regs.f & (SF | ZF | PF))
                        | xy
                        | if old_cf != 0 { HF } else { CF },
                );
                self.fetch(pins)
            }

            // halt (M:1 T:4)
            (0x76, 2) => {
                self.regs.halted = true;
                self.regs.pc = self.regs.pc.wrapping_sub(1);
                self.fetch(pins.set(pins::HALT))
            }

            // ld r,r' / ld r,(hl) / ld (hl),r (M:1/2 T:4/7)
            (0x40..=0x7F, 2) => {
                if z == 6 {
                    self.mread(pins, self.ea())
                } else if y == 6 {
                    let v = self.reg8_plain(z);
                    self.mwrite(pins, self.ea(), v)
                } else {
                    let v = self.reg8(z);
                    self.set_reg8(y, v);
                    self.fetch(pins)
                }
            }
            (0x40..=0x7F, 3) => {
                if z == 6 {
                    self.set_reg8_plain(y, pins.data());
                    pins
                } else {
                    // ld (hl),r overlap
                    self.fetch(pins)
                }
            }
            (0x40..=0x7F, 4) => self.fetch(pins),

            // alu a,r / alu a,(hl) (M:1/2 T:4/7)
            (0x80..=0xBF, 2) => {
                if z == 6 {
                    self.mread(pins, self.ea())
                } else {
                    let v = self.reg8(z);
                    self.alu_a(y, v);
                    self.fetch(pins)
                }
            }
            (0x80..=0xBF, 3) => {
                self.dlatch = pins.data();
                pins
            }
            (0x80..=0xBF, 4) => {
                let v = self.dlatch;
                self.alu_a(y, v);
                self.fetch(pins)
            }

            // ret cc (M:2/4 T:5/11)
            (0xC0 | 0xC8 | 0xD0 | 0xD8 | 0xE0 | 0xE8 | 0xF0 | 0xF8, 2) => {
                if !self.cond(y) {
                    self.skip_to(1, 7);
                }
                pins
            }
            (0xC0 | 0xC8 | 0xD0 | 0xD8 | 0xE0 | 0xE8 | 0xF0 | 0xF8, 3) => {
                self.mread(pins, self.regs.sp)
            }
            (0xC0 | 0xC8 | 0xD0 | 0xD8 | 0xE0 | 0xE8 | 0xF0 | 0xF8, 4) => {
                self.regs.wz = (self.regs.wz & 0xFF00) | u16::from(pins.data());
                self.regs.sp = self.regs.sp.wrapping_add(1);
                pins
            }
            (0xC0 | 0xC8 | 0xD0 | 0xD8 | 0xE0 | 0xE8 | 0xF0 | 0xF8, 5) => {
                self.mread(pins, self.regs.sp)
            }
            (0xC0 | 0xC8 | 0xD0 | 0xD8 | 0xE0 | 0xE8 | 0xF0 | 0xF8, 6) => {
                self.regs.wz = (self.regs.wz & 0x00FF) | u16::from(pins.data()) << 8;
                self.regs.sp = self.regs.sp.wrapping_add(1);
                self.regs.pc = self.regs.wz;
                pins
            }
            (0xC0 | 0xC8 | 0xD0 | 0xD8 | 0xE0 | 0xE8 | 0xF0 | 0xF8, 7) => self.fetch(pins),

            // pop rr (M:3 T:10)
            (0xC1 | 0xD1 | 0xE1 | 0xF1, 2) => self.mread(pins, self.regs.sp),
            (0xC1 | 0xD1 | 0xE1 | 0xF1, 3) => {
                self.dlatch = pins.data();
                self.regs.sp = self.regs.sp.wrapping_add(1);
                pins
            }
            (0xC1 | 0xD1 | 0xE1 | 0xF1, 4) => self.mread(pins, self.regs.sp),
            (0xC1 | 0xD1 | 0xE1 | 0xF1, 5) => {
                self.regs.sp = self.regs.sp.wrapping_add(1);
                let v = u16::from(pins.data()) << 8 | u16::from(self.dlatch);
                self.set_rp16_af(p, v);
                pins
            }
            (0xC1 | 0xD1 | 0xE1 | 0xF1, 6) => self.fetch(pins),

            // ret (M:3 T:10)
            (0xC9, 2) => self.mread(pins, self.regs.sp),
            (0xC9, 3) => {
                self.regs.wz = (self.regs.wz & 0xFF00) | u16::from(pins.data());
                self.regs.sp = self.regs.sp.wrapping_add(1);
                pins
            }
            (0xC9, 4) => self.mread(pins, self.regs.sp),
            (0xC9, 5) => {
                self.regs.wz = (self.regs.wz & 0x00FF) | u16::from(pins.data()) << 8;
                self.regs.sp = self.regs.sp.wrapping_add(1);
                self.regs.pc = self.regs.wz;
                pins
            }
            (0xC9, 6) => self.fetch(pins),

            // jp nn / jp cc,nn (M:3 T:10)
            (0xC3 | 0xC2 | 0xCA | 0xD2 | 0xDA | 0xE2 | 0xEA | 0xF2 | 0xFA, 2) => {
                let addr = self.pc_inc();
                self.mread(pins, addr)
            }
            (0xC3 | 0xC2 | 0xCA | 0xD2 | 0xDA | 0xE2 | 0xEA | 0xF2 | 0xFA, 3) => {
                self.regs.wz = (self.regs.wz & 0xFF00) | u16::from(pins.data());
                pins
            }
            (0xC3 | 0xC2 | 0xCA | 0xD2 | 0xDA | 0xE2 | 0xEA | 0xF2 | 0xFA, 4) => {
                let addr = self.pc_inc();
                self.mread(pins, addr)
            }
            (0xC3 | 0xC2 | 0xCA | 0xD2 | 0xDA | 0xE2 | 0xEA | 0xF2 | 0xFA, 5) => {
                self.regs.wz = (self.regs.wz & 0x00FF) | u16::from(pins.data()) << 8;
                if ir == 0xC3 || self.cond(y) {
                    self.regs.pc = self.regs.wz;
                }
                pins
            }
            (0xC3 | 0xC2 | 0xCA | 0xD2 | 0xDA | 0xE2 | 0xEA | 0xF2 | 0xFA, 6) => self.fetch(pins),

            // call nn / call cc,nn (M:3/5 T:10/17)
            (0xCD | 0xC4 | 0xCC | 0xD4 | 0xDC | 0xE4 | 0xEC | 0xF4 | 0xFC, 2) => {
                let addr = self.pc_inc();
                self.mread(pins, addr)
            }
            (0xCD | 0xC4 | 0xCC | 0xD4 | 0xDC | 0xE4 | 0xEC | 0xF4 | 0xFC, 3) => {
                self.regs.wz = (self.regs.wz & 0xFF00) | u16::from(pins.data());
                pins
            }
            (0xCD | 0xC4 | 0xCC | 0xD4 | 0xDC | 0xE4 | 0xEC | 0xF4 | 0xFC, 4) => {
                let addr = self.pc_inc();
                self.mread(pins, addr)
            }
            (0xCD | 0xC4 | 0xCC | 0xD4 | 0xDC | 0xE4 | 0xEC | 0xF4 | 0xFC, 5) => {
                self.regs.wz = (self.regs.wz & 0x00FF) | u16::from(pins.data()) << 8;
                if !(ir == 0xCD || self.cond(y)) {
                    self.skip_to(2, 8);
                }
                pins
            }
            (0xCD | 0xC4 | 0xCC | 0xD4 | 0xDC | 0xE4 | 0xEC | 0xF4 | 0xFC, 6) => {
                self.regs.sp = self.regs.sp.wrapping_sub(1);
                let hi = (self.regs.pc >> 8) as u8;
                self.mwrite(pins, self.regs.sp, hi)
            }
            (0xCD | 0xC4 | 0xCC | 0xD4 | 0xDC | 0xE4 | 0xEC | 0xF4 | 0xFC, 7) => {
                self.regs.sp = self.regs.sp.wrapping_sub(1);
                let lo = self.regs.pc as u8;
                self.regs.pc = self.regs.wz;
                self.mwrite(pins, self.regs.sp, lo)
            }
            (0xCD | 0xC4 | 0xCC | 0xD4 | 0xDC | 0xE4 | 0xEC | 0xF4 | 0xFC, 8) => self.fetch(pins),

            // push rr (M:3 T:11)
            (0xC5 | 0xD5 | 0xE5 | 0xF5, 2) => {
                self.regs.sp = self.regs.sp.wrapping_sub(1);
                let hi = (self.rp16_af(p) >> 8) as u8;
                self.mwrite(pins, self.regs.sp, hi)
            }
            (0xC5 | 0xD5 | 0xE5 | 0xF5, 3) => {
                self.regs.sp = self.regs.sp.wrapping_sub(1);
                let lo = self.rp16_af(p) as u8;
                self.mwrite(pins, self.regs.sp, lo)
            }
            (0xC5 | 0xD5 | 0xE5 | 0xF5, 4) => self.fetch(pins),

            // rst n (M:3 T:11)
            (0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF, 2) => {
                self.regs.sp = self.regs.sp.wrapping_sub(1);
                let hi = (self.regs.pc >> 8) as u8;
                self.mwrite(pins, self.regs.sp, hi)
            }
            (0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF, 3) => {
                self.regs.sp = self.regs.sp.wrapping_sub(1);
                let lo = self.regs.pc as u8;
                self.regs.wz = u16::from(ir & 0x38);
                self.regs.pc = self.regs.wz;
                self.mwrite(pins, self.regs.sp, lo)
            }
            (0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF, 4) => self.fetch(pins),

            // alu a,n (M:2 T:7)
            (0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE, 2) => {
                let addr = self.pc_inc();
                self.mread(pins, addr)
            }
            (0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE, 3) => {
                self.dlatch = pins.data();
                pins
            }
            (0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE, 4) => {
                let v = self.dlatch;
                self.alu_a(y, v);
                self.fetch(pins)
            }

            // cb/dd/ed/fd prefix (M:1 T:4)
            (0xCB, 2) => {
                self.prefix = Prefix::Cb;
                self.fetch(pins)
            }
            (0xDD, 2) => {
                self.prefix = Prefix::Dd;
                self.fetch(pins)
            }
            (0xED, 2) => {
                self.prefix = Prefix::Ed;
                self.fetch(pins)
            }
            (0xFD, 2) => {
                self.prefix = Prefix::Fd;
                self.fetch(pins)
            }

            // out (n),a (M:3 T:11)
            (0xD3, 2) => {
                let addr = self.pc_inc();
                self.mread(pins, addr)
            }
            (0xD3, 3) => {
                self.dlatch = pins.data();
                pins
            }
            (0xD3, 4) => {
                let port = u16::from(self.regs.a) << 8 | u16::from(self.dlatch);
                self.regs.wz = u16::from(self.regs.a) << 8
                    | u16::from(self.dlatch.wrapping_add(1));
                self.iowrite(pins, port, self.regs.a)
            }
            (0xD3, 5) => self.fetch(pins),

            // in a,(n) (M:3 T:11)
            (0xDB, 2) => {
                let addr = self.pc_inc();
                self.mread(pins, addr)
            }
            (0xDB, 3) => {
                self.dlatch = pins.data();
                pins
            }
            (0xDB, 4) => {
                let port = u16::from(self.regs.a) << 8 | u16::from(self.dlatch);
                self.regs.wz = port.wrapping_add(1);
                self.ioread(pins, port)
            }
            (0xDB, 5) => {
                self.regs.a = pins.data();
                pins
            }
            (0xDB, 6) => self.fetch(pins),

            // exx (M:1 T:4)
            (0xD9, 2) => {
                core::mem::swap(&mut self.regs.b, &mut self.regs.b_alt);
                core::mem::swap(&mut self.regs.c, &mut self.regs.c_alt);
                core::mem::swap(&mut self.regs.d, &mut self.regs.d_alt);
                core::mem::swap(&mut self.regs.e, &mut self.regs.e_alt);
                core::mem::swap(&mut self.regs.h, &mut self.regs.h_alt);
                core::mem::swap(&mut self.regs.l, &mut self.regs.l_alt);
                self.fetch(pins)
            }

            // ex (sp),hl (M:5 T:19)
            (0xE3, 2) => self.mread(pins, self.regs.sp),
            (0xE3, 3) => {
                self.regs.wz = (self.regs.wz & 0xFF00) | u16::from(pins.data());
                pins
            }
            (0xE3, 4) => self.mread(pins, self.regs.sp.wrapping_add(1)),
            (0xE3, 5) => {
                self.regs.wz = (self.regs.wz & 0x00FF) | u16::from(pins.data()) << 8;
                pins
            }
            (0xE3, 6) => {
                let hi = (self.hl_view() >> 8) as u8;
                self.mwrite(pins, self.regs.sp.wrapping_add(1), hi)
            }
            (0xE3, 7) => {
                let lo = self.hl_view() as u8;
                self.mwrite(pins, self.regs.sp, lo)
            }
            (0xE3, 8) => {
                self.set_hl_view(self.regs.wz);
                self.fetch(pins)
            }

            // jp (hl) (M:1 T:4)
            (0xE9, 2) => {
                self.regs.pc = self.hl_view();
                self.fetch(pins)
            }

            // ex de,hl (M:1 T:4) - never index-remapped
            (0xEB, 2) => {
                core::mem::swap(&mut self.regs.d, &mut self.regs.h);
                core::mem::swap(&mut self.regs.e, &mut self.regs.l);
                self.fetch(pins)
            }

            // di (M:1 T:4)
            (0xF3, 2) => {
                self.regs.iff1 = false;
                self.regs.iff2 = false;
                self.fetch(pins)
            }

            // ei (M:1 T:4) - takes effect one instruction later
            (0xFB, 2) => {
                self.regs.iff1 = true;
                self.regs.iff2 = true;
                self.ei_delay = true;
                self.fetch(pins)
            }

            // ld sp,hl (M:2 T:6)
            (0xF9, 2) => {
                self.regs.sp = self.hl_view();
                self.fetch(pins)
            }

            _ => {
                debug_assert!(false, "no main step {step} for opcode {ir:#04X}");
                self.fetch(pins)
            }
        }
    }

    /// ALU operation on the accumulator, selected by the opcode's y field.
    fn alu_a(&mut self, y: u8, value: u8) {
        let r = match y & 7 {
            0 => alu::add8(self.regs.a, value, false),
            1 => alu::add8(self.regs.a, value, self.regs.f & CF != 0),
            2 => alu::sub8(self.regs.a, value, false),
            3 => alu::sub8(self.regs.a, value, self.regs.f & CF != 0),
            4 => alu::and8(self.regs.a, value),
            5 => alu::xor8(self.regs.a, value),
            6 => alu::or8(self.regs.a, value),
            _ => alu::cp8(self.regs.a, value),
        };
        self.regs.a = r.value;
        self.set_f(r.flags);
    }

    /// Rotate/shift/res/set by sub-opcode. BIT never reaches here.
    fn cb_op(&mut self, op: u8, value: u8) -> u8 {
        let y = (op >> 3) & 7;
        match op >> 6 {
            0 => {
                let r = match y {
                    0 => alu::rlc8(value),
                    1 => alu::rrc8(value),
                    2 => alu::rl8(value, self.regs.f & CF != 0),
                    3 => alu::rr8(value, self.regs.f & CF != 0),
                    4 => alu::sla8(value),
                    5 => alu::sra8(value),
                    6 => alu::sll8(value),
                    _ => alu::srl8(value),
                };
                self.set_f(r.flags);
                r.value
            }
            2 => value & !(1 << y),
            3 => value | (1 << y),
            _ => {
                debug_assert!(false, "BIT has no result to write back");
                value
            }
        }
    }

    /// CB-prefixed step dispatch.
    fn step_cb(&mut self, step: u16, pins: Pins) -> Pins {
        let ir = self.ir;
        let x = ir >> 6;
        let y = (ir >> 3) & 7;
        let z = ir & 7;
        match step {
            // register forms finish in the overlap; (hl) forms start the
            // operand read
            2 => {
                if z == 6 {
                    self.mread(pins, self.regs.hl())
                } else if x == 1 {
                    let v = self.reg8_plain(z);
                    self.bit_flags(v, y, v);
                    self.fetch(pins)
                } else {
                    let r = self.cb_op(ir, self.reg8_plain(z));
                    self.set_reg8_plain(z, r);
                    self.fetch(pins)
                }
            }
            3 => {
                self.dlatch = pins.data();
                pins
            }
            // bit n,(hl): X/Y come from WZ's high byte, not the operand
            4 if x == 1 => {
                let v = self.dlatch;
                let wzh = (self.regs.wz >> 8) as u8;
                self.bit_flags(v, y, wzh);
                self.fetch(pins)
            }
            4 => {
                let r = self.cb_op(ir, self.dlatch);
                self.mwrite(pins, self.regs.hl(), r)
            }
            5 => self.fetch(pins),
            _ => {
                debug_assert!(false, "no CB step {step} for opcode {ir:#04X}");
                self.fetch(pins)
            }
        }
    }

    /// ED-prefixed step dispatch.
    fn step_ed(&mut self, step: u16, pins: Pins) -> Pins {
        let ir = self.ir;
        let y = (ir >> 3) & 7;
        let p = (ir >> 4) & 3;
        match (ir, step) {
            // in r,(c) (T:12) - r=6 only sets flags
            (0x40 | 0x48 | 0x50 | 0x58 | 0x60 | 0x68 | 0x70 | 0x78, 2) => {
                let port = self.regs.bc();
                self.regs.wz = port.wrapping_add(1);
                self.ioread(pins, port)
            }
            (0x40 | 0x48 | 0x50 | 0x58 | 0x60 | 0x68 | 0x70 | 0x78, 3) => {
                let v = pins.data();
                if y != 6 {
                    self.set_reg8_plain(y, v);
                }
                self.set_f(sz53p(v) | (self.regs.f & CF));
                pins
            }
            (0x40 | 0x48 | 0x50 | 0x58 | 0x60 | 0x68 | 0x70 | 0x78, 4) => self.fetch(pins),

            // out (c),r (T:12) - r=6 drives zero
            (0x41 | 0x49 | 0x51 | 0x59 | 0x61 | 0x69 | 0x71 | 0x79, 2) => {
                let port = self.regs.bc();
                self.regs.wz = port.wrapping_add(1);
                let v = if y == 6 { 0 } else { self.reg8_plain(y) };
                self.iowrite(pins, port, v)
            }
            (0x41 | 0x49 | 0x51 | 0x59 | 0x61 | 0x69 | 0x71 | 0x79, 3) => self.fetch(pins),

            // sbc hl,rr (T:15)
            (0x42 | 0x52 | 0x62 | 0x72, 2) => {
                let hl = self.regs.hl();
                self.regs.wz = hl.wrapping_add(1);
                let (v, flags) = alu::sbc16(hl, self.rp16(p), self.regs.f & CF != 0);
                self.regs.set_hl(v);
                self.set_f(flags);
                self.fetch(pins)
            }

            // adc hl,rr (T:15)
            (0x4A | 0x5A | 0x6A | 0x7A, 2) => {
                let hl = self.regs.hl();
                self.regs.wz = hl.wrapping_add(1);
                let (v, flags) = alu::adc16(hl, self.rp16(p), self.regs.f & CF != 0);
                self.regs.set_hl(v);
                self.set_f(flags);
                self.fetch(pins)
            }

            // ld (nn),rr (T:20)
            (0x43 | 0x53 | 0x63 | 0x73, 2) => {
                let addr = self.pc_inc();
                self.mread(pins, addr)
            }
            (0x43 | 0x53 | 0x63 | 0x73, 3) => {
                self.regs.wz = (self.regs.wz & 0xFF00) | u16::from(pins.data());
                pins
            }
            (0x43 | 0x53 | 0x63 | 0x73, 4) => {
                let addr = self.pc_inc();
                self.mread(pins, addr)
            }
            (0x43 | 0x53 | 0x63 | 0x73, 5) => {
                self.regs.wz = (self.regs.wz & 0x00FF) | u16::from(pins.data()) << 8;
                pins
            }
            (0x43 | 0x53 | 0x63 | 0x73, 6) => {
                let addr = self.regs.wz;
                self.regs.wz = addr.wrapping_add(1);
                let lo = self.rp16(p) as u8;
                self.mwrite(pins, addr, lo)
            }
            (0x43 | 0x53 | 0x63 | 0x73, 7) => {
                let hi = (self.rp16(p) >> 8) as u8;
                self.mwrite(pins, self.regs.wz, hi)
            }
            (0x43 | 0x53 | 0x63 | 0x73, 8) => self.fetch(pins),

            // ld rr,(nn) (T:20)
            (0x4B | 0x5B | 0x6B | 0x7B, 2) => {
                let addr = self.pc_inc();
                self.mread(pins, addr)
            }
            (0x4B | 0x5B | 0x6B | 0x7B, 3) => {
                self.regs.wz = (self.regs.wz & 0xFF00) | u16::from(pins.data());
                pins
            }
            (0x4B | 0x5B | 0x6B | 0x7B, 4) => {
                let addr = self.pc_inc();
                self.mread(pins, addr)
            }
            (0x4B | 0x5B | 0x6B | 0x7B, 5) => {
                self.regs.wz = (self.regs.wz & 0x00FF) | u16::from(pins.data()) << 8;
                pins
            }
            (0x4B | 0x5B | 0x6B | 0x7B, 6) => {
                let addr = self.regs.wz;
                self.regs.wz = addr.wrapping_add(1);
                self.mread(pins, addr)
            }
            (0x4B | 0x5B | 0x6B | 0x7B, 7) => {
                let v = (self.rp16(p) & 0xFF00) | u16::from(pins.data());
                self.set_rp16(p, v);
                pins
            }
            (0x4B | 0x5B | 0x6B | 0x7B, 8) => self.mread(pins, self.regs.wz),
            (0x4B | 0x5B | 0x6B | 0x7B, 9) => {
                let v = (self.rp16(p) & 0x00FF) | u16::from(pins.data()) << 8;
                self.set_rp16(p, v);
                pins
            }
            (0x4B | 0x5B | 0x6B | 0x7B, 10) => self.fetch(pins),

            // neg and its undocumented mirrors (T:8)
            (0x44 | 0x4C | 0x54 | 0x5C | 0x64 | 0x6C | 0x74 | 0x7C, 2) => {
                let r = alu::sub8(0, self.regs.a, false);
                self.regs.a = r.value;
                self.set_f(r.flags);
                self.fetch(pins)
            }

            // retn / reti (T:14); RETI additionally pulses the daisy-chain
            // acknowledge pin for one T-state
            (0x45 | 0x55 | 0x65 | 0x75 | 0x4D | 0x5D | 0x6D | 0x7D, 2) => {
                self.mread(pins, self.regs.sp)
            }
            (0x45 | 0x55 | 0x65 | 0x75 | 0x4D | 0x5D | 0x6D | 0x7D, 3) => {
                self.regs.wz = (self.regs.wz & 0xFF00) | u16::from(pins.data());
                self.regs.sp = self.regs.sp.wrapping_add(1);
                pins
            }
            (0x45 | 0x55 | 0x65 | 0x75 | 0x4D | 0x5D | 0x6D | 0x7D, 4) => {
                self.mread(pins, self.regs.sp)
            }
            (0x45 | 0x55 | 0x65 | 0x75 | 0x4D | 0x5D | 0x6D | 0x7D, 5) => {
                self.regs.wz = (self.regs.wz & 0x00FF) | u16::from(pins.data()) << 8;
                self.regs.sp = self.regs.sp.wrapping_add(1);
                self.regs.pc = self.regs.wz;
                self.regs.iff1 = self.regs.iff2;
                pins
            }
            (0x45 | 0x55 | 0x65 | 0x75, 6) => self.fetch(pins),
            (0x4D | 0x5D | 0x6D | 0x7D, 6) => {
                let pins = pins.set(pins::RETI);
                self.fetch(pins)
            }

            // im 0/1/2 and mirrors (T:8)
            (0x46 | 0x4E | 0x56 | 0x5E | 0x66 | 0x6E | 0x76 | 0x7E, 2) => {
                self.regs.im = match y & 3 {
                    0 | 1 => 0,
                    2 => 1,
                    _ => 2,
                };
                self.fetch(pins)
            }

            // ld i,a (T:9)
            (0x47, 2) => {
                self.regs.i = self.regs.a;
                self.fetch(pins)
            }

            // ld r,a (T:9)
            (0x4F, 2) => {
                self.regs.r = self.regs.a;
                self.fetch(pins)
            }

            // ld a,i / ld a,r (T:9) - P/V copies IFF2
            (0x57 | 0x5F, 2) => {
                self.regs.a = if ir == 0x57 { self.regs.i } else { self.regs.r };
                self.set_f(
                    (self.regs.f & CF)
                        | sz53(self.regs.a)
                        | if self.regs.iff2 { PF } else { 0 },
                );
                self.last_was_ld_a_ir = true;
                self.fetch(pins)
            }

            // rrd / rld (T:18)
            (0x67 | 0x6F, 2) => self.mread(pins, self.regs.hl()),
            (0x67 | 0x6F, 3) => {
                self.dlatch = pins.data();
                pins
            }
            (0x67 | 0x6F, 4) => {
                let a = self.regs.a;
                let m = self.dlatch;
                let (new_a, new_m) = if ir == 0x67 {
                    // rrd: low nibble of (hl) into A, A's low into high
                    ((a & 0xF0) | (m & 0x0F), (a & 0x0F) << 4 | m >> 4)
                } else {
                    // rld: high nibble of (hl) into A, A's low into low
                    ((a & 0xF0) | (m >> 4), (m & 0x0F) << 4 | (a & 0x0F))
                };
                self.regs.a = new_a;
                self.regs.wz = self.regs.hl().wrapping_add(1);
                self.set_f(sz53p(new_a) | (self.regs.f & CF));
                self.mwrite(pins, self.regs.hl(), new_m)
            }
            (0x67 | 0x6F, 5) => self.fetch(pins),

            // ldi / ldd (T:16), ldir / lddr (T:16/21)
            (0xA0 | 0xA8 | 0xB0 | 0xB8, 2) => self.mread(pins, self.regs.hl()),
            (0xA0 | 0xA8 | 0xB0 | 0xB8, 3) => {
                self.dlatch = pins.data();
                pins
            }
            (0xA0 | 0xA8 | 0xB0 | 0xB8, 4) => {
                let de = self.regs.de();
                let v = self.dlatch;
                let pins = self.mwrite(pins, de, v);
                if ir & 0x08 == 0 {
                    self.regs.set_hl(self.regs.hl().wrapping_add(1));
                    self.regs.set_de(de.wrapping_add(1));
                } else {
                    self.regs.set_hl(self.regs.hl().wrapping_sub(1));
                    self.regs.set_de(de.wrapping_sub(1));
                }
                self.regs.set_bc(self.regs.bc().wrapping_sub(1));
                let n = v.wrapping_add(self.regs.a);
                let base = self.regs.f & (SF | ZF | CF);
                let repeat = ir & 0x10 != 0 && self.regs.bc() != 0;
                if repeat {
                    // X/Y come from PCH after the rewind
                    self.regs.pc = self.regs.pc.wrapping_sub(2);
                    self.regs.wz = self.regs.pc.wrapping_add(1);
                    let pch = (self.regs.pc >> 8) as u8;
                    self.set_f(base | PF | (pch & (XF | YF)));
                } else {
                    self.set_f(
                        base
                            | (n & XF)
                            | if n & 0x02 != 0 { YF } else { 0 }
                            | if self.regs.bc() != 0 { PF } else { 0 },
                    );
                    if ir & 0x10 != 0 {
                        self.skip_to(4, 5);
                    }
                }
                pins
            }
            (0xA0 | 0xA8 | 0xB0 | 0xB8, 5) => self.fetch(pins),

            // cpi / cpd (T:16), cpir / cpdr (T:16/21)
            (0xA1 | 0xA9 | 0xB1 | 0xB9, 2) => self.mread(pins, self.regs.hl()),
            (0xA1 | 0xA9 | 0xB1 | 0xB9, 3) => {
                let v = pins.data();
                let a = self.regs.a;
                let result = a.wrapping_sub(v);
                let hf = a & 0x0F < v & 0x0F;
                let n = result.wrapping_sub(u8::from(hf));
                if ir & 0x08 == 0 {
                    self.regs.wz = self.regs.wz.wrapping_add(1);
                    self.regs.set_hl(self.regs.hl().wrapping_add(1));
                } else {
                    self.regs.wz = self.regs.wz.wrapping_sub(1);
                    self.regs.set_hl(self.regs.hl().wrapping_sub(1));
                }
                self.regs.set_bc(self.regs.bc().wrapping_sub(1));
                let base = (self.regs.f & CF)
                    | NF
                    | (sz53(result) & (SF | ZF))
                    | if hf { HF } else { 0 }
                    | if self.regs.bc() != 0 { PF } else { 0 };
                let repeat = ir & 0x10 != 0 && self.regs.bc() != 0 && result != 0;
                if repeat {
                    self.regs.pc = self.regs.pc.wrapping_sub(2);
                    self.regs.wz = self.regs.pc.wrapping_add(1);
                    let pch = (self.regs.pc >> 8) as u8;
                    self.set_f(base | (pch & (XF | YF)));
                } else {
                    self.set_f(base | (n & XF) | if n & 0x02 != 0 { YF } else { 0 });
                    if ir & 0x10 != 0 {
                        self.skip_to(7, 4);
                    }
                }
                pins
            }
            (0xA1 | 0xA9 | 0xB1 | 0xB9, 4) => self.fetch(pins),

            // ini / ind (T:16), inir / indr (T:16/21)
            (0xA2 | 0xAA | 0xB2 | 0xBA, 2) => {
                let port = self.regs.bc();
                self.regs.wz = if ir & 0x08 == 0 {
                    port.wrapping_add(1)
                } else {
                    port.wrapping_sub(1)
                };
                self.ioread(pins, port)
            }
            (0xA2 | 0xAA | 0xB2 | 0xBA, 3) => {
                self.dlatch = pins.data();
                pins
            }
            (0xA2 | 0xAA | 0xB2 | 0xBA, 4) => {
                let v = self.dlatch;
                let hl = self.regs.hl();
                let pins = self.mwrite(pins, hl, v);
                self.regs.b = self.regs.b.wrapping_sub(1);
                let c_adj = if ir & 0x08 == 0 {
                    self.regs.c.wrapping_add(1)
                } else {
                    self.regs.c.wrapping_sub(1)
                };
                if ir & 0x08 == 0 {
                    self.regs.set_hl(hl.wrapping_add(1));
                } else {
                    self.regs.set_hl(hl.wrapping_sub(1));
                }
                let k = u16::from(v) + u16::from(c_adj);
                let repeat = ir & 0x10 != 0 && self.regs.b != 0;
                if repeat {
                    self.regs.pc = self.regs.pc.wrapping_sub(2);
                    self.regs.wz = self.regs.pc.wrapping_add(1);
                    self.io_repeat_flags(v, k);
                } else {
                    self.io_block_flags(v, k);
                    if ir & 0x10 != 0 {
                        self.skip_to(2, 5);
                    }
                }
                pins
            }
            (0xA2 | 0xAA | 0xB2 | 0xBA, 5) => self.fetch(pins),

            // outi / outd (T:16), otir / otdr (T:16/21)
            (0xA3 | 0xAB | 0xB3 | 0xBB, 2) => self.mread(pins, self.regs.hl()),
            (0xA3 | 0xAB | 0xB3 | 0xBB, 3) => {
                self.dlatch = pins.data();
                pins
            }
            (0xA3 | 0xAB | 0xB3 | 0xBB, 4) => {
                let v = self.dlatch;
                self.regs.b = self.regs.b.wrapping_sub(1);
                let port = self.regs.bc();
                self.regs.wz = if ir & 0x08 == 0 {
                    port.wrapping_add(1)
                } else {
                    port.wrapping_sub(1)
                };
                let pins = self.iowrite(pins, port, v);
                if ir & 0x08 == 0 {
                    self.regs.set_hl(self.regs.hl().wrapping_add(1));
                } else {
                    self.regs.set_hl(self.regs.hl().wrapping_sub(1));
                }
                let k = u16::from(v) + u16::from(self.regs.l);
                let repeat = ir & 0x10 != 0 && self.regs.b != 0;
                if repeat {
                    self.regs.pc = self.regs.pc.wrapping_sub(2);
                    self.regs.wz = self.regs.pc.wrapping_add(1);
                    self.io_repeat_flags(v, k);
                } else {
                    self.io_block_flags(v, k);
                    if ir & 0x10 != 0 {
                        self.skip_to(3, 5);
                    }
                }
                pins
            }
            (0xA3 | 0xAB | 0xB3 | 0xBB, 5) => self.fetch(pins),

            // every unused slot executes as a nop (T:8)
            (_, 2) => self.fetch(pins),

            _ => {
                debug_assert!(false, "no ED step {step} for opcode {ir:#04X}");
                self.fetch(pins)
            }
        }
    }

    /// Index displacement preamble: fetch d, form the effective address in
    /// WZ, then re-enter the main table with the payload schedule.
    fn step_disp(&mut self, step: u16, pins: Pins) -> Pins {
        match step {
            2 => {
                let addr = self.pc_inc();
                self.mread(pins, addr)
            }
            3 => {
                self.disp = pins.data() as i8;
                self.regs.wz = self.hl_view().wrapping_add(self.disp as u16);
                pins
            }
            4 => {
                self.block = Block::Main;
                self.op.pip = MAIN[self.ir as usize];
                self.op.step = 2;
                pins
            }
            _ => {
                debug_assert!(false, "no displacement step {step}");
                self.fetch(pins)
            }
        }
    }

    /// ld (ix+d),n / ld (iy+d),n: the immediate is fetched while the
    /// displacement add is still in flight.
    fn step_disp_imm(&mut self, step: u16, pins: Pins) -> Pins {
        match step {
            2 => {
                let addr = self.pc_inc();
                self.mread(pins, addr)
            }
            3 => {
                self.disp = pins.data() as i8;
                self.regs.wz = self.hl_view().wrapping_add(self.disp as u16);
                pins
            }
            4 => {
                let addr = self.pc_inc();
                self.mread(pins, addr)
            }
            5 => {
                self.dlatch = pins.data();
                pins
            }
            6 => self.mwrite(pins, self.regs.wz, self.dlatch),
            7 => self.fetch(pins),
            _ => {
                debug_assert!(false, "no indexed-immediate step {step}");
                self.fetch(pins)
            }
        }
    }

    /// DD CB / FD CB: displacement and sub-opcode arrive as plain reads
    /// (no M1, no refresh), then the operation runs against (IX+d) with the
    /// undocumented register copy on non-BIT forms.
    fn step_ddcb(&mut self, step: u16, pins: Pins) -> Pins {
        match step {
            2 => {
                let addr = self.pc_inc();
                self.mread(pins, addr)
            }
            3 => {
                self.disp = pins.data() as i8;
                self.regs.wz = self.hl_view().wrapping_add(self.disp as u16);
                pins
            }
            4 => {
                let addr = self.pc_inc();
                self.mread(pins, addr)
            }
            5 => {
                self.ir = pins.data();
                self.op.pip = if self.ir >> 6 == 1 { DDCB_BIT_PIP } else { DDCB_RMW_PIP };
                pins
            }
            6 => self.mread(pins, self.regs.wz),
            7 => {
                self.dlatch = pins.data();
                pins
            }
            8 if self.ir >> 6 == 1 => {
                let v = self.dlatch;
                let bit = (self.ir >> 3) & 7;
                let wzh = (self.regs.wz >> 8) as u8;
                self.bit_flags(v, bit, wzh);
                self.fetch(pins)
            }
            8 => {
                let ir = self.ir;
                let r = self.cb_op(ir, self.dlatch);
                // undocumented dual-target: the register named by the low
                // three bits is written as well
                if ir & 7 != 6 {
                    self.set_reg8_plain(ir & 7, r);
                }
                self.mwrite(pins, self.regs.wz, r)
            }
            9 => self.fetch(pins),
            _ => {
                debug_assert!(false, "no DDCB step {step} for opcode {:#04X}", self.ir);
                self.fetch(pins)
            }
        }
    }

    /// Maskable interrupt acknowledge. The 6 T-state acknowledge cycle ends
    /// in a refresh that dispatches on the interrupt mode: IM 0 executes
    /// the byte the device drove (IM 1 forces 0xFF, i.e. RST 38h) with the
    /// main decode table; IM 2 continues here to fetch the vector.
    fn step_int_ack(&mut self, step: u16, pins: Pins) -> Pins {
        match step {
            // ack T-state: the device puts the vector byte on the bus
            2 => pins.with_addr_pins(self.regs.pc, pins::M1 | pins::IORQ),
            3 => {
                self.dlatch = pins.data();
                pins
            }
            4 => {
                let pins = self.refresh(pins);
                match self.regs.im {
                    0 | 1 => {
                        self.ir = if self.regs.im == 1 { 0xFF } else { self.dlatch };
                        self.block = Block::Main;
                        self.index = Index::Hl;
                        self.op.pip = MAIN[self.ir as usize];
                        self.op.step = 2;
                    }
                    _ => {
                        self.regs.wz =
                            u16::from(self.regs.i) << 8 | u16::from(self.dlatch & 0xFE);
                        self.op.pip = IM2_PIP;
                    }
                }
                pins
            }
            // IM 2 continuation: push PC, read the handler address
            5 => {
                self.regs.sp = self.regs.sp.wrapping_sub(1);
                let hi = (self.regs.pc >> 8) as u8;
                self.mwrite(pins, self.regs.sp, hi)
            }
            6 => {
                self.regs.sp = self.regs.sp.wrapping_sub(1);
                let lo = self.regs.pc as u8;
                self.mwrite(pins, self.regs.sp, lo)
            }
            7 => {
                let addr = self.regs.wz;
                self.regs.wz = addr.wrapping_add(1);
                self.mread(pins, addr)
            }
            8 => {
                self.dlatch = pins.data();
                pins
            }
            9 => self.mread(pins, self.regs.wz),
            10 => {
                self.regs.pc = u16::from(pins.data()) << 8 | u16::from(self.dlatch);
                self.regs.wz = self.regs.pc;
                pins
            }
            11 => self.fetch(pins),
            _ => {
                debug_assert!(false, "no interrupt-ack step {step}");
                self.fetch(pins)
            }
        }
    }

    /// Non-maskable interrupt accept: discarded fetch, push PC, jump to
    /// 0x0066.
    fn step_nmi(&mut self, step: u16, pins: Pins) -> Pins {
        match step {
            2 => self.refresh(pins),
            3 => {
                self.regs.sp = self.regs.sp.wrapping_sub(1);
                let hi = (self.regs.pc >> 8) as u8;
                self.mwrite(pins, self.regs.sp, hi)
            }
            4 => {
                self.regs.sp = self.regs.sp.wrapping_sub(1);
                let lo = self.regs.pc as u8;
                self.regs.pc = 0x0066;
                self.regs.wz = 0x0066;
                self.mwrite(pins, self.regs.sp, lo)
            }
            5 => self.fetch(pins),
            _ => {
                debug_assert!(false, "no NMI step {step}");
                self.fetch(pins)
            }
        }
    }
}
