//! Z80 CPU core with per-T-state execution.
//!
//! The CPU does not own a bus. Every call to `tick()` takes the pin word as
//! the host last saw it and returns the pin word the CPU drives for the
//! coming T-state; the host performs whatever memory or I/O transaction the
//! control strobes request before calling `tick()` again.

#![allow(clippy::cast_possible_truncation)] // Intentional truncation for low byte extraction.
#![allow(clippy::cast_possible_wrap)] // Intentional i8 casts for displacements.
#![allow(clippy::cast_sign_loss)] // Displacements are added as 16-bit two's complement.

use emu_core::{Observable, Ticks, Value};

use crate::decode::{FETCH_PIP, INIT_PIP, INT_ACK_PIP, NMI_PIP, PIP_STEP, PIP_WAIT, PREFETCH_PIP};
use crate::flags::{flag, sz53, sz53p, CF, HF, NF, PF, SF, XF, YF, ZF};
use crate::pins::{self, Pins};
use crate::registers::Registers;

/// The in-flight operation: the pipeline word scheduling the remaining
/// T-states and the index of the next step to execute.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct OpState {
    pub pip: u64,
    pub step: u16,
}

/// Which step table the current operation executes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Block {
    /// Main table (also reached through DD/FD register remapping).
    Main,
    /// CB-prefixed table.
    Cb,
    /// ED-prefixed table.
    Ed,
    /// DD CB / FD CB: displacement, sub-opcode, then the operation.
    DdCb,
    /// Index displacement preamble before re-entering the main table.
    Disp,
    /// LD (IX+d),n / LD (IY+d),n, whose immediate overlaps the preamble.
    DispImm,
    /// Maskable interrupt acknowledge (all three modes).
    IntAck,
    /// Non-maskable interrupt accept.
    Nmi,
}

/// Which register the in-flight instruction sees as HL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Index {
    Hl,
    Ix,
    Iy,
}

/// Pending prefix byte, applied when the next opcode is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Prefix {
    None,
    Cb,
    Ed,
    Dd,
    Fd,
}

/// Pin-level Z80.
///
/// Drive it like the hardware: call [`tick`](Self::tick) once per clock,
/// service the strobes it returns, feed data and the input pins back in.
#[derive(Clone)]
pub struct Z80 {
    /// Architectural registers. Public so harnesses can set up and compare
    /// whole machine states.
    pub regs: Registers,

    /// EI takes effect one instruction late; this blocks the one
    /// intervening interrupt sample.
    pub ei_delay: bool,
    /// Set while the previous instruction was LD A,I or LD A,R: an
    /// interrupt accepted at that boundary wipes the just-copied P/V flag.
    pub last_was_ld_a_ir: bool,
    /// F as written by the previous instruction, zero if it left flags
    /// alone. Feeds the SCF/CCF undocumented X/Y result.
    pub prev_q: u8,
    /// F as written by the current instruction so far.
    pub last_q: u8,

    pub(crate) op: OpState,
    pub(crate) block: Block,
    pub(crate) index: Index,
    pub(crate) prefix: Prefix,
    /// Last fetched opcode (or prefix sub-opcode).
    pub(crate) ir: u8,
    /// Temporary store bridging non-adjacent T-states of one instruction.
    pub(crate) dlatch: u8,
    /// Index displacement of the in-flight (IX+d)/(IY+d) form.
    pub(crate) disp: i8,

    nmi_pending: bool,
    nmi_last: bool,

    pins: Pins,
    total_ticks: Ticks,
}

impl Z80 {
    /// Create a CPU in its post-reset state with the pipeline armed to
    /// fetch from address 0. [`pins`](Self::pins) carries the initial
    /// `M1|MREQ|RD` mask the host must service before the first tick.
    #[must_use]
    pub fn new() -> Self {
        let mut cpu = Self {
            regs: Registers::default(),
            ei_delay: false,
            last_was_ld_a_ir: false,
            prev_q: 0,
            last_q: 0,
            op: OpState::default(),
            block: Block::Main,
            index: Index::Hl,
            prefix: Prefix::None,
            ir: 0,
            dlatch: 0,
            disp: 0,
            nmi_pending: false,
            nmi_last: false,
            pins: Pins::none(),
            total_ticks: Ticks::ZERO,
        };
        cpu.init();
        cpu
    }

    /// Reset to the documented power-on state and arm an opcode fetch from
    /// address 0. Returns the initial pin mask.
    ///
    /// Register contents follow the visualz80 silicon trace: every pair
    /// reads 0x5555 out of reset.
    pub fn init(&mut self) -> Pins {
        self.regs = Registers::default();
        self.regs.set_af(0x5555);
        self.regs.set_bc(0x5555);
        self.regs.set_de(0x5555);
        self.regs.set_hl(0x5555);
        self.regs.ix = 0x5555;
        self.regs.iy = 0x5555;
        self.regs.sp = 0x5555;
        self.regs.wz = 0x5555;
        self.regs.set_af_alt(0x5555);
        self.regs.set_bc_alt(0x5555);
        self.regs.set_de_alt(0x5555);
        self.regs.set_hl_alt(0x5555);

        self.ei_delay = false;
        self.last_was_ld_a_ir = false;
        self.prev_q = 0;
        self.last_q = 0;
        self.block = Block::Main;
        self.index = Index::Hl;
        self.prefix = Prefix::None;
        self.ir = 0;
        self.dlatch = 0;
        self.disp = 0;
        self.nmi_pending = false;
        self.nmi_last = false;
        self.total_ticks = Ticks::ZERO;

        // The first M1 is driven here rather than by a tick, so the armed
        // pipeline starts one T-state into the fetch.
        self.op = OpState { pip: INIT_PIP, step: 0 };
        let addr = self.regs.pc;
        self.regs.pc = self.regs.pc.wrapping_add(1);
        self.pins = Pins::none().with_addr_pins(addr, pins::M1 | pins::MREQ | pins::RD);
        self.pins
    }

    /// Advance one T-state.
    ///
    /// The returned pin word is also kept internally and readable through
    /// [`pins`](Self::pins) until the next tick.
    pub fn tick(&mut self, pins: Pins) -> Pins {
        self.total_ticks += Ticks::new(1);

        // NMI is edge-triggered: latch the rising edge on any T-state, act
        // on it at the next end of instruction.
        let nmi_now = pins.test(pins::NMI);
        if nmi_now && !self.nmi_last {
            self.nmi_pending = true;
        }
        self.nmi_last = nmi_now;

        // Wait-stall: on wait-sampled T-states an asserted WAIT freezes the
        // whole engine with the control strobes held.
        if self.op.pip & PIP_WAIT != 0 && pins.test(pins::WAIT) {
            self.pins = pins;
            return pins;
        }

        // Each T-state drives only its own strobes; RETI is a one-tick
        // pulse.
        let mut pins = pins.clear(pins::CTRL_MASK | pins::RETI);

        if self.op.pip & PIP_STEP != 0 {
            pins = self.exec_step(pins);
        }

        self.op.pip = (self.op.pip & !(PIP_STEP | PIP_WAIT)) >> 1;
        self.pins = pins;
        pins
    }

    /// Force execution to continue at `new_pc`: the next tick runs the
    /// overlap of a NOP there, which drives the opcode fetch.
    pub fn prefetch(&mut self, new_pc: u16) -> Pins {
        self.regs.pc = new_pc;
        self.block = Block::Main;
        self.index = Index::Hl;
        self.prefix = Prefix::None;
        self.ir = 0x00;
        self.op = OpState { pip: PREFETCH_PIP, step: 2 };
        self.pins = Pins::none();
        self.pins
    }

    /// True in the window after an instruction's overlap T-state, before
    /// the next opcode's IR latch. The result of instruction N is fully
    /// architecturally visible exactly then. A pending prefix keeps the
    /// window closed: DD 09 is one instruction, not two.
    #[must_use]
    pub fn opdone(&self) -> bool {
        self.op.step == 0 && self.prefix == Prefix::None
    }

    /// The pin word driven by the most recent tick (or by `init`).
    #[must_use]
    pub fn pins(&self) -> Pins {
        self.pins
    }

    /// Total T-states since `init`.
    #[must_use]
    pub fn total_ticks(&self) -> Ticks {
        self.total_ticks
    }
}

impl Default for Z80 {
    fn default() -> Self {
        Self::new()
    }
}

// === Step-machine service routines =======================================

impl Z80 {
    /// Write F and record it in Q.
    pub(crate) fn set_f(&mut self, f: u8) {
        self.regs.f = f;
        self.last_q = f;
    }

    /// Drive a memory read cycle: address out, MREQ|RD asserted.
    pub(crate) fn mread(&self, pins: Pins, addr: u16) -> Pins {
        pins.with_addr_pins(addr, pins::MREQ | pins::RD)
    }

    /// Drive a memory write cycle: address and data out, MREQ|WR asserted.
    pub(crate) fn mwrite(&self, pins: Pins, addr: u16, data: u8) -> Pins {
        pins.with_addr_data_pins(addr, data, pins::MREQ | pins::WR)
    }

    /// Drive an I/O read cycle.
    pub(crate) fn ioread(&self, pins: Pins, addr: u16) -> Pins {
        pins.with_addr_pins(addr, pins::IORQ | pins::RD)
    }

    /// Drive an I/O write cycle.
    pub(crate) fn iowrite(&self, pins: Pins, addr: u16, data: u8) -> Pins {
        pins.with_addr_data_pins(addr, data, pins::IORQ | pins::WR)
    }

    /// Return PC and post-increment it.
    pub(crate) fn pc_inc(&mut self) -> u16 {
        let pc = self.regs.pc;
        self.regs.pc = pc.wrapping_add(1);
        pc
    }

    /// Drive the refresh half of an M1 cycle: I:R on the address bus with
    /// MREQ|RFSH, then advance the low seven bits of R.
    pub(crate) fn refresh(&mut self, pins: Pins) -> Pins {
        let addr = u16::from(self.regs.i) << 8 | u16::from(self.regs.r);
        self.regs.inc_r();
        pins.with_addr_pins(addr, pins::MREQ | pins::RFSH)
    }

    /// Abandon the remaining schedule: run the step at index `step` (the
    /// instruction's overlap) `dt` T-states from now. Used by conditional
    /// and repeating instructions on their short path.
    pub(crate) fn skip_to(&mut self, dt: u32, step: u16) {
        self.op.pip = PIP_STEP << dt;
        self.op.step = step;
    }

    /// The overlap: finish the instruction and drive the M1 fetch of the
    /// next one, unless an end-of-instruction sample (RES, NMI, INT)
    /// redirects execution. This is the only point where those inputs are
    /// acted on, and a pending prefix blocks all of them.
    pub(crate) fn fetch(&mut self, pins: Pins) -> Pins {
        if self.prefix == Prefix::None {
            if pins.test(pins::RES) {
                return self.begin_reset(pins);
            }
            if self.nmi_pending {
                return self.begin_nmi(pins);
            }
            // ei_delay blocks exactly one sample here; the next
            // instruction's decode clears it.
            if self.regs.iff1 && !self.ei_delay && pins.test(pins::INT) {
                return self.begin_int(pins);
            }
        }

        self.op = OpState { pip: FETCH_PIP, step: 0 };
        let addr = self.pc_inc();
        pins.with_addr_pins(addr, pins::M1 | pins::MREQ | pins::RD)
    }

    /// RES sampled at end of instruction: clear the control state and fetch
    /// from address 0. Working registers keep their values.
    fn begin_reset(&mut self, pins: Pins) -> Pins {
        self.regs.pc = 0;
        self.regs.wz = 0;
        self.regs.i = 0;
        self.regs.r = 0;
        self.regs.im = 0;
        self.regs.iff1 = false;
        self.regs.iff2 = false;
        self.regs.halted = false;
        self.prefix = Prefix::None;
        self.index = Index::Hl;
        self.ei_delay = false;
        self.nmi_pending = false;

        self.op = OpState { pip: FETCH_PIP, step: 0 };
        let addr = self.pc_inc();
        pins.clear(pins::HALT)
            .with_addr_pins(addr, pins::M1 | pins::MREQ | pins::RD)
    }

    /// Leave the halt loop before accepting an interrupt: PC moves past the
    /// halt opcode and the HALT pin releases.
    fn leave_halt(&mut self, pins: Pins) -> Pins {
        if self.regs.halted {
            self.regs.halted = false;
            self.regs.pc = self.regs.pc.wrapping_add(1);
            pins.clear(pins::HALT)
        } else {
            pins
        }
    }

    /// Accept NMI: 11 T-states, IFF1 cleared (IFF2 keeps the pre-interrupt
    /// enable so RETN can restore it), PC pushed, jump to 0x0066.
    fn begin_nmi(&mut self, pins: Pins) -> Pins {
        self.nmi_pending = false;
        let pins = self.leave_halt(pins);
        self.regs.iff1 = false;

        self.prev_q = self.last_q;
        self.last_q = 0;

        self.block = Block::Nmi;
        self.op = OpState { pip: NMI_PIP, step: 2 };
        // A real (but discarded) opcode fetch starts the accept cycle.
        pins.with_addr_pins(self.regs.pc, pins::M1 | pins::MREQ | pins::RD)
    }

    /// Accept a maskable interrupt: run the acknowledge M-cycle, then
    /// dispatch on the interrupt mode.
    fn begin_int(&mut self, pins: Pins) -> Pins {
        let pins = self.leave_halt(pins);
        self.regs.iff1 = false;
        self.regs.iff2 = false;

        // An interrupt right after LD A,I / LD A,R wipes the copied IFF2.
        if self.last_was_ld_a_ir {
            self.regs.f &= !PF;
        }

        self.prev_q = self.last_q;
        self.last_q = 0;

        self.block = Block::IntAck;
        self.op = OpState { pip: INT_ACK_PIP, step: 2 };
        pins.with_addr_pins(self.regs.pc, pins::M1)
    }

    /// Condition code test for JP/JR/CALL/RET families.
    pub(crate) fn cond(&self, cc: u8) -> bool {
        match cc & 7 {
            0 => self.regs.f & ZF == 0,
            1 => self.regs.f & ZF != 0,
            2 => self.regs.f & CF == 0,
            3 => self.regs.f & CF != 0,
            4 => self.regs.f & PF == 0,
            5 => self.regs.f & PF != 0,
            6 => self.regs.f & SF == 0,
            _ => self.regs.f & SF != 0,
        }
    }

    /// The register the current instruction sees as HL.
    pub(crate) fn hl_view(&self) -> u16 {
        match self.index {
            Index::Hl => self.regs.hl(),
            Index::Ix => self.regs.ix,
            Index::Iy => self.regs.iy,
        }
    }

    pub(crate) fn set_hl_view(&mut self, value: u16) {
        match self.index {
            Index::Hl => self.regs.set_hl(value),
            Index::Ix => self.regs.ix = value,
            Index::Iy => self.regs.iy = value,
        }
    }

    /// Effective address of the (HL) operand: WZ holds IX+d/IY+d after the
    /// displacement preamble, HL otherwise.
    pub(crate) fn ea(&self) -> u16 {
        if self.index == Index::Hl {
            self.regs.hl()
        } else {
            self.regs.wz
        }
    }

    /// 8-bit register by field code, with H/L remapped to the index halves
    /// under DD/FD. Code 6 is the memory operand and never reaches here.
    pub(crate) fn reg8(&self, code: u8) -> u8 {
        match code & 7 {
            0 => self.regs.b,
            1 => self.regs.c,
            2 => self.regs.d,
            3 => self.regs.e,
            4 => (self.hl_view() >> 8) as u8,
            5 => self.hl_view() as u8,
            7 => self.regs.a,
            _ => {
                debug_assert!(false, "register code 6 is the memory operand");
                0
            }
        }
    }

    pub(crate) fn set_reg8(&mut self, code: u8, value: u8) {
        match code & 7 {
            0 => self.regs.b = value,
            1 => self.regs.c = value,
            2 => self.regs.d = value,
            3 => self.regs.e = value,
            4 => {
                let v = (self.hl_view() & 0x00FF) | u16::from(value) << 8;
                self.set_hl_view(v);
            }
            5 => {
                let v = (self.hl_view() & 0xFF00) | u16::from(value);
                self.set_hl_view(v);
            }
            7 => self.regs.a = value,
            _ => debug_assert!(false, "register code 6 is the memory operand"),
        }
    }

    /// 8-bit register by field code without index remapping. Instructions
    /// with an (IX+d) operand address H and L directly.
    pub(crate) fn reg8_plain(&self, code: u8) -> u8 {
        match code & 7 {
            0 => self.regs.b,
            1 => self.regs.c,
            2 => self.regs.d,
            3 => self.regs.e,
            4 => self.regs.h,
            5 => self.regs.l,
            7 => self.regs.a,
            _ => {
                debug_assert!(false, "register code 6 is the memory operand");
                0
            }
        }
    }

    pub(crate) fn set_reg8_plain(&mut self, code: u8, value: u8) {
        match code & 7 {
            0 => self.regs.b = value,
            1 => self.regs.c = value,
            2 => self.regs.d = value,
            3 => self.regs.e = value,
            4 => self.regs.h = value,
            5 => self.regs.l = value,
            7 => self.regs.a = value,
            _ => debug_assert!(false, "register code 6 is the memory operand"),
        }
    }

    /// 16-bit register pair by field code (SP family).
    pub(crate) fn rp16(&self, code: u8) -> u16 {
        match code & 3 {
            0 => self.regs.bc(),
            1 => self.regs.de(),
            2 => self.hl_view(),
            _ => self.regs.sp,
        }
    }

    pub(crate) fn set_rp16(&mut self, code: u8, value: u16) {
        match code & 3 {
            0 => self.regs.set_bc(value),
            1 => self.regs.set_de(value),
            2 => self.set_hl_view(value),
            _ => self.regs.sp = value,
        }
    }

    /// 16-bit register pair by field code (AF family, for PUSH/POP).
    pub(crate) fn rp16_af(&self, code: u8) -> u16 {
        match code & 3 {
            0 => self.regs.bc(),
            1 => self.regs.de(),
            2 => self.hl_view(),
            _ => self.regs.af(),
        }
    }

    pub(crate) fn set_rp16_af(&mut self, code: u8, value: u16) {
        match code & 3 {
            0 => self.regs.set_bc(value),
            1 => self.regs.set_de(value),
            2 => self.set_hl_view(value),
            _ => self.regs.set_af(value),
        }
    }

    /// BIT n test: Z/P from the tested bit, S only for bit 7, H always set,
    /// X/Y from `xy_src` (the operand for register forms, WZ's high byte
    /// for the memory forms).
    pub(crate) fn bit_flags(&mut self, value: u8, bit: u8, xy_src: u8) {
        let zero = value & (1 << bit) == 0;
        let f = (self.regs.f & CF)
            | HF
            | (xy_src & (YF | XF))
            | flag(zero, ZF | PF)
            | flag(!zero && bit == 7, SF);
        self.set_f(f);
    }

    /// SCF/CCF undocumented X/Y source: `(Q ^ F) | A` on NMOS silicon.
    pub(crate) fn scf_xy(&self) -> u8 {
        ((self.prev_q ^ self.regs.f) | self.regs.a) & (YF | XF)
    }

    /// Flag layout shared by INI/IND/OUTI/OUTD: S/Z/X/Y from the
    /// decremented B, N from bit 7 of the transferred byte, H and C from
    /// the 9-bit sum `k`, parity from `(k & 7) ^ B`.
    pub(crate) fn io_block_flags(&mut self, value: u8, k: u16) {
        let b = self.regs.b;
        let f = sz53(b)
            | flag(value & 0x80 != 0, NF)
            | flag(k > 0xFF, HF | CF)
            | (sz53p((k as u8 & 7) ^ b) & PF);
        self.set_f(f);
    }

    /// Repeat-path flag fixup shared by INIR/INDR/OTIR/OTDR: X/Y come from
    /// PCH, and H and parity are adjusted around the borrow/carry into the
    /// next round's B.
    pub(crate) fn io_repeat_flags(&mut self, value: u8, k: u16) {
        let b = self.regs.b;
        let pch = (self.regs.pc >> 8) as u8;
        let p = (k as u8 & 7) ^ b;
        let (hf, pf) = if k > 0xFF {
            if value & 0x80 != 0 {
                (flag(b & 0x0F == 0x00, HF), sz53p(p ^ (b.wrapping_sub(1) & 7)) & PF)
            } else {
                (flag(b & 0x0F == 0x0F, HF), sz53p(p ^ (b.wrapping_add(1) & 7)) & PF)
            }
        } else {
            (0, sz53p(p ^ (b & 7)) & PF)
        };
        let f = (b & SF)
            | (pch & (XF | YF))
            | flag(value & 0x80 != 0, NF)
            | flag(k > 0xFF, CF)
            | hf
            | pf;
        self.set_f(f);
    }
}

// Instruction execution split into a separate file for readability.
mod execute;

/// All query paths supported by the Z80.
const Z80_QUERY_PATHS: &[&str] = &[
    // Main registers
    "a", "f", "b", "c", "d", "e", "h", "l",
    // Register pairs
    "af", "bc", "de", "hl",
    // Alternate pairs
    "af'", "bc'", "de'", "hl'",
    // Index registers
    "ix", "iy",
    // Other registers
    "sp", "pc", "wz", "i", "r", "ir",
    // Flags (individual)
    "flags.s", "flags.z", "flags.y", "flags.h",
    "flags.x", "flags.p", "flags.n", "flags.c",
    // Interrupt state
    "iff1", "iff2", "im",
    // CPU state
    "halted", "ticks", "opdone", "pins",
];

impl Observable for Z80 {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            // Main registers
            "a" => Some(self.regs.a.into()),
            "f" => Some(self.regs.f.into()),
            "b" => Some(self.regs.b.into()),
            "c" => Some(self.regs.c.into()),
            "d" => Some(self.regs.d.into()),
            "e" => Some(self.regs.e.into()),
            "h" => Some(self.regs.h.into()),
            "l" => Some(self.regs.l.into()),

            // Register pairs
            "af" => Some(self.regs.af().into()),
            "bc" => Some(self.regs.bc().into()),
            "de" => Some(self.regs.de().into()),
            "hl" => Some(self.regs.hl().into()),

            // Alternate pairs
            "af'" => Some(self.regs.af_alt().into()),
            "bc'" => Some(self.regs.bc_alt().into()),
            "de'" => Some(self.regs.de_alt().into()),
            "hl'" => Some(self.regs.hl_alt().into()),

            // Index registers
            "ix" => Some(self.regs.ix.into()),
            "iy" => Some(self.regs.iy.into()),

            // Other registers
            "sp" => Some(self.regs.sp.into()),
            "pc" => Some(self.regs.pc.into()),
            "wz" => Some(self.regs.wz.into()),
            "i" => Some(self.regs.i.into()),
            "r" => Some(self.regs.r.into()),
            "ir" => Some(self.ir.into()),

            // Individual flags
            "flags.s" => Some((self.regs.f & SF != 0).into()),
            "flags.z" => Some((self.regs.f & ZF != 0).into()),
            "flags.y" => Some((self.regs.f & YF != 0).into()),
            "flags.h" => Some((self.regs.f & HF != 0).into()),
            "flags.x" => Some((self.regs.f & XF != 0).into()),
            "flags.p" => Some((self.regs.f & PF != 0).into()),
            "flags.n" => Some((self.regs.f & NF != 0).into()),
            "flags.c" => Some((self.regs.f & CF != 0).into()),

            // Interrupt state
            "iff1" => Some(self.regs.iff1.into()),
            "iff2" => Some(self.regs.iff2.into()),
            "im" => Some(self.regs.im.into()),

            // CPU state
            "halted" => Some(self.regs.halted.into()),
            "ticks" => Some(self.total_ticks.get().into()),
            "opdone" => Some(self.opdone().into()),
            "pins" => Some(self.pins.0.into()),

            _ => None,
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        Z80_QUERY_PATHS
    }
}
