//! Static instruction decode tables.
//!
//! Every opcode owns a 64-bit pipeline word describing the rest of the
//! instruction after the M1 decode T-state. The low 32 bits are step-enable
//! flags (one bit per future T-state that executes a step), the high 32 bits
//! are wait-sample flags (T-states that an asserted WAIT pin may stretch).
//! Bit `p` of either half fires `p` T-states after the tick that installed
//! the word; the engine shifts both halves right by one every T-state.
//!
//! The tables are built at compile time from each opcode's machine-cycle
//! list, so the timing shape and the step handlers in `cpu/execute.rs` stay
//! in one-to-one correspondence: one enabled bit per handler arm, with the
//! overlap (fetch of the next opcode) always last.

/// Step-enable bit for the current T-state.
pub(crate) const PIP_STEP: u64 = 1;

/// Wait-sample bit for the current T-state.
pub(crate) const PIP_WAIT: u64 = 1 << 32;

const WAIT_SHIFT: u32 = 32;

/// One machine cycle in an instruction's schedule. The trailing overlap
/// cycle is implicit; the builder always appends it.
#[derive(Clone, Copy)]
enum Mc {
    /// Memory read, 3T: drive on T1, wait-sample and latch on T2.
    Mr,
    /// Memory write, 3T: wait-sample and drive on T2.
    Mw,
    /// I/O read, 4T: drive on T2, wait-sample and latch on TW.
    Ior,
    /// I/O write, 4T: drive on T2, wait-sample on TW.
    Iow,
    /// Internal processing, n T-states, no steps.
    In(u8),
    /// Internal processing, 1 T-state, with a step (condition evaluation).
    Act,
}

use Mc::{Act, In, Ior, Iow, Mr, Mw};

/// Compose a pipeline word from the machine cycles that follow M1.
const fn pip(cycles: &[Mc]) -> u64 {
    let mut word: u64 = 0;
    let mut c: u32 = 1;
    let mut i = 0;
    while i < cycles.len() {
        match cycles[i] {
            Mc::Mr => {
                word |= (PIP_STEP << c) | (PIP_STEP << (c + 1));
                word |= 1 << (WAIT_SHIFT + c + 1);
                c += 3;
            }
            Mc::Mw => {
                word |= PIP_STEP << (c + 1);
                word |= 1 << (WAIT_SHIFT + c + 1);
                c += 3;
            }
            Mc::Ior => {
                word |= (PIP_STEP << (c + 1)) | (PIP_STEP << (c + 2));
                word |= 1 << (WAIT_SHIFT + c + 2);
                c += 4;
            }
            Mc::Iow => {
                word |= PIP_STEP << (c + 1);
                word |= 1 << (WAIT_SHIFT + c + 2);
                c += 4;
            }
            Mc::In(n) => c += n as u32,
            Mc::Act => {
                word |= PIP_STEP << c;
                c += 1;
            }
        }
        i += 1;
    }
    // Overlap: the last T-state performs the leftover work and starts the
    // next opcode fetch.
    word | (PIP_STEP << c)
}

/// Pipeline armed by a fetch: wait-sample on M1/T2, the IR latch on T3 and
/// the decode/refresh step on T4.
pub(crate) const FETCH_PIP: u64 = (PIP_STEP << 2) | (PIP_STEP << 3) | (1 << (WAIT_SHIFT + 1));

/// Pipeline installed by `init`: as `FETCH_PIP` one T-state in, because the
/// initial fetch pins are driven by `init` itself rather than by a tick.
pub(crate) const INIT_PIP: u64 = (PIP_STEP << 1) | (PIP_STEP << 2) | PIP_WAIT;

/// Pipeline installed by `prefetch`: run the overlap of a NOP on the next
/// tick, which starts an opcode fetch at the new PC.
pub(crate) const PREFETCH_PIP: u64 = PIP_STEP;

/// Index-displacement preamble: fetch `d`, burn five internal T-states, then
/// re-enter the decode of the remapped opcode.
pub(crate) const DISP_PIP: u64 =
    (PIP_STEP << 1) | (PIP_STEP << 2) | (PIP_STEP << 8) | (1 << (WAIT_SHIFT + 2));

/// `LD (IX+d),n`: the immediate overlaps the displacement's internal
/// T-states, so it gets its own schedule instead of the generic preamble.
pub(crate) const DISP_IMM_PIP: u64 = pip(&[Mr, Mr, In(2), Mw]);

/// `DD CB` / `FD CB` preamble: displacement and sub-opcode are plain memory
/// reads (no M1, no refresh).
pub(crate) const DDCB_PIP: u64 = pip_ddcb_preamble();

const fn pip_ddcb_preamble() -> u64 {
    // d read at +1/+2, sub-opcode read at +4/+5; the continuation is
    // installed by the sub-opcode latch step once the operation is known.
    (PIP_STEP << 1)
        | (PIP_STEP << 2)
        | (PIP_STEP << 4)
        | (PIP_STEP << 5)
        | (1 << (WAIT_SHIFT + 2))
        | (1 << (WAIT_SHIFT + 5))
}

/// `DD CB` continuation for read-modify-write forms: operand read (4T),
/// write-back (3T), overlap. Relative to the sub-opcode latch T-state.
pub(crate) const DDCB_RMW_PIP: u64 = (PIP_STEP << 4)
    | (PIP_STEP << 5)
    | (PIP_STEP << 9)
    | (PIP_STEP << 11)
    | (1 << (WAIT_SHIFT + 5))
    | (1 << (WAIT_SHIFT + 9));

/// `DD CB` continuation for BIT: operand read (4T), overlap.
pub(crate) const DDCB_BIT_PIP: u64 =
    (PIP_STEP << 4) | (PIP_STEP << 5) | (PIP_STEP << 8) | (1 << (WAIT_SHIFT + 5));

/// Maskable interrupt acknowledge cycle: M1|IORQ on the ack T-state, vector
/// latch two T-states later, refresh and mode dispatch on the last.
pub(crate) const INT_ACK_PIP: u64 =
    (PIP_STEP << 2) | (PIP_STEP << 4) | (PIP_STEP << 5) | (1 << (WAIT_SHIFT + 3));

/// IM 2 continuation after the acknowledge cycle: push PC, read the 16-bit
/// vector from the interrupt table, jump.
pub(crate) const IM2_PIP: u64 = pip(&[In(1), Mw, Mw, Mr, Mr]);

/// Non-maskable interrupt accept: a 5T discarded fetch (wait-sampled, with
/// its refresh T-state), then push PC and jump to 0x0066.
pub(crate) const NMI_PIP: u64 = (PIP_STEP << 3)
    | (PIP_STEP << 6)
    | (PIP_STEP << 9)
    | (PIP_STEP << 11)
    | (1 << (WAIT_SHIFT + 1))
    | (1 << (WAIT_SHIFT + 6))
    | (1 << (WAIT_SHIFT + 9));

/// Main (unprefixed) opcode table.
pub(crate) static MAIN: [u64; 256] = build_main();

/// CB-prefixed opcode table.
pub(crate) static CB: [u64; 256] = build_cb();

/// ED-prefixed opcode table. Unused entries decode as NOP.
pub(crate) static ED: [u64; 256] = build_ed();

/// True if a main-table opcode addresses memory through (HL), which under a
/// DD/FD prefix becomes (IX+d)/(IY+d) with a displacement fetch.
pub(crate) const fn uses_hl_mem(op: u8) -> bool {
    let x = op >> 6;
    let y = (op >> 3) & 7;
    let z = op & 7;
    match x {
        // INC (HL), DEC (HL), LD (HL),n
        0 => y == 6 && (z == 4 || z == 5 || z == 6),
        // LD r,(HL) / LD (HL),r, but HALT is not a memory access
        1 => (z == 6 || y == 6) && op != 0x76,
        // ALU A,(HL)
        2 => z == 6,
        _ => false,
    }
}

const fn build_main() -> [u64; 256] {
    let mut table = [0u64; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = main_pip(i as u8);
        i += 1;
    }
    table
}

#[allow(clippy::too_many_lines)]
const fn main_pip(op: u8) -> u64 {
    let y = (op >> 3) & 7;
    let z = op & 7;
    match op {
        // ld rr,nn (M:3 T:10)
        0x01 | 0x11 | 0x21 | 0x31 => pip(&[Mr, Mr]),
        // ld (bc),a / ld (de),a (M:2 T:7)
        0x02 | 0x12 => pip(&[Mw]),
        // inc rr / dec rr / ld sp,hl (M:2 T:6)
        0x03 | 0x13 | 0x23 | 0x33 | 0x0B | 0x1B | 0x2B | 0x3B | 0xF9 => pip(&[In(2)]),
        // add hl,rr (M:2 T:11)
        0x09 | 0x19 | 0x29 | 0x39 => pip(&[In(7)]),
        // ld a,(bc) / ld a,(de) (M:2 T:7)
        0x0A | 0x1A => pip(&[Mr]),
        // djnz d (M:3/4 T:8/13)
        0x10 => pip(&[In(1), Mr, In(5)]),
        // jr d (M:3 T:12)
        0x18 => pip(&[Mr, In(5)]),
        // jr cc,d (M:2/3 T:7/12)
        0x20 | 0x28 | 0x30 | 0x38 => pip(&[Mr, In(5)]),
        // ld (nn),hl (M:5 T:16)
        0x22 => pip(&[Mr, Mr, Mw, Mw]),
        // ld hl,(nn) (M:5 T:16)
        0x2A => pip(&[Mr, Mr, Mr, Mr]),
        // ld (nn),a (M:4 T:13)
        0x32 => pip(&[Mr, Mr, Mw]),
        // ld a,(nn) (M:4 T:13)
        0x3A => pip(&[Mr, Mr, Mr]),
        // inc (hl) / dec (hl) (M:3 T:11)
        0x34 | 0x35 => pip(&[Mr, In(1), Mw]),
        // ld (hl),n (M:3 T:10)
        0x36 => pip(&[Mr, Mw]),
        // ld r,n (M:2 T:7)
        0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x3E => pip(&[Mr]),
        // halt (M:1 T:4)
        0x76 => pip(&[]),
        // ld r,(hl) / ld (hl),r / alu a,(hl) (M:2 T:7)
        0x40..=0xBF if z == 6 => pip(&[Mr]),
        0x40..=0x7F if y == 6 => pip(&[Mw]),
        // ld r,r' / alu a,r (M:1 T:4)
        0x40..=0xBF => pip(&[]),
        // ret cc (M:2/4 T:5/11)
        0xC0 | 0xC8 | 0xD0 | 0xD8 | 0xE0 | 0xE8 | 0xF0 | 0xF8 => pip(&[Act, Mr, Mr]),
        // pop rr / ret (M:3 T:10)
        0xC1 | 0xD1 | 0xE1 | 0xF1 | 0xC9 => pip(&[Mr, Mr]),
        // jp nn / jp cc,nn (M:3 T:10)
        0xC3 | 0xC2 | 0xCA | 0xD2 | 0xDA | 0xE2 | 0xEA | 0xF2 | 0xFA => pip(&[Mr, Mr]),
        // call nn / call cc,nn (M:5 T:10/17)
        0xCD | 0xC4 | 0xCC | 0xD4 | 0xDC | 0xE4 | 0xEC | 0xF4 | 0xFC => {
            pip(&[Mr, Mr, In(1), Mw, Mw])
        }
        // push rr / rst n (M:3 T:11)
        0xC5 | 0xD5 | 0xE5 | 0xF5 | 0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => {
            pip(&[In(1), Mw, Mw])
        }
        // alu a,n (M:2 T:7)
        0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => pip(&[Mr]),
        // out (n),a (M:3 T:11)
        0xD3 => pip(&[Mr, Iow]),
        // in a,(n) (M:3 T:11)
        0xDB => pip(&[Mr, Ior]),
        // ex (sp),hl (M:5 T:19)
        0xE3 => pip(&[Mr, Mr, In(1), Mw, Mw, In(2)]),
        // everything else is a single overlapped M1 (M:1 T:4): nop, rot a,
        // ex af, exx, ex de,hl, daa, cpl, scf, ccf, jp (hl), di, ei and the
        // four prefix bytes
        _ => pip(&[]),
    }
}

const fn build_cb() -> [u64; 256] {
    let mut table = [0u64; 256];
    let mut i = 0;
    while i < 256 {
        let op = i as u8;
        table[i] = if op & 7 == 6 {
            if op >> 6 == 1 {
                // bit n,(hl) (T:12)
                pip(&[Mr, In(1)])
            } else {
                // rot/res/set (hl) (T:15)
                pip(&[Mr, In(1), Mw])
            }
        } else {
            // register forms (T:8)
            pip(&[])
        };
        i += 1;
    }
    table
}

const fn build_ed() -> [u64; 256] {
    let mut table = [0u64; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = ed_pip(i as u8);
        i += 1;
    }
    table
}

const fn ed_pip(op: u8) -> u64 {
    let x = op >> 6;
    let y = (op >> 3) & 7;
    let z = op & 7;
    match x {
        1 => match z {
            // in r,(c) (T:12)
            0 => pip(&[Ior]),
            // out (c),r (T:12)
            1 => pip(&[Iow]),
            // sbc/adc hl,rr (T:15)
            2 => pip(&[In(7)]),
            // ld (nn),rr / ld rr,(nn) (T:20)
            3 => {
                if op & 8 == 0 {
                    pip(&[Mr, Mr, Mw, Mw])
                } else {
                    pip(&[Mr, Mr, Mr, Mr])
                }
            }
            // neg (T:8)
            4 => pip(&[]),
            // retn/reti (T:14)
            5 => pip(&[Mr, Mr]),
            // im n (T:8)
            6 => pip(&[]),
            // ld i,a / ld a,i / ld r,a / ld a,r (T:9), rrd/rld (T:18),
            // two undocumented nops
            _ => match y {
                0..=3 => pip(&[In(1)]),
                4 | 5 => pip(&[Mr, In(4), Mw]),
                _ => pip(&[]),
            },
        },
        2 if z <= 3 && y >= 4 => {
            let repeat = y >= 6;
            match z {
                // ldi/ldd (T:16), ldir/lddr (T:21 repeating)
                0 => {
                    if repeat {
                        pip(&[Mr, Mw, In(7)])
                    } else {
                        pip(&[Mr, Mw, In(2)])
                    }
                }
                // cpi/cpd (T:16), cpir/cpdr (T:21 repeating)
                1 => {
                    if repeat {
                        pip(&[Mr, In(10)])
                    } else {
                        pip(&[Mr, In(5)])
                    }
                }
                // ini/ind (T:16), inir/indr (T:21 repeating)
                2 => {
                    if repeat {
                        pip(&[In(1), Ior, Mw, In(5)])
                    } else {
                        pip(&[In(1), Ior, Mw])
                    }
                }
                // outi/outd (T:16), otir/otdr (T:21 repeating)
                _ => {
                    if repeat {
                        pip(&[In(1), Mr, Iow, In(5)])
                    } else {
                        pip(&[In(1), Mr, Iow])
                    }
                }
            }
        }
        // every unused slot executes as a nop (T:8)
        _ => pip(&[]),
    }
}

#[cfg(test)]
mod tests {
    use super::{uses_hl_mem, CB, ED, MAIN, PIP_STEP, PIP_WAIT};

    /// The overlap T-state offset is the highest enabled step bit; the
    /// instruction's total length is M1 (3 T-states up to the decode step)
    /// plus that offset.
    #[allow(clippy::cast_possible_truncation)]
    fn total_t(pip: u64) -> u32 {
        31 - (pip as u32).leading_zeros() + 3
    }

    #[test]
    fn main_table_matches_documented_timing() {
        let expect: &[(u8, u32)] = &[
            (0x00, 4),  // nop
            (0x01, 10), // ld bc,nn
            (0x02, 7),  // ld (bc),a
            (0x03, 6),  // inc bc
            (0x04, 4),  // inc b
            (0x09, 11), // add hl,bc
            (0x0A, 7),  // ld a,(bc)
            (0x10, 13), // djnz (taken)
            (0x18, 12), // jr
            (0x22, 16), // ld (nn),hl
            (0x2A, 16), // ld hl,(nn)
            (0x32, 13), // ld (nn),a
            (0x34, 11), // inc (hl)
            (0x36, 10), // ld (hl),n
            (0x3E, 7),  // ld a,n
            (0x41, 4),  // ld b,c
            (0x46, 7),  // ld b,(hl)
            (0x70, 7),  // ld (hl),b
            (0x76, 4),  // halt
            (0x86, 7),  // add a,(hl)
            (0xC0, 11), // ret nz (taken)
            (0xC1, 10), // pop bc
            (0xC3, 10), // jp nn
            (0xC5, 11), // push bc
            (0xC6, 7),  // add a,n
            (0xC7, 11), // rst 0
            (0xC9, 10), // ret
            (0xCD, 17), // call nn
            (0xD3, 11), // out (n),a
            (0xDB, 11), // in a,(n)
            (0xE3, 19), // ex (sp),hl
            (0xE9, 4),  // jp (hl)
            (0xF9, 6),  // ld sp,hl
        ];
        for &(op, t) in expect {
            assert_eq!(total_t(MAIN[op as usize]), t, "opcode {op:#04X}");
        }
    }

    #[test]
    fn cb_table_matches_documented_timing() {
        // totals below exclude the CB prefix M1 (4 T-states)
        assert_eq!(total_t(CB[0x00]), 4); // rlc b
        assert_eq!(total_t(CB[0x46]), 8); // bit 0,(hl)
        assert_eq!(total_t(CB[0x06]), 11); // rlc (hl)
        assert_eq!(total_t(CB[0xC6]), 11); // set 0,(hl)
    }

    #[test]
    fn ed_table_matches_documented_timing() {
        // totals below exclude the ED prefix M1 (4 T-states)
        assert_eq!(total_t(ED[0x44]), 4); // neg
        assert_eq!(total_t(ED[0x40]), 8); // in b,(c)
        assert_eq!(total_t(ED[0x41]), 8); // out (c),b
        assert_eq!(total_t(ED[0x42]), 11); // sbc hl,bc
        assert_eq!(total_t(ED[0x43]), 16); // ld (nn),bc
        assert_eq!(total_t(ED[0x45]), 10); // retn
        assert_eq!(total_t(ED[0x57]), 5); // ld a,i
        assert_eq!(total_t(ED[0x67]), 14); // rrd
        assert_eq!(total_t(ED[0xA0]), 12); // ldi
        assert_eq!(total_t(ED[0xB0]), 17); // ldir (repeating)
        assert_eq!(total_t(ED[0xA1]), 12); // cpi
        assert_eq!(total_t(ED[0xA2]), 12); // ini
        assert_eq!(total_t(ED[0xA3]), 12); // outi
        assert_eq!(total_t(ED[0x00]), 4); // unused slot = nop
    }

    #[test]
    #[allow(clippy::cast_possible_truncation)]
    fn every_entry_ends_in_an_overlap() {
        for table in [&MAIN, &CB, &ED] {
            for (op, &word) in table.iter().enumerate() {
                assert!(word as u32 != 0, "opcode {op:#04X} has no steps");
                // wait bits never outlive the last step
                let last_step = 31 - (word as u32).leading_zeros();
                let waits = word >> 32;
                assert!(
                    waits >> (last_step + 1) == 0,
                    "opcode {op:#04X} waits past its overlap"
                );
            }
        }
    }

    #[test]
    fn wait_bits_never_reach_the_step_half() {
        // shifting consumes bit 0 and bit 32 first, so wait bits can never
        // migrate into the step half
        for table in [&MAIN, &CB, &ED] {
            for &word in table.iter() {
                let shifted = (word & !(PIP_STEP | PIP_WAIT)) >> 1;
                assert_eq!(shifted & (1 << 31), 0);
            }
        }
    }

    #[test]
    fn displacement_detection() {
        assert!(uses_hl_mem(0x34)); // inc (hl)
        assert!(uses_hl_mem(0x36)); // ld (hl),n
        assert!(uses_hl_mem(0x46)); // ld b,(hl)
        assert!(uses_hl_mem(0x70)); // ld (hl),b
        assert!(uses_hl_mem(0x86)); // add a,(hl)
        assert!(uses_hl_mem(0xBE)); // cp (hl)
        assert!(!uses_hl_mem(0x76)); // halt
        assert!(!uses_hl_mem(0x21)); // ld hl,nn
        assert!(!uses_hl_mem(0xE9)); // jp (hl)
        assert!(!uses_hl_mem(0x7F)); // ld a,a
    }
}
