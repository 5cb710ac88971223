//! Pin-level, tick-driven Zilog Z80 CPU core.
//!
//! Each call to [`Z80::tick`] advances exactly one T-state. The CPU's whole
//! connection to the outside world is the 40-pin bus word it takes and
//! returns: the host reads the control strobes, performs the memory or I/O
//! transaction they request, places read data on the data-bus bits, drives
//! WAIT/INT/NMI/RES as its hardware would, and ticks again. Surrounding
//! chips that share the bus word observe every read, write, refresh and
//! interrupt-acknowledge cycle in hardware order.
//!
//! ```
//! use cpu_z80::{pins, Pins, Z80};
//! use emu_core::Memory;
//!
//! let mut mem = Memory::new();
//! mem.load(0x0000, &[0x01, 0x34, 0x12]); // LD BC,0x1234
//!
//! let mut cpu = Z80::new();
//! let mut bus = cpu.pins();
//! for _ in 0..10 {
//!     // service the strobes from the previous T-state
//!     if bus.test(pins::MREQ | pins::RD) {
//!         bus = bus.with_data(mem.read(bus.addr()));
//!     } else if bus.test(pins::MREQ | pins::WR) {
//!         mem.write(bus.addr(), bus.data());
//!     }
//!     bus = cpu.tick(bus);
//! }
//! assert_eq!(cpu.regs.bc(), 0x1234);
//! ```

mod alu;
mod cpu;
mod decode;
mod flags;
pub mod pins;
mod registers;

pub use cpu::Z80;
pub use flags::{CF, HF, NF, PF, SF, XF, YF, ZF};
pub use pins::Pins;
pub use registers::Registers;
