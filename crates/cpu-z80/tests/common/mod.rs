//! Shared test harness: a minimal host that services the pin bus.

#![allow(dead_code)] // Not every test file uses every helper.

use std::collections::HashMap;

use cpu_z80::{pins, Pins, Z80};
use emu_core::Memory;

/// A CPU wired to 64 KB of RAM and a recording I/O port map, driven one
/// T-state at a time exactly the way a real host would: service the
/// strobes from the previous tick, update the input pins, tick again.
pub struct System {
    pub cpu: Z80,
    pub mem: Memory,
    pub bus: Pins,
    /// Values returned for I/O reads, keyed by full 16-bit port address.
    pub io_in: HashMap<u16, u8>,
    /// Every I/O write observed, in order.
    pub io_out: Vec<(u16, u8)>,
    /// Byte a device drives during an interrupt acknowledge cycle.
    pub int_vector: u8,
    /// The exact pin word fed into the most recent `Z80::tick`.
    pub last_input: Pins,
    /// Input pin levels the host asserts before each tick.
    pub int_level: bool,
    pub nmi_level: bool,
    pub wait_level: bool,
    pub res_level: bool,
}

impl System {
    pub fn new(program: &[u8]) -> Self {
        let mut mem = Memory::new();
        mem.load(0x0000, program);
        let mut cpu = Z80::new();
        let bus = cpu.init();
        Self {
            cpu,
            mem,
            bus,
            io_in: HashMap::new(),
            io_out: Vec::new(),
            int_vector: 0xFF,
            last_input: bus,
            int_level: false,
            nmi_level: false,
            wait_level: false,
            res_level: false,
        }
    }

    /// Perform the bus transaction the last tick requested.
    fn service(&mut self) {
        if self.bus.test(pins::MREQ | pins::RD) {
            let data = self.mem.read(self.bus.addr());
            self.bus = self.bus.with_data(data);
        } else if self.bus.test(pins::MREQ | pins::WR) {
            self.mem.write(self.bus.addr(), self.bus.data());
        } else if self.bus.test(pins::IORQ | pins::RD) {
            let data = self.io_in.get(&self.bus.addr()).copied().unwrap_or(0xFF);
            self.bus = self.bus.with_data(data);
        } else if self.bus.test(pins::IORQ | pins::WR) {
            self.io_out.push((self.bus.addr(), self.bus.data()));
        } else if self.bus.test(pins::M1 | pins::IORQ) {
            // interrupt acknowledge: the device drives its vector
            self.bus = self.bus.with_data(self.int_vector);
        }
    }

    fn apply_levels(&mut self) {
        for (level, pin) in [
            (self.int_level, pins::INT),
            (self.nmi_level, pins::NMI),
            (self.wait_level, pins::WAIT),
            (self.res_level, pins::RES),
        ] {
            self.bus = if level { self.bus.set(pin) } else { self.bus.clear(pin) };
        }
    }

    /// One T-state: service, apply input levels, tick.
    pub fn tick(&mut self) {
        self.service();
        self.apply_levels();
        self.last_input = self.bus;
        self.bus = self.cpu.tick(self.bus);
    }

    /// Run to the end of the current instruction and return how many
    /// T-states it took (interrupt accept sequences count toward the
    /// instruction that sampled them).
    pub fn step_instr(&mut self) -> u32 {
        let mut n = 0;
        loop {
            self.tick();
            n += 1;
            if !self.cpu.opdone() {
                break;
            }
        }
        while !self.cpu.opdone() {
            self.tick();
            n += 1;
        }
        n
    }

    /// Run whole instructions until the CPU halts (or the tick budget runs
    /// out). Returns total T-states.
    pub fn run_until_halt(&mut self, max_ticks: u32) -> u32 {
        let mut n = 0;
        while !self.cpu.regs.halted && n < max_ticks {
            self.tick();
            n += 1;
        }
        assert!(self.cpu.regs.halted, "program did not halt in {max_ticks} ticks");
        n
    }
}
