//! SID register file and sample sink.
//!
//! Sound synthesis lives outside the core; this sink owns the write-only
//! register file at $D400-$D41C, produces silence-shaped samples at the
//! host rate, and pushes them into an SPSC ring the audio callback
//! drains. Warp mode ramps the output volume down on entry and back up
//! on exit so engaging warp never pops.

#![allow(clippy::cast_possible_truncation)]

use ringbuf::traits::{Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

/// Ring capacity: ~250 ms at 48 kHz.
const RING_CAPACITY: usize = 12_288;

/// Volume ramp step per sample (about 10 ms for a full swing).
const RAMP_STEP: f32 = 1.0 / 480.0;

/// The SID seen from the bus: 29 registers, last write visible on the
/// read-back of the write-only area.
pub struct SidSink {
    registers: [u8; 0x20],
    /// Most recent value on the data bus (write-only registers read it
    /// back for a while on real hardware).
    last_written: u8,

    cpu_frequency: u64,
    sample_rate: u32,
    /// Fractional sample accumulator (cycles × rate).
    sample_acc: u64,

    /// Current and target output volume (0-1), for warp ramping.
    volume: f32,
    target_volume: f32,

    producer: HeapProd<f32>,
    consumer: Option<HeapCons<f32>>,
}

impl SidSink {
    #[must_use]
    pub fn new(cpu_frequency: u64, sample_rate: u32) -> Self {
        let (producer, consumer) = HeapRb::<f32>::new(RING_CAPACITY).split();
        Self {
            registers: [0; 0x20],
            last_written: 0,
            cpu_frequency,
            sample_rate,
            sample_acc: 0,
            volume: 1.0,
            target_volume: 1.0,
            producer,
            consumer: Some(consumer),
        }
    }

    /// Hand out the audio consumer endpoint. Callable once.
    pub fn take_consumer(&mut self) -> Option<HeapCons<f32>> {
        self.consumer.take()
    }

    /// Read a SID register. Only $19-$1C (pots, oscillator, envelope)
    /// return live values; the rest read back the bus.
    #[must_use]
    pub fn read(&self, reg: u8) -> u8 {
        match reg & 0x1F {
            0x19 | 0x1A => 0xFF, // Pot X/Y: no paddles
            0x1B => 0x00,        // OSC3 readback (synthesis external)
            0x1C => 0x00,        // ENV3 readback
            _ => self.last_written,
        }
    }

    /// Write a SID register.
    pub fn write(&mut self, reg: u8, value: u8) {
        self.registers[(reg & 0x1F) as usize] = value;
        self.last_written = value;
    }

    /// Register file for the external synthesizer.
    #[must_use]
    pub fn registers(&self) -> &[u8; 0x20] {
        &self.registers
    }

    /// Master volume nibble ($D418).
    #[must_use]
    pub fn master_volume(&self) -> u8 {
        self.registers[0x18] & 0x0F
    }

    /// Ramp the output down (warp entry).
    pub fn ramp_down(&mut self) {
        self.target_volume = 0.0;
    }

    /// Ramp the output back up (warp exit).
    pub fn ramp_up(&mut self) {
        self.target_volume = 1.0;
    }

    #[must_use]
    pub fn current_volume(&self) -> f32 {
        self.volume
    }

    /// Advance by one CPU cycle, emitting samples at the host rate.
    pub fn execute_cycle(&mut self) {
        self.sample_acc += u64::from(self.sample_rate);
        while self.sample_acc >= self.cpu_frequency {
            self.sample_acc -= self.cpu_frequency;
            self.emit_sample();
        }
    }

    fn emit_sample(&mut self) {
        if (self.volume - self.target_volume).abs() < RAMP_STEP {
            self.volume = self.target_volume;
        } else if self.volume < self.target_volume {
            self.volume += RAMP_STEP;
        } else {
            self.volume -= RAMP_STEP;
        }
        // Without a synthesizer the sink still renders the master-volume
        // DC level (the "digi" trick) under the warp envelope.
        let dc = f32::from(self.master_volume()) / 15.0 * 0.05;
        let _ = self.producer.try_push(dc * self.volume);
    }

    pub fn reset(&mut self) {
        self.registers = [0; 0x20];
        self.last_written = 0;
        self.sample_acc = 0;
    }
}
