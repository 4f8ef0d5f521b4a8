//! Turns a register-visibility map into a minimal sequence of FPRD frames and round-robins
//! through them (spec §4.3).
//!
//! Reconfiguration ([`RegisterScheduler::change_register_settings`]) is thread-safe against an
//! ongoing round-robin: the current schedule is held behind a mutex-guarded [`Arc`], so an
//! in-flight [`FrameBatch`] that already cloned the old `Arc` keeps it alive and valid even after
//! a newer schedule is published.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::frame::{
    CommandType, EtherCatFrame, EtherCatFrameList, FrameHeader, PduFlags, PduHeader, MAX_TOTAL_PDU_LENGTH,
    PDU_OVERHEAD,
};
use crate::register::RegisterAddress;

/// Bytes consumed by the 2-byte [`FrameHeader`] preceding the PDU area; offsets recorded in
/// [`ScheduledRegister`] are relative to the start of the full on-wire frame, including this.
const FRAME_HEADER_LEN: usize = 2;

/// A slave's configured station address and which registers are currently enabled on it.
#[derive(Debug, Clone)]
pub struct SlaveRegisterMap {
    /// The slave's configured station address (used as the FPRD target address).
    pub slave_address: u16,
    /// Registers to sample on this slave. Order does not matter; addresses are coalesced.
    pub registers: Vec<RegisterAddress>,
}

/// Where one register's freshly-sampled bytes and working counter land within a scheduled frame,
/// so the bus reader can extract them without re-walking the frame's PDU structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledRegister {
    /// The register this metadata describes.
    pub register: RegisterAddress,
    /// The slave it was sampled from.
    pub slave_address: u16,
    /// Which frame in the schedule carries this register.
    pub frame_index: usize,
    /// Frame-relative byte offset (including the 2-byte frame header) of this register's data.
    pub data_offset: usize,
    /// Frame-relative byte offset of the owning PDU's working counter.
    pub wkc_offset: usize,
}

/// A fully built frame set plus the offset metadata needed to read every enabled register back
/// out of it.
#[derive(Debug, Clone, Default)]
pub struct ScheduleResult {
    /// The frames to cycle through, round-robin.
    pub frames: EtherCatFrameList,
    /// Offset metadata for every enabled register, across all frames.
    pub registers: Vec<ScheduledRegister>,
}

#[derive(Debug, Clone, Copy)]
struct Interval {
    start: u16,
    len: u16,
}

/// Merge `addresses` into maximal runs, starting a new run whenever the gap to the next address
/// would waste more bytes than opening a new PDU costs (spec §4.3 steps 1-2).
fn coalesce_addresses(addresses: &BTreeSet<u16>) -> Vec<Interval> {
    let mut intervals = Vec::new();
    let mut iter = addresses.iter().copied().peekable();

    while let Some(start) = iter.next() {
        let mut end = start;

        while let Some(&next) = iter.peek() {
            let gap = usize::from(next.saturating_sub(end)) - 1;

            if gap <= PDU_OVERHEAD {
                end = next;
                iter.next();
            } else {
                break;
            }
        }

        intervals.push(Interval {
            start,
            len: end - start + 1,
        });
    }

    intervals
}

fn finish_frame(pdu_area: &mut Vec<u8>) -> EtherCatFrame {
    let header = FrameHeader::pdu(pdu_area.len() as u16);

    EtherCatFrame {
        header,
        pdu_area: std::mem::take(pdu_area),
        data_offsets: Vec::new(),
        wkc_offsets: Vec::new(),
    }
}

/// Build a [`ScheduleResult`] for the given per-slave register maps (spec §4.3 steps 1-4).
pub fn schedule(slaves: &[SlaveRegisterMap]) -> ScheduleResult {
    let mut frames = Vec::new();
    let mut registers = Vec::new();
    let mut pdu_area: Vec<u8> = Vec::new();

    for slave in slaves {
        let mut addresses = BTreeSet::new();
        let mut register_starts: HashMap<u16, RegisterAddress> = HashMap::new();

        for &register in &slave.registers {
            register_starts.insert(u16::from(register), register);

            for addr in register.byte_addresses() {
                addresses.insert(addr);
            }
        }

        for interval in coalesce_addresses(&addresses) {
            let pdu_len = PDU_OVERHEAD + usize::from(interval.len);

            if !pdu_area.is_empty() && pdu_area.len() + pdu_len > MAX_TOTAL_PDU_LENGTH {
                frames.push(finish_frame(&mut pdu_area));
            }

            let pdu_start = pdu_area.len();
            let header = PduHeader {
                command: CommandType::Fprd,
                index: 0xFF,
                slave_address: slave.slave_address,
                register_address: interval.start,
                flags: PduFlags::with_len(interval.len),
                external_event: 0,
            };

            let mut pdu_bytes = vec![0u8; pdu_len];
            header.pack_to_slice_unchecked(&mut pdu_bytes[0..10]);
            pdu_area.extend_from_slice(&pdu_bytes);

            let data_start_in_area = pdu_start + 10;
            let wkc_start_in_area = pdu_start + 10 + usize::from(interval.len);

            for (&addr, &register) in register_starts.iter() {
                if addr >= interval.start && addr < interval.start + interval.len {
                    let offset_within_interval = usize::from(addr - interval.start);

                    registers.push(ScheduledRegister {
                        register,
                        slave_address: slave.slave_address,
                        frame_index: frames.len(),
                        data_offset: FRAME_HEADER_LEN + data_start_in_area + offset_within_interval,
                        wkc_offset: FRAME_HEADER_LEN + wkc_start_in_area,
                    });
                }
            }
        }
    }

    if !pdu_area.is_empty() {
        frames.push(finish_frame(&mut pdu_area));
    }

    ScheduleResult {
        frames: EtherCatFrameList::new(frames),
        registers,
    }
}

/// A snapshot of `n` consecutive frames starting at some round-robin position, borrowed out of
/// the [`ScheduleResult`] that was current when it was requested.
pub struct FrameBatch {
    schedule: Arc<ScheduleResult>,
    start: usize,
    count: usize,
}

impl FrameBatch {
    /// Iterate over the frames in this batch, in round-robin order.
    pub fn frames(&self) -> impl Iterator<Item = (usize, &EtherCatFrame)> {
        self.schedule.frames.next_frames(self.start, self.count)
    }

    /// The schedule this batch was drawn from (kept alive for as long as the batch is).
    pub fn schedule(&self) -> &ScheduleResult {
        &self.schedule
    }
}

/// Packs enabled registers into frames and round-robins through them for the bus reader,
/// reconfigurable at runtime without invalidating an in-flight [`FrameBatch`].
pub struct RegisterScheduler {
    current: Mutex<Arc<ScheduleResult>>,
    position: AtomicUsize,
    completed_loop: AtomicBool,
}

impl RegisterScheduler {
    /// Build a scheduler for the given initial register visibility.
    pub fn new(slaves: &[SlaveRegisterMap]) -> Self {
        Self {
            current: Mutex::new(Arc::new(schedule(slaves))),
            position: AtomicUsize::new(0),
            completed_loop: AtomicBool::new(false),
        }
    }

    /// Publish a new schedule computed from `slaves`. The previous schedule is kept alive by any
    /// [`FrameBatch`] that already holds an `Arc` to it.
    pub fn change_register_settings(&self, slaves: &[SlaveRegisterMap]) {
        let new_schedule = Arc::new(schedule(slaves));
        *self.current.lock().expect("register scheduler mutex poisoned") = new_schedule;
    }

    /// Return the next `n` consecutive frames in round-robin order (spec §4.3 `getNextFrames`).
    pub fn get_next_frames(&self, n: usize) -> FrameBatch {
        let current = self.current.lock().expect("register scheduler mutex poisoned").clone();
        let len = current.frames.len();

        if len == 0 {
            self.completed_loop.store(false, Ordering::Release);

            return FrameBatch {
                schedule: current,
                start: 0,
                count: 0,
            };
        }

        let start = self.position.load(Ordering::Acquire) % len;
        let end = (start + n) % len;

        self.position.store(end, Ordering::Release);
        self.completed_loop.store(n > 0 && end == 0, Ordering::Release);

        FrameBatch {
            schedule: current,
            start,
            count: n,
        }
    }

    /// Whether the most recent [`Self::get_next_frames`] call brought the round-robin position
    /// back to index 0, signalling that every register has been sampled at least once since.
    pub fn has_completed_loop(&self) -> bool {
        self.completed_loop.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_register_produces_one_frame_of_16_bytes() {
        let result = schedule(&[SlaveRegisterMap {
            slave_address: 0x3468,
            registers: vec![RegisterAddress::Build],
        }]);

        assert_eq!(result.frames.len(), 1);

        let frame = result.frames.get(0).unwrap();
        let mut wire = Vec::new();
        wire.extend_from_slice(&frame.header.pack());
        wire.extend_from_slice(&frame.pdu_area);

        assert_eq!(wire.len(), 16);
        assert_eq!(
            &wire[2..16],
            &[0x04, 0xff, 0x68, 0x34, 0x02, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn disjoint_registers_produce_one_frame_with_two_pdus() {
        let result = schedule(&[SlaveRegisterMap {
            slave_address: 0x3468,
            registers: vec![RegisterAddress::RamSize, RegisterAddress::FrameErrorCounterPort1],
        }]);

        assert_eq!(result.frames.len(), 1);

        let frame = result.frames.get(0).unwrap();
        let total_len = 2 + frame.pdu_area.len();
        assert_eq!(total_len, 28);

        let ram_size = result
            .registers
            .iter()
            .find(|r| r.register == RegisterAddress::RamSize)
            .unwrap();
        let frame_err = result
            .registers
            .iter()
            .find(|r| r.register == RegisterAddress::FrameErrorCounterPort1)
            .unwrap();

        assert_eq!(ram_size.data_offset, 12);
        assert_eq!(ram_size.wkc_offset, 13);
        assert_eq!(frame_err.data_offset, 25);
        assert_eq!(frame_err.wkc_offset, 26);
    }

    #[test]
    fn round_robin_reports_loop_completion() {
        let scheduler = RegisterScheduler::new(&[SlaveRegisterMap {
            slave_address: 0x3468,
            registers: vec![RegisterAddress::RamSize, RegisterAddress::FrameErrorCounterPort1],
        }]);

        // Two disjoint registers -> one frame still, since they share a slave's single frame.
        let batch = scheduler.get_next_frames(1);
        assert_eq!(batch.frames().count(), 1);
        assert!(scheduler.has_completed_loop());
    }

    #[test]
    fn reconfiguring_keeps_in_flight_batch_valid() {
        let scheduler = RegisterScheduler::new(&[SlaveRegisterMap {
            slave_address: 0x3468,
            registers: vec![RegisterAddress::Build],
        }]);

        let batch = scheduler.get_next_frames(1);

        scheduler.change_register_settings(&[SlaveRegisterMap {
            slave_address: 0x3469,
            registers: vec![RegisterAddress::RamSize],
        }]);

        // The old batch still reflects the schedule it was drawn from.
        let frame = batch.frames().next().unwrap().1;
        assert_eq!(&frame.pdu_area[2..4], &[0x68, 0x34]);
    }
}
