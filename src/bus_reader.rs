//! The two realtime-adjacent threads at the heart of the bus subsystem (spec §4.5): a producer
//! that cycles process data and scheduled register frames through the link layer and publishes
//! them into [`crate::triple_buffer`] slots, and a consumer that drains those slots into
//! [`crate::search_list::SearchList`] history.
//!
//! The adaptive cycle-time control (`regs_per_round`) is split out as a pure function,
//! [`adjust_regs_per_round`], so its tuning can be exercised without a real link layer or clock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use etherkitten_wire::{EtherCatWire, EtherCatWireSized};

use crate::bus_info::BitRange;
use crate::data_object::{AbstractDataPoint, CoEObject, Register};
use crate::data_types::EtherCATDataType;
use crate::error::{ErrorMessage, ErrorSeverity};
use crate::frame::{CommandType, FrameHeader, PduFlags, PduHeader};
use crate::link_layer::{LinkLayer, SlaveState};
use crate::message_queue::{ClientRequest, RealtimeQueueHandle};
use crate::register::RegisterAddress;
use crate::scheduler::RegisterScheduler;
use crate::search_list::SearchList;
use crate::time::TimeStamp;
use crate::triple_buffer::{self, Consumer, Producer};

/// Register frame cells delivered per publish; one generation can carry up to this many scheduled
/// frames' worth of register samples.
pub const FRAMES_PER_BATCH: usize = 8;

/// One cycle's captured process image.
#[derive(Clone)]
pub struct IoMapSample {
    pub bytes: Vec<u8>,
    pub time: TimeStamp,
}

/// One scheduled frame's raw reply bytes and metadata, captured for the consumer to unpack.
#[derive(Clone)]
pub struct RegisterFrameSample {
    pub frame_index: usize,
    pub raw: Vec<u8>,
    pub wkc: u16,
    pub completed_loop: bool,
    pub time: TimeStamp,
}

/// Tuning for the producer's cyclic loop (spec §4.5).
#[derive(Debug, Clone, Copy)]
pub struct RealtimeConfig {
    pub desired_pdo_time_step: Duration,
    pub expected_wkc: u16,
    pub max_regs_per_round: usize,
    pub max_bus_mode_change_attempts: u32,
}

/// A bus-mode change requested by a client, picked up by the producer once per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusModeRequest {
    None,
    Op,
    SafeOp,
}

impl From<u8> for BusModeRequest {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Op,
            2 => Self::SafeOp,
            _ => Self::None,
        }
    }
}

impl From<BusModeRequest> for u8 {
    fn from(value: BusModeRequest) -> Self {
        match value {
            BusModeRequest::None => 0,
            BusModeRequest::Op => 1,
            BusModeRequest::SafeOp => 2,
        }
    }
}

/// Build a single-PDU FPWR frame zeroing `register` on `slave_address`.
fn build_fpwr_frame(slave_address: u16, register: RegisterAddress) -> Vec<u8> {
    let byte_len = register.byte_len() as u16;
    let header = PduHeader {
        command: CommandType::Fpwr,
        index: 0xFF,
        slave_address,
        register_address: u16::from(register),
        flags: PduFlags::with_len(byte_len),
        external_event: 0,
    };

    let mut pdu_area = vec![0u8; 10 + byte_len as usize + 2];
    header.pack_to_slice_unchecked(&mut pdu_area[0..10]);

    let mut wire = Vec::new();
    wire.extend_from_slice(&FrameHeader::pdu(pdu_area.len() as u16).pack());
    wire.extend_from_slice(&pdu_area);
    wire
}

/// Decide the next cycle's register workload from how long the last cycle took (spec §4.5's
/// adaptive `regs_per_round` knob): shrink it if the cycle overran, grow it while there's slack,
/// otherwise hold. This never changes how much process data is sent — only how many extra
/// register PDUs ride along.
pub fn adjust_regs_per_round(elapsed: Duration, desired: Duration, current: usize, max: usize) -> usize {
    if elapsed > desired {
        current.saturating_sub(1).max(1)
    } else if elapsed < desired.mul_f64(0.7) {
        (current + 1).min(max.max(1))
    } else {
        current
    }
}

/// Shared state the client-facing `Reader` toggles to request a bus-mode change or a full stop;
/// the producer thread polls it at most once per cycle.
#[derive(Default)]
pub struct RealtimeControl {
    halt: AtomicBool,
    bus_mode_request: AtomicU8,
}

impl RealtimeControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_halt(&self) {
        self.halt.store(true, Ordering::Release);
    }

    pub fn should_halt(&self) -> bool {
        self.halt.load(Ordering::Acquire)
    }

    pub fn request_bus_mode(&self, request: BusModeRequest) {
        self.bus_mode_request.store(request.into(), Ordering::Release);
    }

    fn take_bus_mode_request(&self) -> BusModeRequest {
        BusModeRequest::from(self.bus_mode_request.swap(0, Ordering::AcqRel))
    }
}

/// Drives `link` through one realtime cycle: process data, client requests, scheduled register
/// frames, and publication into the triple-buffer producers. Generic over [`LinkLayer`] so it can
/// run against [`crate::link_layer::mock::MockLinkLayer`] in tests exactly as it would against a
/// raw socket.
pub struct RealtimeProducer<L: LinkLayer> {
    link: L,
    scheduler: Arc<RegisterScheduler>,
    queue: RealtimeQueueHandle,
    coe_cache_publish: Box<dyn Fn(CoEObject, AbstractDataPoint) + Send>,
    control: Arc<RealtimeControl>,
    config: RealtimeConfig,
    regs_per_round: usize,
    slave_count: u32,
    io_map: Vec<u8>,
    io_map_producer: Producer<IoMapSample, 1>,
    frame_producer: Producer<RegisterFrameSample, FRAMES_PER_BATCH>,
}

impl<L: LinkLayer> RealtimeProducer<L> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        link: L,
        scheduler: Arc<RegisterScheduler>,
        queue: RealtimeQueueHandle,
        coe_cache_publish: Box<dyn Fn(CoEObject, AbstractDataPoint) + Send>,
        control: Arc<RealtimeControl>,
        config: RealtimeConfig,
        slave_count: u32,
        io_map_size: usize,
        io_map_producer: Producer<IoMapSample, 1>,
        frame_producer: Producer<RegisterFrameSample, FRAMES_PER_BATCH>,
    ) -> Self {
        Self {
            link,
            scheduler,
            queue,
            coe_cache_publish,
            control,
            config,
            regs_per_round: 1,
            slave_count,
            io_map: vec![0u8; io_map_size],
            io_map_producer,
            frame_producer,
        }
    }

    fn handle_requests(&mut self, now: TimeStamp) {
        let mut handled_coe = false;
        let mut handled_pdo = false;
        let mut handled_reset = false;

        for request in self.queue.drain_requests() {
            match request {
                ClientRequest::CoEUpdate(update) if !handled_coe => {
                    handled_coe = true;

                    if update.is_read {
                        let mut buf = [0u8; 8];
                        match self.link.sdo_read(
                            update.object.slave,
                            update.object.index,
                            update.object.sub_index,
                            &mut buf,
                        ) {
                            Ok(len) => {
                                let value = buf[..len]
                                    .iter()
                                    .rev()
                                    .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
                                (self.coe_cache_publish)(
                                    update.object,
                                    AbstractDataPoint::Unsigned {
                                        value,
                                        data_type: update.object.data_type,
                                        time: now,
                                    },
                                );
                            }
                            Err(err) => self.queue.publish_error(ErrorMessage::for_slave(
                                format!("CoE read failed: {err}"),
                                update.object.slave,
                                ErrorSeverity::Medium,
                            )),
                        }
                    } else {
                        match self.link.sdo_write(
                            update.object.slave,
                            update.object.index,
                            update.object.sub_index,
                            &update.value,
                        ) {
                            Ok(()) => {
                                let value = update
                                    .value
                                    .iter()
                                    .rev()
                                    .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
                                (self.coe_cache_publish)(
                                    update.object,
                                    AbstractDataPoint::Unsigned {
                                        value,
                                        data_type: update.object.data_type,
                                        time: now,
                                    },
                                );
                            }
                            Err(err) => self.queue.publish_error(ErrorMessage::for_slave(
                                format!("CoE write failed: {err}"),
                                update.object.slave,
                                ErrorSeverity::Medium,
                            )),
                        }
                    }
                }
                ClientRequest::PdoWrite(write) if !handled_pdo => {
                    handled_pdo = true;
                    if let Some(dest) = self.io_map.get_mut(write.byte_offset..write.byte_offset + write.bytes.len()) {
                        if write.bit_offset == 0 {
                            dest.copy_from_slice(&write.bytes);
                        } else {
                            for (d, s) in dest.iter_mut().zip(write.bytes.iter()) {
                                *d = (*d & !(0xFFu8 << write.bit_offset)) | (*s << write.bit_offset);
                            }
                        }
                    }
                }
                ClientRequest::RegisterReset(reset) if !handled_reset => {
                    handled_reset = true;
                    // The error-counter block has a gap (RxErrorCounterPort0..3 then
                    // ForwardedRxErrorCounterPort0..3) that can't be zeroed in one PDU, so this
                    // issues two FPWR PDUs per frame.
                    for register in [RegisterAddress::RxErrorCounterPort0, RegisterAddress::LostLinkCounterPort0] {
                        let wire = build_fpwr_frame(reset.slave_address, register);
                        let _ = self.link.send_and_receive_frame(&wire, Duration::from_micros(100));
                    }
                }
                _ => {}
            }
        }
    }

    fn apply_bus_mode_request(&mut self, attempts: &mut u32) {
        let request = self.control.take_bus_mode_request();
        let target = match request {
            BusModeRequest::None => return,
            BusModeRequest::Op => SlaveState::Op,
            BusModeRequest::SafeOp => SlaveState::SafeOp,
        };

        let mut all_ok = true;
        for slave in 1..=self.slave_count {
            if self.link.set_state(slave, target).is_err() {
                all_ok = false;
            }
        }

        if all_ok {
            *attempts = 0;
        } else {
            *attempts += 1;
            if *attempts >= self.config.max_bus_mode_change_attempts {
                self.queue.publish_error(ErrorMessage::new(
                    format!("bus mode change to {target:?} failed after {attempts} attempts"),
                    ErrorSeverity::Medium,
                ));
            } else {
                self.control.request_bus_mode(request);
            }
        }
    }

    /// Run a single cycle. `now` is the cycle's start timestamp, for sample stamping; `cycle_start`
    /// is a wall-clock [`Instant`] used only to measure `elapsed` for [`adjust_regs_per_round`].
    /// Returns `false` once a halt has been observed and this was the last cycle to run.
    pub fn run_cycle(&mut self, now: TimeStamp, cycle_start: Instant, bus_mode_attempts: &mut u32) -> bool {
        let _ = self.link.send_process_data();
        let wkc = self.link.receive_process_data(Duration::from_micros(100)).unwrap_or(0);

        if wkc >= self.config.expected_wkc {
            self.io_map_producer.write()[0] = Some(IoMapSample {
                bytes: self.io_map.clone(),
                time: now,
            });
            self.io_map_producer.swap();
        }

        self.handle_requests(now);

        let batch = self.scheduler.get_next_frames(self.regs_per_round);
        let cells = self.frame_producer.write();
        for cell in cells.iter_mut() {
            *cell = None;
        }
        for (slot, (frame_index, frame)) in cells.iter_mut().zip(batch.frames()) {
            let mut wire = Vec::new();
            wire.extend_from_slice(&frame.header.pack());
            wire.extend_from_slice(&frame.pdu_area);

            let (wkc, reply) = self
                .link
                .send_and_receive_frame(&wire, Duration::from_micros(100))
                .unwrap_or((0, wire));

            *slot = Some(RegisterFrameSample {
                frame_index,
                raw: reply,
                wkc,
                completed_loop: self.scheduler.has_completed_loop(),
                time: now,
            });
        }
        self.frame_producer.swap();

        let halted = self.control.should_halt();
        if !halted {
            self.apply_bus_mode_request(bus_mode_attempts);
        }

        let elapsed = cycle_start.elapsed();
        self.regs_per_round = adjust_regs_per_round(
            elapsed,
            self.config.desired_pdo_time_step,
            self.regs_per_round,
            self.config.max_regs_per_round,
        );

        !halted
    }

    /// Run cycles until [`RealtimeControl::request_halt`] is observed. Intended for the real
    /// production thread; tests drive [`Self::run_cycle`] directly instead.
    pub fn run(&mut self, start_time: TimeStamp) {
        let mut bus_mode_attempts = 0;
        let loop_start = Instant::now();

        loop {
            let cycle_start = Instant::now();
            let now = start_time.saturating_add(loop_start.elapsed().into());

            if !self.run_cycle(now, cycle_start, &mut bus_mode_attempts) {
                break;
            }

            let elapsed = cycle_start.elapsed();
            if elapsed < self.config.desired_pdo_time_step {
                std::thread::sleep(self.config.desired_pdo_time_step - elapsed);
            }
        }
    }
}

/// Spawn the producer loop on its own thread, pinned to CPU 0 at SCHED_FIFO priority 49 on Linux
/// when available; falls back to a plain thread elsewhere or if privileges are insufficient.
#[cfg(target_os = "linux")]
pub fn spawn_producer<L: LinkLayer + Send + 'static>(
    mut producer: RealtimeProducer<L>,
    start_time: TimeStamp,
) -> std::thread::JoinHandle<()> {
    use thread_priority::{RealtimeThreadSchedulePolicy, ThreadPriority, ThreadPriorityValue, ThreadSchedulePolicy};

    thread_priority::ThreadBuilder::default()
        .name("etherkitten-realtime")
        .priority(ThreadPriority::Crossplatform(
            ThreadPriorityValue::try_from(49u8).unwrap_or(ThreadPriorityValue::try_from(1u8).unwrap()),
        ))
        .policy(ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo))
        .spawn(move |_| {
            let mut cpu_set = rustix::process::CpuSet::new();
            cpu_set.set(0);
            let _ = rustix::process::sched_setaffinity(None, &cpu_set);

            producer.run(start_time);
        })
        .unwrap_or_else(|_| std::thread::spawn(move || producer.run(start_time)))
}

#[cfg(not(target_os = "linux"))]
pub fn spawn_producer<L: LinkLayer + Send + 'static>(
    mut producer: RealtimeProducer<L>,
    start_time: TimeStamp,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || producer.run(start_time))
}

/// Memory budget distributed across every live series, consulted by
/// [`StorageConsumer::free_memory_if_necessary`].
pub struct MemoryBudget {
    pub total_bytes: usize,
}

/// The consumer side: drains triple-buffer generations into [`SearchList`] history (spec §4.5
/// "Consumer thread").
pub struct StorageConsumer {
    io_map_consumer: Consumer<IoMapSample, 1>,
    frame_consumer: Consumer<RegisterFrameSample, FRAMES_PER_BATCH>,
    /// Full process-image snapshots, one per observed generation; PDO samples are decoded from
    /// these on demand (spec §3 "IOMap snapshot ... extracted on demand via bit-offset
    /// arithmetic"), rather than pre-decoded into a per-PDO series, since a client may start
    /// tracking a PDO after samples have already been appended.
    io_map_history: Arc<SearchList<Vec<u8>>>,
    register_histories: Mutex<HashMap<(u32, RegisterAddress), Arc<SearchList<AbstractDataPoint>>>>,
    register_cycle_timestamps: Arc<SearchList<TimeStamp>>,
    registered_offsets: Vec<crate::scheduler::ScheduledRegister>,
    budget: MemoryBudget,
    /// Invoked with every freshly appended register sample, letting a caller (the public `Reader`
    /// facade) derive statistics or drive a log writer without this consumer knowing about either.
    on_register_sample: Option<Box<dyn Fn(RegisterAddress, u32, u64, TimeStamp) + Send>>,
    last_pdo_time: Mutex<Option<TimeStamp>>,
    pdo_frequency: std::sync::atomic::AtomicU64,
    last_register_cycle_time: Mutex<Option<TimeStamp>>,
    register_frequency: std::sync::atomic::AtomicU64,
}

/// Blend a freshly observed rate into a decaying moving average, same weighting
/// [`crate::error_statistician::ErrorStatistician`] uses for its frequency statistics.
const FREQUENCY_DECAY_ALPHA: f64 = 0.3;

fn blend_frequency(previous: f64, time: TimeStamp, last: &mut Option<TimeStamp>) -> f64 {
    let rate = match *last {
        Some(prev) => match time.checked_duration_since(prev) {
            Some(dt) if dt.as_nanos() > 0 => 1_000_000_000.0 / dt.as_nanos() as f64,
            _ => previous,
        },
        None => 0.0,
    };
    *last = Some(time);
    previous * (1.0 - FREQUENCY_DECAY_ALPHA) + rate * FREQUENCY_DECAY_ALPHA
}

impl StorageConsumer {
    pub fn new(
        io_map_consumer: Consumer<IoMapSample, 1>,
        frame_consumer: Consumer<RegisterFrameSample, FRAMES_PER_BATCH>,
        io_map_history: Arc<SearchList<Vec<u8>>>,
        register_cycle_timestamps: Arc<SearchList<TimeStamp>>,
        registered_offsets: Vec<crate::scheduler::ScheduledRegister>,
        budget: MemoryBudget,
    ) -> Self {
        Self {
            io_map_consumer,
            frame_consumer,
            io_map_history,
            register_histories: Mutex::new(HashMap::new()),
            register_cycle_timestamps,
            registered_offsets,
            budget,
            on_register_sample: None,
            last_pdo_time: Mutex::new(None),
            pdo_frequency: std::sync::atomic::AtomicU64::new(0),
            last_register_cycle_time: Mutex::new(None),
            register_frequency: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Install a callback invoked with every freshly appended register sample.
    pub fn set_on_register_sample(&mut self, callback: Box<dyn Fn(RegisterAddress, u32, u64, TimeStamp) + Send>) {
        self.on_register_sample = Some(callback);
    }

    fn history_for(&self, slave: u32, register: RegisterAddress) -> Arc<SearchList<AbstractDataPoint>> {
        self.register_histories
            .lock()
            .expect("register history map poisoned")
            .entry((slave, register))
            .or_insert_with(|| Arc::new(SearchList::new()))
            .clone()
    }

    /// Drain whatever generations are newly available; never blocks.
    pub fn drain_once(&mut self) {
        if self.io_map_consumer.swap() {
            if let Some(sample) = self.io_map_consumer.read()[0].clone() {
                self.io_map_history.append(sample.bytes.clone(), sample.time);

                let mut last_pdo_time = self.last_pdo_time.lock().expect("last pdo time mutex poisoned");
                let previous = f64::from_bits(self.pdo_frequency.load(Ordering::Acquire));
                let blended = blend_frequency(previous, sample.time, &mut last_pdo_time);
                self.pdo_frequency.store(blended.to_bits(), Ordering::Release);
            }
        }

        if self.frame_consumer.swap() {
            for cell in self.frame_consumer.read().iter().flatten() {
                if cell.wkc == 0 {
                    continue;
                }

                for scheduled in self.registered_offsets.iter().filter(|r| r.frame_index == cell.frame_index) {
                    let data_offset = scheduled.data_offset;
                    let byte_len = scheduled.register.byte_len();

                    if let Some(bytes) = cell.raw.get(data_offset..data_offset + byte_len) {
                        let value = bytes.iter().rev().fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));

                        self.history_for(u32::from(scheduled.slave_address), scheduled.register).append(
                            AbstractDataPoint::Unsigned {
                                value,
                                data_type: EtherCATDataType::Unsigned((byte_len * 8) as u8),
                                time: cell.time,
                            },
                            cell.time,
                        );

                        if let Some(callback) = &self.on_register_sample {
                            callback(scheduled.register, u32::from(scheduled.slave_address), value, cell.time);
                        }
                    }
                }

                if cell.completed_loop {
                    self.register_cycle_timestamps.append(cell.time, cell.time);

                    let mut last_cycle_time =
                        self.last_register_cycle_time.lock().expect("last register cycle time mutex poisoned");
                    let previous = f64::from_bits(self.register_frequency.load(Ordering::Acquire));
                    let blended = blend_frequency(previous, cell.time, &mut last_cycle_time);
                    self.register_frequency.store(blended.to_bits(), Ordering::Release);
                }
            }
        }
    }

    /// Evict the oldest samples across the largest live histories until within budget (spec §4.5
    /// "freeMemoryIfNecessary").
    pub fn free_memory_if_necessary(&self) {
        let histories = self.register_histories.lock().expect("register history map poisoned");
        let per_series_budget = if histories.is_empty() {
            self.budget.total_bytes
        } else {
            self.budget.total_bytes / (histories.len() + 1)
        };

        self.io_map_history.remove_oldest(per_series_budget);
        for history in histories.values() {
            history.remove_oldest(per_series_budget);
        }
    }

    pub fn history_view(&self, register: Register, series: crate::time::TimeSeries) -> crate::search_list::View<AbstractDataPoint> {
        self.history_for(register.slave, register.register).get_view(series)
    }

    /// A forward-only view decoding `pdo` out of every captured process-image generation since
    /// `series.start_time` (spec §6.2 `getView` over a PDO `DataObject`).
    pub fn pdo_view(&self, range: BitRange, data_type: EtherCATDataType, series: crate::time::TimeSeries) -> PdoView {
        pdo_view_from_list(&self.io_map_history, range, data_type, series)
    }

    /// Decaying-average process-data cycle frequency, blended on every completed IOMap swap (spec
    /// §6.2 `getPDOFrequency`).
    pub fn pdo_frequency(&self) -> f64 {
        f64::from_bits(self.pdo_frequency.load(Ordering::Acquire))
    }

    /// Decaying-average register-schedule loop frequency, blended whenever the scheduler completes
    /// a full round (spec §6.2 `getRegisterFrequency`).
    pub fn register_frequency(&self) -> f64 {
        f64::from_bits(self.register_frequency.load(Ordering::Acquire))
    }
}

/// A forward-only view over one PDO's value, decoded from the raw process-image history on every
/// advance (spec §3 "IOMap snapshot ... extracted on demand"). Skips (without ending the view)
/// any generation where `range` fell outside the captured image, e.g. one recorded before
/// enumeration finished sizing the process image.
pub struct PdoView {
    inner: crate::search_list::View<Vec<u8>>,
    range: BitRange,
    data_type: EtherCATDataType,
}

impl PdoView {
    /// A view that never yields anything, for a `Pdo` that was never mapped (spec §6.2 `getView`
    /// "callers may ask about a `DataObject` this reader never learned the layout of").
    pub fn empty(data_type: EtherCATDataType) -> Self {
        let list: SearchList<Vec<u8>> = SearchList::new();
        PdoView {
            inner: list.get_view(crate::time::TimeSeries::every_sample(TimeStamp::from_nanos(0))),
            range: BitRange::default(),
            data_type,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn next(&mut self) -> Option<AbstractDataPoint> {
        loop {
            let (image, time) = self.inner.next()?;
            if let Some(point) = crate::bus_info::BusInfo::extract_pdo(&image, self.range, self.data_type, time) {
                return Some(point);
            }
        }
    }
}

/// Build a [`PdoView`] directly over a raw process-image `SearchList`, without going through a
/// [`StorageConsumer`]; used by [`StorageConsumer::pdo_view`] and exercised directly in tests.
pub fn pdo_view_from_list(
    list: &SearchList<Vec<u8>>,
    range: BitRange,
    data_type: EtherCATDataType,
    series: crate::time::TimeSeries,
) -> PdoView {
    PdoView {
        inner: list.get_view(series),
        range,
        data_type,
    }
}

/// Build a connected producer/consumer pair of triple-buffer channels for one bus-reader session.
pub fn triple_buffer_channels() -> (
    Producer<IoMapSample, 1>,
    Consumer<IoMapSample, 1>,
    Producer<RegisterFrameSample, FRAMES_PER_BATCH>,
    Consumer<RegisterFrameSample, FRAMES_PER_BATCH>,
) {
    let (io_producer, io_consumer) = triple_buffer::channel::<IoMapSample, 1>();
    let (frame_producer, frame_consumer) = triple_buffer::channel::<RegisterFrameSample, FRAMES_PER_BATCH>();
    (io_producer, io_consumer, frame_producer, frame_consumer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regs_per_round_shrinks_when_cycle_overruns() {
        let next = adjust_regs_per_round(Duration::from_millis(2), Duration::from_millis(1), 4, 16);
        assert_eq!(next, 3);
    }

    #[test]
    fn regs_per_round_grows_when_cycle_has_slack() {
        let next = adjust_regs_per_round(Duration::from_micros(500), Duration::from_millis(1), 4, 16);
        assert_eq!(next, 5);
    }

    #[test]
    fn regs_per_round_holds_steady_near_target() {
        let next = adjust_regs_per_round(Duration::from_micros(900), Duration::from_millis(1), 4, 16);
        assert_eq!(next, 4);
    }

    #[test]
    fn regs_per_round_never_drops_below_one() {
        let next = adjust_regs_per_round(Duration::from_millis(5), Duration::from_millis(1), 1, 16);
        assert_eq!(next, 1);
    }

    #[test]
    fn regs_per_round_never_exceeds_configured_max() {
        let next = adjust_regs_per_round(Duration::from_micros(1), Duration::from_millis(1), 16, 16);
        assert_eq!(next, 16);
    }

    #[test]
    fn bus_mode_request_round_trips_through_u8() {
        assert_eq!(BusModeRequest::from(u8::from(BusModeRequest::Op)), BusModeRequest::Op);
        assert_eq!(BusModeRequest::from(u8::from(BusModeRequest::SafeOp)), BusModeRequest::SafeOp);
        assert_eq!(BusModeRequest::from(u8::from(BusModeRequest::None)), BusModeRequest::None);
    }

    #[test]
    fn control_halt_flag_is_observed() {
        let control = RealtimeControl::new();
        assert!(!control.should_halt());
        control.request_halt();
        assert!(control.should_halt());
    }
}
