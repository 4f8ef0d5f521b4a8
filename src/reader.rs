//! The public facade (spec §3/§6 `Reader`): owns enumeration, the realtime producer/consumer pair,
//! the CoE cache, the error statistician and (optionally) a live log writer, and exposes the single
//! client-facing API everything else in this crate is in service of.
//!
//! Construction runs enumeration synchronously, then spawns the realtime producer thread and keeps
//! the consumer side on whichever thread drives [`Reader::poll`] (a GUI event loop, a CLI's main
//! loop, or a dedicated background thread — this crate does not assume which).

use std::io::{Seek, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::bus_info::BusInfo;
use crate::bus_reader::{
    spawn_producer, triple_buffer_channels, MemoryBudget, RealtimeConfig, RealtimeControl, RealtimeProducer,
    StorageConsumer,
};
use crate::coe_cache::CoECache;
use crate::data_object::{CoEObject, ErrorStatistic, ErrorStatisticType, GLOBAL_SLAVE, Register};
use crate::error::Error;
use crate::error_statistician::ErrorStatistician;
use crate::link_layer::LinkLayer;
use crate::log::logger::Logger;
use crate::message_queue::{self, ClientQueueHandle, ClientRequest, CoEUpdateRequest, PdoWriteRequest, RegisterResetRequest};
use crate::register::RegisterAddress;
use crate::scheduler::{RegisterScheduler, SlaveRegisterMap};
use crate::slave_info::SlaveInfo;
use crate::slave_informant;
use crate::time::{TimeSeries, TimeStamp};
use crate::views::{DataView, ErrorView, HistoryView, NewestValueView};

/// Every register whose value is an error counter (ETG1000.4 Table 34), tracked from the moment a
/// slave is enumerated so [`ErrorStatistician`] has a running baseline without the client having to
/// ask for it explicitly (spec §4.8 "error counters are always scheduled").
const ERROR_COUNTER_REGISTERS: &[RegisterAddress] = &[
    RegisterAddress::RxErrorCounterPort0,
    RegisterAddress::ForwardedRxErrorCounterPort0,
    RegisterAddress::FrameErrorCounterPort1,
    RegisterAddress::RxErrorCounterPort1,
    RegisterAddress::ForwardedRxErrorCounterPort1,
    RegisterAddress::FrameErrorCounterPort2,
    RegisterAddress::RxErrorCounterPort2,
    RegisterAddress::ForwardedRxErrorCounterPort2,
    RegisterAddress::FrameErrorCounterPort3,
    RegisterAddress::RxErrorCounterPort3,
    RegisterAddress::ForwardedRxErrorCounterPort3,
    RegisterAddress::EcatProcessingUnitErrorCounter,
    RegisterAddress::PdiErrorCounter,
    RegisterAddress::LostLinkCounterPort0,
    RegisterAddress::LostLinkCounterPort1,
    RegisterAddress::LostLinkCounterPort2,
    RegisterAddress::LostLinkCounterPort3,
];

fn is_error_counter(register: RegisterAddress) -> bool {
    ERROR_COUNTER_REGISTERS.contains(&register)
}

/// The bus mode a client observes or requests (spec §4.5 `BusModeRequest`, widened with the
/// states a running bus can actually report).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusMode {
    SafeOp,
    Op,
}

impl From<crate::bus_info::InitialBusMode> for BusMode {
    fn from(mode: crate::bus_info::InitialBusMode) -> Self {
        match mode {
            crate::bus_info::InitialBusMode::Op => Self::Op,
            crate::bus_info::InitialBusMode::SafeOp => Self::SafeOp,
        }
    }
}

/// Constructs a [`Reader`]: the interface to enumerate, the realtime loop's tuning, and the memory
/// budget to enforce on history storage.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    pub interface: String,
    pub realtime: RealtimeConfig,
    pub memory_budget_bytes: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            interface: "eth0".to_string(),
            realtime: RealtimeConfig {
                desired_pdo_time_step: std::time::Duration::from_micros(500),
                expected_wkc: 1,
                max_regs_per_round: 64,
                max_bus_mode_change_attempts: 3,
            },
            memory_budget_bytes: 64 * 1024 * 1024,
        }
    }
}

/// The public entry point: enumerates the bus, starts the realtime producer/consumer pair, and
/// answers every read/write operation a client issues against it (spec §3/§6 `Reader`).
pub struct Reader {
    slaves: Vec<SlaveInfo>,
    bus_info: BusInfo,
    queue: ClientQueueHandle,
    control: Arc<RealtimeControl>,
    scheduler: Arc<RegisterScheduler>,
    coe_cache: Arc<CoECache>,
    error_stats: Arc<ErrorStatistician>,
    consumer: Arc<Mutex<StorageConsumer>>,
    memory_budget: Arc<AtomicUsize>,
    halted_messages: Arc<std::sync::atomic::AtomicBool>,
    producer_thread: Option<std::thread::JoinHandle<()>>,
}

impl Reader {
    /// Enumerate the bus reachable through `link` and start the realtime loop. `start_time` is the
    /// timestamp every history and log file considers time zero.
    pub fn new<L: LinkLayer + Send + 'static>(
        mut link: L,
        config: ReaderConfig,
        start_time: TimeStamp,
    ) -> Result<Self, Error> {
        let outcome = slave_informant::enumerate(&mut link, &config.interface, start_time)
            .map_err(Error::from)?;

        let slave_maps: Vec<SlaveRegisterMap> = outcome
            .slaves
            .iter()
            .map(|slave| SlaveRegisterMap {
                slave_address: slave.id as u16,
                registers: ERROR_COUNTER_REGISTERS.to_vec(),
            })
            .collect();

        let scheduler = Arc::new(RegisterScheduler::new(&slave_maps));
        let control = Arc::new(RealtimeControl::new());
        let coe_cache = Arc::new(CoECache::new());
        let error_stats = Arc::new(ErrorStatistician::new());
        let (client_queue, realtime_queue) = message_queue::channel();

        let (io_producer, io_consumer, frame_producer, frame_consumer) = triple_buffer_channels();

        let io_map_history = Arc::new(crate::search_list::SearchList::new());
        let register_cycle_timestamps = Arc::new(crate::search_list::SearchList::new());

        let mut consumer = StorageConsumer::new(
            io_consumer,
            frame_consumer,
            io_map_history,
            register_cycle_timestamps,
            scheduler.get_next_frames(0).schedule().registers.clone(),
            MemoryBudget {
                total_bytes: config.memory_budget_bytes,
            },
        );

        let error_stats_for_hook = error_stats.clone();
        consumer.set_on_register_sample(Box::new(move |register, slave, value, time| {
            if is_error_counter(register) {
                error_stats_for_hook.observe(register, slave, value, time);
            }
        }));

        let consumer = Arc::new(Mutex::new(consumer));

        let coe_cache_for_producer = coe_cache.clone();
        let producer = RealtimeProducer::new(
            link,
            scheduler.clone(),
            realtime_queue,
            Box::new(move |object, point| coe_cache_for_producer.publish(object, point)),
            control.clone(),
            config.realtime,
            outcome.slaves.len() as u32,
            outcome.bus_info.io_map.len(),
            io_producer,
            frame_producer,
        );

        let producer_thread = Some(spawn_producer(producer, start_time));

        Ok(Self {
            slaves: outcome.slaves,
            bus_info: outcome.bus_info,
            queue: client_queue,
            control,
            scheduler,
            coe_cache,
            error_stats,
            consumer,
            memory_budget: Arc::new(AtomicUsize::new(config.memory_budget_bytes)),
            halted_messages: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            producer_thread,
        })
    }

    /// Every slave learned during enumeration, in id order.
    pub fn slaves(&self) -> &[SlaveInfo] {
        &self.slaves
    }

    /// The process image layout and PDO/CoE offsets discovered during enumeration.
    pub fn bus_info(&self) -> &BusInfo {
        &self.bus_info
    }

    /// Drain whatever the realtime thread has published since the last call, append it into
    /// history, and evict down to the configured memory budget. A client drives this from its own
    /// event loop at whatever cadence suits it (spec §4.5 "consumer thread is not itself realtime").
    pub fn poll(&self) {
        let mut consumer = self.consumer.lock().expect("storage consumer mutex poisoned");
        consumer.drain_once();
        consumer.free_memory_if_necessary();
    }

    /// The newest value of `register` on `slave`, if any sample has been observed yet (spec §6.2
    /// `getNewest`).
    pub fn get_newest_register(&self, slave: u32, register: RegisterAddress) -> NewestValueView {
        // Register history has no dedicated "latest" cell; a one-shot view starting from the end
        // of time would miss the last sample, so this peeks the tail of a fresh full-history view
        // instead (consistent with how `coe_cache`/`views::LatestCell` model "newest" elsewhere).
        let consumer = self.consumer.lock().expect("storage consumer mutex poisoned");
        let mut view = consumer.history_view(
            Register { slave, register },
            TimeSeries::every_sample(TimeStamp::from_nanos(0)),
        );

        let cell = crate::views::LatestCell::new();
        while let Some((point, time)) = view.next() {
            let _ = time;
            cell.publish(point);
        }
        cell.view()
    }

    /// A forward-only view over `register`'s full history on `slave`, starting from `series`.
    pub fn get_register_view(&self, slave: u32, register: RegisterAddress, series: TimeSeries) -> HistoryView {
        let consumer = self.consumer.lock().expect("storage consumer mutex poisoned");
        HistoryView::new(consumer.history_view(Register { slave, register }, series))
    }

    /// A view over the CoE cache for `object`; never blocks, always reflects the newest SDO read
    /// (spec §6.2 `getView` over a CoE `DataObject`).
    pub fn get_coe_view(&self, object: CoEObject) -> NewestValueView {
        self.coe_cache.view(object)
    }

    /// The most recently cached value for a CoE object, if any read has completed.
    pub fn get_coe_newest(&self, object: CoEObject) -> Option<crate::data_object::AbstractDataPoint> {
        self.coe_cache.snapshot(object)
    }

    /// A view over a derived error statistic (spec §6.2 `getErrorStatistic`).
    pub fn get_error_statistic_view(&self, stat: ErrorStatistic, series: TimeSeries) -> HistoryView {
        HistoryView::new(self.error_stats.get_view(stat, series))
    }

    /// The decaying-average rate at which complete process-data cycles are observed (spec §6.2
    /// `getPDOFrequency`).
    pub fn get_pdo_frequency(&self) -> f64 {
        self.consumer.lock().expect("storage consumer mutex poisoned").pdo_frequency()
    }

    /// The decaying-average rate at which the register scheduler completes a full round (spec §6.2
    /// `getRegisterFrequency`).
    pub fn get_register_frequency(&self) -> f64 {
        self.consumer.lock().expect("storage consumer mutex poisoned").register_frequency()
    }

    /// Every error message published since `series.start_time` (spec §6.2 `getErrors`).
    pub fn get_errors(&self, series: TimeSeries) -> ErrorView {
        // Errors observed by the realtime thread arrive over the client queue, not a SearchList the
        // reader keeps directly; drain whatever is queued into a fresh list so callers get a normal
        // forward-only `ErrorView` regardless of when they ask.
        let list = crate::search_list::SearchList::new();
        for error in self.queue.drain_errors() {
            let time = TimeStamp::from_nanos(0);
            list.append(error, time);
        }
        let view = list.get_view(series);
        ErrorView::new(view)
    }

    /// Queue a write of `pdo`'s value for the realtime thread's next cycle, looking up its
    /// location in the process image from the `BusInfo` recorded at enumeration (spec §6.2
    /// `setPDOValue`). Returns `false` without queuing anything if `pdo` was never mapped — e.g. a
    /// stale `Pdo` from a previous enumeration.
    pub fn set_pdo_value(&self, pdo: crate::data_object::Pdo, bytes: Vec<u8>) -> bool {
        let Some(range) = self.bus_info.pdo_offsets.get(&pdo).copied() else {
            return false;
        };

        let byte_offset = (range.bit_offset / 8) as usize;
        let bit_offset = (range.bit_offset % 8) as u8;

        self.queue
            .send(ClientRequest::PdoWrite(PdoWriteRequest {
                slave: pdo.slave,
                byte_offset,
                bit_offset,
                bytes,
            }))
            .is_ok()
    }

    /// A forward-only view decoding `pdo`'s value out of every captured process-image generation
    /// since `series.start_time` (spec §6.2 `getView` over a PDO `DataObject`). An empty view if
    /// `pdo` was never mapped during enumeration.
    pub fn get_pdo_view(&self, pdo: crate::data_object::Pdo, series: TimeSeries) -> crate::views::PdoHistoryView {
        let Some(range) = self.bus_info.pdo_offsets.get(&pdo).copied() else {
            return crate::views::PdoHistoryView::new(crate::bus_reader::PdoView::empty(pdo.data_type));
        };
        let consumer = self.consumer.lock().expect("storage consumer mutex poisoned");
        crate::views::PdoHistoryView::new(consumer.pdo_view(range, pdo.data_type, series))
    }

    /// The newest observed value of `pdo`, if any process-image sample covering it has been
    /// captured yet (spec §6.2 `getNewest` over a PDO `DataObject`).
    pub fn get_newest_pdo(&self, pdo: crate::data_object::Pdo) -> NewestValueView {
        let cell = crate::views::LatestCell::new();
        let Some(range) = self.bus_info.pdo_offsets.get(&pdo).copied() else {
            return cell.view();
        };

        let consumer = self.consumer.lock().expect("storage consumer mutex poisoned");
        let mut view = consumer.pdo_view(range, pdo.data_type, TimeSeries::every_sample(TimeStamp::from_nanos(0)));
        while let Some(point) = view.next() {
            cell.publish(point);
        }
        cell.view()
    }

    /// Queue an SDO transfer for `object`: a read (`is_read = true`) uploads the object's current
    /// value; a write (`is_read = false`) downloads `value`. Either way, success publishes the
    /// resulting value into the CoE cache once the realtime thread completes it (spec §6.2
    /// `updateCoEObject`). Returns whether the request was accepted onto the queue — not whether
    /// the SDO transfer itself later succeeds, which surfaces asynchronously as an error or a cache
    /// update (spec §7 "client-facing operations ... never throw").
    pub fn update_coe_object(&self, object: CoEObject, value: Vec<u8>, is_read: bool) -> bool {
        self.queue
            .send(ClientRequest::CoEUpdate(CoEUpdateRequest { object, is_read, value }))
            .is_ok()
    }

    /// Queue a reset of `slave`'s error-counter registers, and zero the derived statistics
    /// immediately so the UI does not show a stale total while the reset PDU is in flight (spec
    /// §6.2 `resetErrorRegisters`).
    pub fn reset_error_registers(&self, slave: u32) {
        let slave_address = slave as u16;
        let _ = self
            .queue
            .send(ClientRequest::RegisterReset(RegisterResetRequest { slave_address }));

        for &register in ERROR_COUNTER_REGISTERS {
            self.error_stats.reset(register, slave);
        }
    }

    /// Reconfigure which registers the realtime loop samples each cycle (spec §6.2
    /// `changeRegisterSettings`). Error-counter registers stay enabled on every slave regardless of
    /// what the client requests, since [`ErrorStatistician`] depends on a continuous baseline.
    pub fn change_register_settings(&self, mut slaves: Vec<SlaveRegisterMap>) {
        for slave in &mut slaves {
            for &register in ERROR_COUNTER_REGISTERS {
                if !slave.registers.contains(&register) {
                    slave.registers.push(register);
                }
            }
        }
        self.scheduler.change_register_settings(&slaves);
    }

    /// Request a bus-mode transition; the producer thread applies it on its next cycle (spec §6.2
    /// `toggleBusSafeOp`).
    pub fn toggle_bus_safe_op(&self, target: BusMode) {
        let request = match target {
            BusMode::Op => crate::bus_reader::BusModeRequest::Op,
            BusMode::SafeOp => crate::bus_reader::BusModeRequest::SafeOp,
        };
        self.control.request_bus_mode(request);
    }

    /// The bus mode enumeration left the bus in; does not reflect an in-flight
    /// [`Self::toggle_bus_safe_op`] request until the producer thread applies it (spec §6.2
    /// `getBusMode`).
    pub fn get_bus_mode(&self) -> BusMode {
        BusMode::from(self.bus_info.status_after_init)
    }

    /// Change the total memory budget enforced across every live history (spec §6.2
    /// `setMaximumMemory`).
    pub fn set_maximum_memory(&self, total_bytes: usize) {
        self.memory_budget.store(total_bytes, Ordering::Release);
    }

    /// Request the realtime loop stop after its current cycle (spec §6.2 `messageHalt` when used
    /// to mean "stop the reader", as opposed to the log-replay `messageHalt` in
    /// [`crate::log::reader::LogReader`]).
    pub fn message_halt(&self) {
        self.control.request_halt();
        self.halted_messages.store(true, Ordering::Release);
    }

    /// Whether [`Self::message_halt`] has been called.
    pub fn is_halted(&self) -> bool {
        self.halted_messages.load(Ordering::Acquire)
    }

    /// Stop the realtime thread and wait for it to exit, consuming this reader.
    pub fn join(mut self) {
        self.control.request_halt();
        if let Some(handle) = self.producer_thread.take() {
            let _ = handle.join();
        }
    }

    /// Open a `.ekl` log writer against the slaves and bus layout this reader enumerated, ready to
    /// receive [`Logger::log_process_image`]/[`Logger::log_register`]/[`Logger::log_coe_sample`]/
    /// [`Logger::log_error`] calls from a caller driving [`Self::poll`] (spec §4.10).
    pub fn open_log<W: Write + Seek>(&self, writer: W) -> Result<Logger<W>, Error> {
        Logger::new(writer, &self.slaves, &self.bus_info).map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link_layer::mock::MockLinkLayer;
    use crate::link_layer::{EnumeratedSlave, SlaveState};

    fn slave(address: u16) -> EnumeratedSlave {
        EnumeratedSlave {
            configured_address: address,
            input_offset: 0,
            output_offset: 0,
            input_start_bit: 0,
            output_start_bit: 0,
            parent: None,
            parent_port: 0,
            entry_port: 0,
            mailbox_protocols: 0x0004,
            eeprom_byte_width: 4,
        }
    }

    fn config() -> ReaderConfig {
        ReaderConfig {
            interface: "mock0".to_string(),
            realtime: RealtimeConfig {
                desired_pdo_time_step: std::time::Duration::from_millis(1),
                expected_wkc: 0,
                max_regs_per_round: 16,
                max_bus_mode_change_attempts: 3,
            },
            memory_budget_bytes: 1024 * 1024,
        }
    }

    #[test]
    fn new_enumerates_and_starts_the_realtime_thread() {
        let mut link = MockLinkLayer::new(vec![slave(0x1001)]);
        link.states.insert(1, SlaveState::Op);

        let reader = Reader::new(link, config(), TimeStamp::from_nanos(0)).expect("enumeration succeeds");
        assert_eq!(reader.slaves().len(), 1);
        assert_eq!(reader.get_bus_mode(), BusMode::Op);

        reader.join();
    }

    #[test]
    fn reset_error_registers_zeroes_statistics_immediately() {
        let mut link = MockLinkLayer::new(vec![slave(0x1001)]);
        link.states.insert(1, SlaveState::Op);

        let reader = Reader::new(link, config(), TimeStamp::from_nanos(0)).expect("enumeration succeeds");

        reader
            .error_stats
            .observe(RegisterAddress::FrameErrorCounterPort1, 1, 9, TimeStamp::from_nanos(1));
        reader.reset_error_registers(1);

        let mut view = reader.get_error_statistic_view(
            ErrorStatistic {
                stat_type: ErrorStatisticType::TotalSlave,
                source: RegisterAddress::FrameErrorCounterPort1,
                slave: 1,
            },
            TimeSeries::every_sample(TimeStamp::from_nanos(0)),
        );

        let mut last = None;
        while view.has_next() {
            last = Some(view.as_double());
            if !view.advance() {
                break;
            }
        }

        assert_eq!(last, Some(9.0));

        reader
            .error_stats
            .observe(RegisterAddress::FrameErrorCounterPort1, 1, 2, TimeStamp::from_nanos(2));

        let mut view = reader.get_error_statistic_view(
            ErrorStatistic {
                stat_type: ErrorStatisticType::TotalSlave,
                source: RegisterAddress::FrameErrorCounterPort1,
                slave: 1,
            },
            TimeSeries::every_sample(TimeStamp::from_nanos(0)),
        );

        let mut values = Vec::new();
        while view.has_next() {
            values.push(view.as_double());
            if !view.advance() {
                break;
            }
        }

        assert_eq!(values, vec![9.0, 2.0]);

        reader.join();
    }

    #[test]
    fn message_halt_stops_the_producer_thread() {
        let mut link = MockLinkLayer::new(vec![slave(0x1001)]);
        link.states.insert(1, SlaveState::Op);

        let reader = Reader::new(link, config(), TimeStamp::from_nanos(0)).expect("enumeration succeeds");
        assert!(!reader.is_halted());

        reader.message_halt();
        assert!(reader.is_halted());

        reader.join();
    }

    #[test]
    fn unmapped_pdo_yields_empty_view_and_rejected_write() {
        let mut link = MockLinkLayer::new(vec![slave(0x1001)]);
        link.states.insert(1, SlaveState::Op);

        let reader = Reader::new(link, config(), TimeStamp::from_nanos(0)).expect("enumeration succeeds");

        let pdo = crate::data_object::Pdo {
            slave: 1,
            index: 0x1600,
            direction: crate::data_object::PdoDirection::Output,
            data_type: crate::data_types::EtherCATDataType::Unsigned(16),
        };

        assert!(!reader.set_pdo_value(pdo, vec![0, 0]));

        let view = reader.get_pdo_view(pdo, TimeSeries::every_sample(TimeStamp::from_nanos(0)));
        assert!(view.is_empty());

        let newest = reader.get_newest_pdo(pdo);
        assert!(newest.is_empty());

        reader.join();
    }

    #[test]
    fn unreachable_interface_surfaces_enumeration_error() {
        let link = MockLinkLayer::new(Vec::new());
        let result = Reader::new(link, config(), TimeStamp::from_nanos(0));
        assert!(result.is_err());
    }
}
