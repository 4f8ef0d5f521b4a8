//! Writes a `.ekl` log file: header and slave-info/PDO-detail sections up front, then a steady
//! stream of data records as the caller feeds it freshly observed samples (spec §4.10 `Logger`).
//!
//! `Logger` itself performs no I/O scheduling — it is a thin, synchronous sink. Whatever drives
//! the realtime loop (here, the public [`crate::reader::Reader`] facade) decides when to call
//! [`Logger::log_process_image`]/[`Logger::log_register`]/[`Logger::log_coe_sample`]/
//! [`Logger::log_error`], the same split `rtfuncs.hpp` makes between the pure per-cycle step and
//! the thread that calls it.

use std::io::{Seek, SeekFrom, Write};

use crate::bus_info::BusInfo;
use crate::data_object::{AbstractDataPoint, CoEObject};
use crate::error::{ErrorMessage, LogError};
use crate::log::codec::{
    self, pack_float, pack_unsigned, write_coe_sample_record, write_error_record, write_header,
    write_pdo_details, write_process_image_record, write_register_record, write_slave_info, Header,
    HEADER_LEN,
};
use crate::register::RegisterAddress;
use crate::slave_info::SlaveInfo;
use crate::time::TimeStamp;

/// A running count of how many records of each kind have been written, reported back to the
/// caller after [`Logger::finish`] so a progress indicator can show something more meaningful than
/// "still writing".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogStats {
    pub process_images: u64,
    pub register_samples: u64,
    pub coe_samples: u64,
    pub errors: u64,
}

/// Writes one `.ekl` log file. Constructed once enumeration has finished (so the slave-info and
/// PDO-detail sections can be written up front), then fed records for the lifetime of the logging
/// session.
pub struct Logger<W: Write + Seek> {
    writer: W,
    io_map_used_size: usize,
    start_time: TimeStamp,
    stats: LogStats,
}

impl<W: Write + Seek> Logger<W> {
    /// Write the header (with placeholder offsets), the slave-info section and the PDO-detail
    /// section, then patch the header with the real offsets now that they're known. `writer` is
    /// left positioned at the start of the data section, ready for [`Self::log_process_image`] and
    /// friends.
    pub fn new(mut writer: W, slaves: &[SlaveInfo], bus_info: &BusInfo) -> Result<Self, LogError> {
        writer.write_all(&[0u8; HEADER_LEN])?;

        for slave in slaves {
            write_slave_info(&mut writer, slave)?;
        }

        let pdo_desc_offset = writer.stream_position()?;

        for slave in slaves {
            let details: Vec<_> = slave
                .pdos
                .iter()
                .filter_map(|pdo| bus_info.pdo_offsets.get(pdo).map(|range| (*pdo, *range)))
                .collect();
            write_pdo_details(&mut writer, slave.id, &details)?;
        }

        let data_offset = writer.stream_position()?;

        let header = Header {
            pdo_desc_offset,
            data_offset,
            io_map_used_size: bus_info.io_map_used_size as u64,
            start_time_ns: bus_info.start_time.as_nanos(),
        };

        writer.seek(SeekFrom::Start(0))?;
        write_header(&mut writer, &header)?;
        writer.seek(SeekFrom::Start(data_offset))?;

        Ok(Self {
            writer,
            io_map_used_size: bus_info.io_map_used_size,
            start_time: bus_info.start_time,
            stats: LogStats::default(),
        })
    }

    /// The timestamp this log file considers time zero; records at or after this are within the
    /// logging window (spec §4.10 "startTime filtering").
    pub fn start_time(&self) -> TimeStamp {
        self.start_time
    }

    fn within_window(&self, time: TimeStamp) -> bool {
        time >= self.start_time
    }

    /// Record one cycle's process image, truncated/padded to the size fixed at construction.
    pub fn log_process_image(&mut self, time: TimeStamp, image: &[u8]) -> Result<(), LogError> {
        if !self.within_window(time) {
            return Ok(());
        }

        let mut padded = vec![0u8; self.io_map_used_size];
        let len = image.len().min(self.io_map_used_size);
        padded[..len].copy_from_slice(&image[..len]);

        write_process_image_record(&mut self.writer, time.as_nanos(), &padded)?;
        self.stats.process_images += 1;
        Ok(())
    }

    /// Record one register sample (spec §4.10 "register series are written every cycle they
    /// change", modelled here as every call the caller chooses to make).
    pub fn log_register(&mut self, time: TimeStamp, register: RegisterAddress, slave: u32, value: u64) -> Result<(), LogError> {
        if !self.within_window(time) {
            return Ok(());
        }

        let bytes = pack_unsigned(value, crate::data_types::EtherCATDataType::Unsigned((register.byte_len() * 8) as u8));
        write_register_record(&mut self.writer, time.as_nanos(), register, slave as u16, &bytes)?;
        self.stats.register_samples += 1;
        Ok(())
    }

    /// Record a CoE sample. CoE reads are rare and expensive, so unlike register series these are
    /// written with priority: callers are expected to flush a queued CoE update before anything
    /// else in the same cycle (spec §4.10 "CoE writes get priority over PDO/process image writes").
    pub fn log_coe_sample(&mut self, time: TimeStamp, object: CoEObject, point: AbstractDataPoint) -> Result<(), LogError> {
        if !self.within_window(time) {
            return Ok(());
        }

        let value = match point {
            AbstractDataPoint::Unsigned { value, data_type, .. } => pack_unsigned(value, data_type),
            AbstractDataPoint::Float { value, .. } => pack_float(value),
        };

        write_coe_sample_record(&mut self.writer, time.as_nanos(), object.slave as u16, object.index, object.sub_index, &value)?;
        self.stats.coe_samples += 1;
        Ok(())
    }

    /// Record a diagnostic message. Written best-effort: a failure here is not allowed to abort
    /// the logging session (spec §4.10 "error messages are logged best-effort").
    pub fn log_error(&mut self, time: TimeStamp, message: &ErrorMessage) {
        if !self.within_window(time) {
            return;
        }

        let (slave1, slave2) = message.associated_slaves();
        let severity = match message.severity() {
            crate::error::ErrorSeverity::Low => 0,
            crate::error::ErrorSeverity::Medium => 1,
            crate::error::ErrorSeverity::Fatal => 2,
        };

        let result = write_error_record(
            &mut self.writer,
            time.as_nanos(),
            slave1.map(|s| s as u16),
            slave2.map(|s| s as u16),
            severity,
            message.message(),
        );

        if result.is_ok() {
            self.stats.errors += 1;
        }
    }

    /// Flush buffered writes and return the stats accumulated so far. `stopLog()` (spec §4.10)
    /// translates to calling this once the caller has drained any queued CoE updates into
    /// [`Self::log_coe_sample`].
    pub fn finish(mut self) -> Result<LogStats, LogError> {
        self.writer.flush()?;
        Ok(self.stats)
    }
}
