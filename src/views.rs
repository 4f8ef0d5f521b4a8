//! Read-side cursors handed out to clients (spec §6.2 `DataView`/`NewestValueView`,
//! `ErrorIterator`).
//!
//! These wrap [`crate::search_list::View`] (and, for the newest-value case, a plain shared cell)
//! behind a small trait so callers can iterate history or peek the latest sample without caring
//! which storage backs a particular [`crate::data_object::DataObject`].

use std::sync::{Arc, Mutex};

use crate::data_object::AbstractDataPoint;
use crate::error::ErrorMessage;
use crate::search_list;
use crate::time::TimeStamp;

/// A forward-only cursor over a series of samples (spec §6.2 `DataView`).
///
/// `advance` mirrors the original `operator++`: it moves the cursor to the next sample and
/// reports whether one was available, rather than returning the sample itself, so repeated calls
/// compose naturally with `has_next`/`is_empty`.
pub trait DataView {
    /// Whether a sample is currently available to read via [`Self::as_double`]/[`Self::get_time`].
    fn has_next(&self) -> bool;

    /// Advance to the next sample. Returns `false` (and leaves the cursor unmoved) if none is
    /// available yet.
    fn advance(&mut self) -> bool;

    /// The current sample's value, widened to `f64` regardless of its underlying wire type.
    fn as_double(&self) -> f64;

    /// The current sample's timestamp.
    fn get_time(&self) -> TimeStamp;

    /// Whether this view has never had any sample to show, from creation to now.
    fn is_empty(&self) -> bool;
}

/// A [`DataView`] over a [`crate::search_list::SearchList`] history.
pub struct HistoryView {
    inner: search_list::View<AbstractDataPoint>,
    current: Option<AbstractDataPoint>,
    ever_had_data: bool,
}

impl HistoryView {
    /// Wrap a raw [`search_list::View`], pre-loading its first sample if one is already available.
    pub fn new(mut inner: search_list::View<AbstractDataPoint>) -> Self {
        let current = inner.next().map(|(point, _)| point);
        let ever_had_data = current.is_some();

        Self {
            inner,
            current,
            ever_had_data,
        }
    }
}

impl DataView for HistoryView {
    fn has_next(&self) -> bool {
        self.current.is_some()
    }

    fn advance(&mut self) -> bool {
        match self.inner.next() {
            Some((point, _)) => {
                self.current = Some(point);
                self.ever_had_data = true;
                true
            }
            None => {
                self.current = None;
                false
            }
        }
    }

    fn as_double(&self) -> f64 {
        match self.current {
            Some(AbstractDataPoint::Unsigned { value, .. }) => value as f64,
            Some(AbstractDataPoint::Float { value, .. }) => value,
            None => f64::NAN,
        }
    }

    fn get_time(&self) -> TimeStamp {
        self.current.map(|point| point.time()).unwrap_or(TimeStamp::from_nanos(0))
    }

    fn is_empty(&self) -> bool {
        !self.ever_had_data
    }
}

/// A [`DataView`] decoding one PDO out of process-image history on every advance (spec §6.2
/// `getView` over a PDO `DataObject`), parallel to [`HistoryView`] but backed by
/// [`crate::bus_reader::PdoView`] instead of a pre-decoded [`search_list::SearchList`].
pub struct PdoHistoryView {
    inner: crate::bus_reader::PdoView,
    current: Option<AbstractDataPoint>,
    ever_had_data: bool,
}

impl PdoHistoryView {
    pub fn new(mut inner: crate::bus_reader::PdoView) -> Self {
        let current = inner.next();
        let ever_had_data = current.is_some();

        Self {
            inner,
            current,
            ever_had_data,
        }
    }
}

impl DataView for PdoHistoryView {
    fn has_next(&self) -> bool {
        self.current.is_some()
    }

    fn advance(&mut self) -> bool {
        match self.inner.next() {
            Some(point) => {
                self.current = Some(point);
                self.ever_had_data = true;
                true
            }
            None => {
                self.current = None;
                false
            }
        }
    }

    fn as_double(&self) -> f64 {
        match self.current {
            Some(AbstractDataPoint::Unsigned { value, .. }) => value as f64,
            Some(AbstractDataPoint::Float { value, .. }) => value,
            None => f64::NAN,
        }
    }

    fn get_time(&self) -> TimeStamp {
        self.current.map(|point| point.time()).unwrap_or(TimeStamp::from_nanos(0))
    }

    fn is_empty(&self) -> bool {
        !self.ever_had_data
    }
}

/// A shared cell the realtime thread overwrites and readers snapshot from, used for
/// [`NewestValueView`] and the CoE cache (spec §4.7 "atomic pointer swap over the cached value").
#[derive(Clone, Default)]
pub struct LatestCell {
    slot: Arc<Mutex<Option<AbstractDataPoint>>>,
}

impl LatestCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new value, replacing whatever was there.
    pub fn publish(&self, point: AbstractDataPoint) {
        *self.slot.lock().expect("latest-value cell poisoned") = Some(point);
    }

    /// Snapshot the current value, if any has ever been published.
    pub fn snapshot(&self) -> Option<AbstractDataPoint> {
        *self.slot.lock().expect("latest-value cell poisoned")
    }

    /// A [`DataView`] that always reports whatever is currently in the cell (spec §6.2
    /// `NewestValueView`: "never blocks, always reflects the most recent write, needs no
    /// `advance()` to see an update").
    pub fn view(&self) -> NewestValueView {
        NewestValueView { cell: self.clone() }
    }
}

/// A [`DataView`] that re-reads its backing [`LatestCell`] on every access instead of advancing
/// through history. `advance` is a no-op that always reports `true` once any value has ever been
/// published, since there is no queue of unseen samples to walk through.
pub struct NewestValueView {
    cell: LatestCell,
}

impl DataView for NewestValueView {
    fn has_next(&self) -> bool {
        self.cell.snapshot().is_some()
    }

    fn advance(&mut self) -> bool {
        self.has_next()
    }

    fn as_double(&self) -> f64 {
        match self.cell.snapshot() {
            Some(AbstractDataPoint::Unsigned { value, .. }) => value as f64,
            Some(AbstractDataPoint::Float { value, .. }) => value,
            None => f64::NAN,
        }
    }

    fn get_time(&self) -> TimeStamp {
        self.cell.snapshot().map(|point| point.time()).unwrap_or(TimeStamp::from_nanos(0))
    }

    fn is_empty(&self) -> bool {
        self.cell.snapshot().is_none()
    }
}

/// A forward-only cursor over the error log (spec §6.2 `ErrorIterator`), parallel to [`DataView`]
/// but yielding [`ErrorMessage`]s instead of numeric samples.
pub struct ErrorView {
    inner: search_list::View<ErrorMessage>,
    current: Option<ErrorMessage>,
    ever_had_data: bool,
}

impl ErrorView {
    pub fn new(mut inner: search_list::View<ErrorMessage>) -> Self {
        let current = inner.next().map(|(message, _)| message);
        let ever_had_data = current.is_some();

        Self {
            inner,
            current,
            ever_had_data,
        }
    }

    pub fn has_next(&self) -> bool {
        self.current.is_some()
    }

    pub fn advance(&mut self) -> bool {
        match self.inner.next() {
            Some((message, _)) => {
                self.current = Some(message);
                self.ever_had_data = true;
                true
            }
            None => {
                self.current = None;
                false
            }
        }
    }

    pub fn message(&self) -> Option<&ErrorMessage> {
        self.current.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        !self.ever_had_data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_types::EtherCATDataType;
    use crate::time::TimeSeries;

    fn point(value: u64, nanos: u64) -> AbstractDataPoint {
        AbstractDataPoint::Unsigned {
            value,
            data_type: EtherCATDataType::Unsigned(16),
            time: TimeStamp::from_nanos(nanos),
        }
    }

    #[test]
    fn history_view_walks_in_order_then_reports_empty_tail() {
        let list: search_list::SearchList<AbstractDataPoint> = search_list::SearchList::new();
        for i in 0..5u64 {
            list.append(point(i, i * 10), TimeStamp::from_nanos(i * 10));
        }

        let mut view = HistoryView::new(list.get_view(TimeSeries::every_sample(TimeStamp::from_nanos(0))));
        let mut values = Vec::new();

        while view.has_next() {
            values.push(view.as_double());
            if !view.advance() {
                break;
            }
        }

        assert_eq!(values, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        assert!(!view.is_empty());
    }

    #[test]
    fn newest_value_view_reflects_latest_publish_without_advancing() {
        let cell = LatestCell::new();
        let view = cell.view();

        assert!(view.is_empty());

        cell.publish(point(7, 100));
        assert_eq!(view.as_double(), 7.0);

        cell.publish(point(9, 200));
        assert_eq!(view.as_double(), 9.0);
    }

    #[test]
    fn error_view_walks_in_order() {
        use crate::error::ErrorSeverity;

        let list: search_list::SearchList<ErrorMessage> = search_list::SearchList::new();
        list.append(
            ErrorMessage::new("first", ErrorSeverity::Low),
            TimeStamp::from_nanos(0),
        );
        list.append(
            ErrorMessage::new("second", ErrorSeverity::Medium),
            TimeStamp::from_nanos(10),
        );

        let mut view = ErrorView::new(list.get_view(TimeSeries::every_sample(TimeStamp::from_nanos(0))));

        assert_eq!(view.message().unwrap().message(), "first");
        assert!(view.advance());
        assert_eq!(view.message().unwrap().message(), "second");
        assert!(!view.advance());
    }

    #[test]
    fn pdo_history_view_decodes_every_generation_in_order() {
        use crate::bus_info::{BitRange, BusInfo};

        let list: search_list::SearchList<Vec<u8>> = search_list::SearchList::new();
        list.append(vec![1, 0], TimeStamp::from_nanos(0));
        list.append(vec![2, 0], TimeStamp::from_nanos(10));
        list.append(vec![3, 0], TimeStamp::from_nanos(20));

        let range = BitRange {
            bit_offset: 0,
            bit_length: 8,
        };
        let raw_view = crate::bus_reader::pdo_view_from_list(
            &list,
            range,
            EtherCATDataType::Unsigned(8),
            TimeSeries::every_sample(TimeStamp::from_nanos(0)),
        );

        let mut view = PdoHistoryView::new(raw_view);
        let mut values = Vec::new();
        while view.has_next() {
            values.push(view.as_double());
            if !view.advance() {
                break;
            }
        }

        assert_eq!(values, vec![1.0, 2.0, 3.0]);

        // Touch `BusInfo` so this test also documents where the decode logic lives.
        let _ = BusInfo::extract_pdo(&[1], range, EtherCATDataType::Unsigned(8), TimeStamp::from_nanos(0));
    }
}
