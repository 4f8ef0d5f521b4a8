//! CoE cache and proxy (spec §4.7): the newest value read for each [`CoEObject`], kept behind an
//! atomic swap so the realtime thread can publish an update without ever blocking a client reader.
//!
//! Unlike PDO/register samples, CoE reads are expensive (a full mailbox round-trip) and rare, so
//! this cache holds only the newest value per object rather than a full [`crate::search_list`]
//! history.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::data_object::{AbstractDataPoint, CoEObject};
use crate::views::{LatestCell, NewestValueView};

/// A read-through cache of the most recently observed value for each [`CoEObject`] the client has
/// asked to track.
#[derive(Default)]
pub struct CoECache {
    entries: Mutex<HashMap<CoEObject, LatestCell>>,
}

impl CoECache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (creating if necessary) the cell backing `object`.
    fn cell_for(&self, object: CoEObject) -> LatestCell {
        let mut entries = self.entries.lock().expect("CoE cache mutex poisoned");
        entries.entry(object).or_insert_with(LatestCell::new).clone()
    }

    /// Record a freshly read value for `object` (called by the realtime thread after a successful
    /// SDO upload).
    pub fn publish(&self, object: CoEObject, point: AbstractDataPoint) {
        self.cell_for(object).publish(point);
    }

    /// A view over the newest value seen for `object`, created lazily if this is the first time
    /// `object` has been requested (spec §4.7 "the cache starts empty and is populated on demand").
    pub fn view(&self, object: CoEObject) -> NewestValueView {
        self.cell_for(object).view()
    }

    /// The most recently cached value for `object`, if any has ever been published.
    pub fn snapshot(&self, object: CoEObject) -> Option<AbstractDataPoint> {
        self.entries
            .lock()
            .expect("CoE cache mutex poisoned")
            .get(&object)
            .and_then(LatestCell::snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_object::CoEAccess;
    use crate::data_types::EtherCATDataType;
    use crate::time::TimeStamp;
    use crate::views::DataView;

    fn object(index: u16) -> CoEObject {
        CoEObject {
            slave: 1,
            index,
            sub_index: 0,
            access: CoEAccess::READ_SAFE_OP,
            data_type: EtherCATDataType::Unsigned(16),
        }
    }

    #[test]
    fn view_requested_before_any_publish_is_empty_then_updates() {
        let cache = CoECache::new();
        let view = cache.view(object(0x6000));

        assert!(view.is_empty());

        cache.publish(
            object(0x6000),
            AbstractDataPoint::Unsigned {
                value: 5,
                data_type: EtherCATDataType::Unsigned(16),
                time: TimeStamp::from_nanos(1),
            },
        );

        assert_eq!(view.as_double(), 5.0);
    }

    #[test]
    fn distinct_objects_do_not_share_a_cell() {
        let cache = CoECache::new();

        cache.publish(
            object(0x6000),
            AbstractDataPoint::Unsigned {
                value: 1,
                data_type: EtherCATDataType::Unsigned(16),
                time: TimeStamp::from_nanos(1),
            },
        );

        assert!(cache.snapshot(object(0x6001)).is_none());
        assert!(cache.snapshot(object(0x6000)).is_some());
    }
}
