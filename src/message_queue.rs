//! Client-thread <-> realtime-thread message queues (spec §4.6). Requests flow one way
//! (GUI/client thread -> realtime thread), replies and unsolicited errors flow the other; each
//! queue is a plain SPSC channel so the realtime thread never blocks waiting on a slow client.

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use crate::data_object::CoEObject;
use crate::error::ErrorMessage;

/// Ask the realtime thread to perform an SDO transfer for the given object (spec §4.6 "CoE update
/// request"). A read (`is_read: true`) uploads the object and publishes the result into the CoE
/// cache; a write (`is_read: false`) downloads `value` and, on success, publishes that same value
/// into the cache so a subsequent read observes it without a round trip.
#[derive(Debug, Clone)]
pub struct CoEUpdateRequest {
    pub object: CoEObject,
    pub is_read: bool,
    /// The bytes to write when `is_read` is false; ignored for reads.
    pub value: Vec<u8>,
}

/// Ask the realtime thread to write one PDO-mapped value on its next cycle.
#[derive(Debug, Clone)]
pub struct PdoWriteRequest {
    pub slave: u32,
    pub byte_offset: usize,
    pub bit_offset: u8,
    pub bytes: Vec<u8>,
}

/// Ask the realtime thread to zero a slave's error counter registers.
#[derive(Debug, Clone)]
pub struct RegisterResetRequest {
    pub slave_address: u16,
}

/// Any one of the requests the client thread can enqueue for the realtime thread.
#[derive(Debug, Clone)]
pub enum ClientRequest {
    CoEUpdate(CoEUpdateRequest),
    PdoWrite(PdoWriteRequest),
    RegisterReset(RegisterResetRequest),
}

/// The client-facing half: send requests, and receive whatever errors the realtime thread
/// couldn't attribute to a specific request (spec §4.6 "error publication").
#[derive(Clone)]
pub struct ClientQueueHandle {
    requests: Sender<ClientRequest>,
    errors: Receiver<ErrorMessage>,
}

impl ClientQueueHandle {
    pub fn send(&self, request: ClientRequest) -> Result<(), ClientRequest> {
        self.requests.send(request).map_err(|e| e.0)
    }

    /// Drain all errors published since the last call; never blocks.
    pub fn drain_errors(&self) -> Vec<ErrorMessage> {
        let mut out = Vec::new();
        loop {
            match self.errors.try_recv() {
                Ok(message) => out.push(message),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        out
    }
}

/// The realtime-thread-facing half of the same pair of channels.
pub struct RealtimeQueueHandle {
    requests: Receiver<ClientRequest>,
    errors: Sender<ErrorMessage>,
}

impl RealtimeQueueHandle {
    /// Drain every request queued since the last cycle; never blocks (spec §4.6
    /// "handle_client_requests runs at most once per cycle and never waits").
    pub fn drain_requests(&self) -> Vec<ClientRequest> {
        let mut out = Vec::new();
        loop {
            match self.requests.try_recv() {
                Ok(request) => out.push(request),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        out
    }

    pub fn publish_error(&self, message: ErrorMessage) {
        // A full/disconnected error channel means no one is listening; dropping the message is
        // correct since the realtime thread must never block on a slow or absent client.
        let _ = self.errors.send(message);
    }
}

/// Build a connected client/realtime queue pair.
pub fn channel() -> (ClientQueueHandle, RealtimeQueueHandle) {
    let (request_tx, request_rx) = crossbeam_channel::unbounded();
    let (error_tx, error_rx) = crossbeam_channel::unbounded();

    (
        ClientQueueHandle {
            requests: request_tx,
            errors: error_rx,
        },
        RealtimeQueueHandle {
            requests: request_rx,
            errors: error_tx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_object::{CoEAccess, GLOBAL_SLAVE};
    use crate::data_types::EtherCATDataType;
    use crate::error::ErrorSeverity;

    #[test]
    fn requests_enqueued_by_client_are_drained_by_realtime_side() {
        let (client, realtime) = channel();

        client
            .send(ClientRequest::RegisterReset(RegisterResetRequest { slave_address: 0x1001 }))
            .unwrap();

        let drained = realtime.drain_requests();
        assert_eq!(drained.len(), 1);
        assert!(realtime.drain_requests().is_empty());
    }

    #[test]
    fn errors_published_by_realtime_are_drained_by_client() {
        let (client, realtime) = channel();

        realtime.publish_error(ErrorMessage::for_slave(
            "timeout".to_string(),
            GLOBAL_SLAVE,
            ErrorSeverity::Medium,
        ));

        let drained = client.drain_errors();
        assert_eq!(drained.len(), 1);
        assert!(client.drain_errors().is_empty());
    }

    #[test]
    fn coe_update_request_round_trips() {
        let (client, realtime) = channel();

        let object = CoEObject {
            slave: 1,
            index: 0x6000,
            sub_index: 0,
            access: CoEAccess::READ_SAFE_OP,
            data_type: EtherCATDataType::Unsigned(16),
        };

        client
            .send(ClientRequest::CoEUpdate(CoEUpdateRequest {
                object: object.clone(),
                is_read: true,
                value: Vec::new(),
            }))
            .unwrap();

        match realtime.drain_requests().pop() {
            Some(ClientRequest::CoEUpdate(request)) => assert_eq!(request.object.index, object.index),
            other => panic!("unexpected request: {other:?}"),
        }
    }
}
