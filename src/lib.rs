//! EtherKITten bus-interaction subsystem: EtherCAT master enumeration, the realtime reader loop,
//! time-series history storage, the client/realtime message bus, the binary log codec/writer/
//! replay reader, and the error-statistics engine.
//!
//! See [`reader::Reader`] for the public entry point.

pub mod bus_info;
pub mod bus_reader;
pub mod coe;
pub mod coe_cache;
pub mod data_object;
pub mod data_types;
pub mod error;
pub mod error_statistician;
pub mod esi;
pub mod frame;
pub mod link_layer;
pub mod log;
pub mod message_queue;
pub mod reader;
pub mod register;
pub mod scheduler;
pub mod search_list;
pub mod slave_info;
pub mod slave_informant;
pub mod time;
pub mod triple_buffer;
pub mod views;

pub use error::Error;
pub use reader::Reader;
