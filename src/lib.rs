//! taglog records positioning-system test traffic. A tag under test (BLE
//! angle-of-arrival, UWB, or a motion-capture bridge) streams JSON messages
//! over UDP; the listener receives them one datagram at a time, stamps each
//! with a monotonic arrival time, and appends them to a per-run CSV file
//! whose columns are discovered from the first message of the run. Offline
//! plotting scripts then consume those files to compare the tag's position
//! estimates against motion-capture ground truth.
//!
//! The pipeline is: datagram -> decode -> arrival stamp -> flatten ->
//! append row. Nested JSON objects are projected to dotted-path columns
//! (`nested.data`), lists are kept as a single serialized column, and the
//! column set is fixed for the whole run by the first message the logger
//! sees.

#![warn(missing_docs)]
pub mod args;
pub mod flatten;
pub mod receiver;
pub mod row_logger;
