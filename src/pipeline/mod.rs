// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

pub mod controller;
pub mod decode;
pub mod delta;
pub mod writer;

pub use controller::{Controller, ControllerState, Gate, SkipReason, TickGates, TickReport};
pub use decode::{decode_item, DecodeItem, DecodePackage, DecodePool, DecodedItem};
pub use delta::{compute_delta, CacheSnapshot, ChecksumMap, Delta};
pub use writer::{BulkWriter, WriteOp, WriteReport, WriterConfig};
