// #![warn(missing_docs)]

//! Field selection and change-driven synchronization for EPICS pvData structures.
//!
//! pvAccess clients rarely want a whole record. They name the fields they care
//! about, and any per-field options, in a short request string:
//!
//! ```text
//! record[process=true]field(alarm,timeStamp[algorithm=onChange],power{value,alarm})
//! ```
//!
//! This crate turns such a request into a reduced "copy" of the record
//! structure, and then keeps copies and the master record in step by moving
//! only the fields marked as changed in a [`BitSet`]. It is separated into:
//!
//! - [`request`]: parsing the pvRequest mini-language into a [`SelectionTree`].
//! - [`copy`]: [`PVCopy`], which builds the copy type for a master and a
//!   selection, translates offsets between them, and synchronizes values in
//!   either direction.
//! - [`bitset`]: the growable [`BitSet`] of changed field offsets, with the
//!   pvAccess wire encoding.
//! - [`plugin`]: hooks for per-field options that change how a field is
//!   copied (e.g. a deadband), looked up in an explicit [`PluginRegistry`].
//! - [`introspect`], [`pvdata`], [`scalar`] and [`standard`]: a compact model of
//!   pvData types and values for the above to work on.
//!
//! ## Example
//!
//! ```
//! use pvcopy::{BitSet, PVCopy, PVStructure, create_request, scalar::ScalarType,
//!     standard::StandardField};
//!
//! let nt = StandardField::default().scalar(ScalarType::Double, "alarm,timeStamp").unwrap();
//! let mut master = PVStructure::new(nt);
//! master.put_f64("value", 0.04).unwrap();
//!
//! let request = create_request("value,alarm").unwrap();
//! let engine = PVCopy::build(&master, request.pv_structure(), None).unwrap();
//! let mut copy = engine.create_copy();
//! let mut bits = BitSet::new();
//! engine.init_copy(&master, &mut copy, &mut bits);
//! assert_eq!(copy.get_f64("value"), Some(0.04));
//!
//! master.put_f64("value", 0.06).unwrap();
//! bits.clear_all();
//! engine.update_copy_set_bitset(&master, &mut copy, &mut bits);
//! assert_eq!(bits.to_string(), "{1}");
//! ```

pub mod bitset;
pub mod codec;
pub mod copy;
pub mod introspect;
pub mod plugin;
pub mod pvdata;
pub mod request;
pub mod scalar;
pub mod standard;

pub use crate::bitset::BitSet;
pub use crate::copy::{CopyBuilder, CopyError, PVCopy};
pub use crate::plugin::{PVFilter, PVPlugin, PluginRegistry};
pub use crate::pvdata::{PVField, PVStructure};
pub use crate::request::{ParseError, RequestParser, SelectionTree, create_request};
