//! Traits used to pack/unpack structs and enums from EtherCAT wire formats:
//! frame/PDU fields, ESC register values and the binary log codec.
//!
//! This crate is internal to `etherkitten-reader` and kept deliberately small:
//! composite types implement [`EtherCatWire`] by hand (see `al_control.rs`-style
//! manual impls in the main crate) rather than via a derive macro, since the
//! log codec's block shapes (CStrings, TLV streams, length-prefixed blobs)
//! don't fit a single bit-packed struct deriver.

#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(trivial_casts)]
#![deny(trivial_numeric_casts)]
#![deny(unused_import_braces)]
#![deny(unused_qualifications)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]

mod error;
mod impls;

pub use error::WireError;

/// A type to be sent/received on the wire, according to EtherCAT spec rules (packed bits, little
/// endian).
pub trait EtherCatWire<'a>: Sized {
    // /// The number of bytes rounded up that can hold this type.
    // const BYTES: usize;

    /// Pack the type and write it into the beginning of `buf`.
    ///
    /// The default implementation of this method will return an error if the buffer is not long
    /// enough.
    fn pack_to_slice<'buf>(&self, buf: &'buf mut [u8]) -> Result<&'buf [u8], WireError> {
        if buf.len() < self.packed_len() {
            return Err(WireError::WriteBufferTooShort {
                expected: self.packed_len(),
                got: buf.len(),
            });
        }

        Ok(self.pack_to_slice_unchecked(buf))
    }

    /// Pack the type and write it into the beginning of `buf`.
    ///
    /// # Panics
    ///
    /// This method must panic if `buf` is too short to hold the packed data.
    fn pack_to_slice_unchecked<'buf>(&self, buf: &'buf mut [u8]) -> &'buf [u8];

    /// Unpack this type from the beginning of the given buffer.
    fn unpack_from_slice(buf: &'a [u8]) -> Result<Self, WireError>;

    /// Get the length in bytes of this item when packed.
    fn packed_len(&self) -> usize;
}

/// Implemented for types with a known size at compile time (pretty much everything that isn't a
/// `&[u8]`).
pub trait EtherCatWireSized<'a>: EtherCatWire<'a> {
    /// Packed size in bytes.
    const BYTES: usize;

    /// Used to define an array of the correct length. This type should ALWAYS be of the form `[u8;
    /// N]` where `N` is a fixed value or const generic as per the type this trait is implemented
    /// on.
    type Arr: AsRef<[u8]> + AsMut<[u8]>;

    /// Pack this item to a fixed sized array.
    fn pack(&self) -> Self::Arr;

    /// Create a buffer sized to contain the packed representation of this item.
    fn buffer() -> Self::Arr;
}
