//! Shared byte-access primitives for the dwarfcheck workspace.
//!
//! The only export is [`ByteView`], a smart pointer handing out `&[u8]` over
//! either a memory-mapped file or an owned buffer. The checking library works
//! exclusively on borrowed byte slices; this type is what owns them.

mod byteview;

pub use crate::byteview::ByteView;
