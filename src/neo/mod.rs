//! NEO intermediate markup
//!
//! The encoder linearizes reading-ordered page elements into NEO lines; the
//! decoder turns NEO text back into styled blocks for the render targets.

mod decode;
pub mod directive;
mod encode;

pub use decode::{decode, Block, DecodeOptions, DecodedDocument, ImagePlacement, TextStyle};
pub use directive::{to_neo_text, Directive};
pub use encode::{
    encode_document, encode_elements, EncodeOptions, EncodedDocument, NeoEncoder,
    SourceFontPolicy, DEFAULT_FAMILY, MIN_FONT_SIZE,
};
