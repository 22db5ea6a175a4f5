//! Codec platforms backed by system media frameworks.

mod gst_codecs;

pub use gst_codecs::{GstDecoder, GstEncoder, GstPlatform};
