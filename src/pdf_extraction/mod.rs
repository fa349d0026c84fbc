// PDF extraction module
pub mod images;
pub mod lopdf_helper;
pub mod page_reader;
pub mod text_decoding;

pub use images::EncodedImage;
pub use page_reader::{Page, PdfReader, RawImage, Rect, TextLine, TextRun};
