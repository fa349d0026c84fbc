// lopdf helper - loading and object resolution shared by the page reader and image encoder
use crate::types::{DatabankaError, Result};
use lopdf::{Dictionary, Document, Object, Stream};
use std::path::Path;

// Guards against reference cycles and runaway Parent chains.
const MAX_REF_DEPTH: usize = 32;

/// Load a PDF document, refusing anything the pipeline cannot read page by page.
pub fn load_pdf(path: &Path) -> Result<Document> {
    let unreadable = |reason: String| DatabankaError::UnreadablePdf {
        path: path.to_path_buf(),
        reason,
    };

    if !path.is_file() {
        return Err(unreadable("file not found".to_string()));
    }
    let document = Document::load(path).map_err(|e| unreadable(e.to_string()))?;
    // lopdf leaves `/Encrypt` in the trailer and the strings still enciphered
    if document.trailer.get(b"Encrypt").is_ok() || document.is_encrypted() {
        return Err(unreadable("document is encrypted".to_string()));
    }
    if document.get_pages().is_empty() {
        return Err(unreadable("document has no pages".to_string()));
    }
    Ok(document)
}

/// Follow indirect references until a direct object is reached.
pub fn resolve<'a>(document: &'a Document, object: &'a Object) -> &'a Object {
    let mut current = object;
    for _ in 0..MAX_REF_DEPTH {
        match current {
            Object::Reference(id) => match document.get_object(*id) {
                Ok(next) => current = next,
                Err(_) => return current,
            },
            _ => return current,
        }
    }
    current
}

pub fn resolve_dict<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Dictionary> {
    match resolve(document, object) {
        Object::Dictionary(dict) => Some(dict),
        Object::Stream(stream) => Some(&stream.dict),
        _ => None,
    }
}

pub fn resolve_stream<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Stream> {
    match resolve(document, object) {
        Object::Stream(stream) => Some(stream),
        _ => None,
    }
}

/// Look a key up in a dictionary, resolving references on the way.
pub fn get<'a>(document: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    dict.get(key).ok().map(|object| resolve(document, object))
}

/// Look a page attribute up, walking the `/Parent` chain for inherited values.
pub fn inherited<'a>(document: &'a Document, page: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    let mut current = page;
    for _ in 0..MAX_REF_DEPTH {
        if let Some(value) = get(document, current, key) {
            return Some(value);
        }
        current = resolve_dict(document, current.get(b"Parent").ok()?)?;
    }
    None
}

pub fn get_number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(f) => Some(*f),
        _ => None,
    }
}

pub fn get_name<'a>(document: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a [u8]> {
    match get(document, dict, key)? {
        Object::Name(name) => Some(name.as_slice()),
        _ => None,
    }
}

pub fn get_u32(document: &Document, dict: &Dictionary, key: &[u8]) -> Option<u32> {
    match get(document, dict, key)? {
        Object::Integer(i) if *i >= 0 => u32::try_from(*i).ok(),
        Object::Real(f) if *f >= 0.0 => Some(*f as u32),
        _ => None,
    }
}

/// Page MediaBox as `[x0, y0, x1, y1]`, defaulting to US Letter.
pub fn media_box(document: &Document, page: &Dictionary) -> [f32; 4] {
    if let Some(Object::Array(values)) = inherited(document, page, b"MediaBox") {
        let bounds: Vec<f32> = values
            .iter()
            .filter_map(|v| get_number(resolve(document, v)))
            .collect();
        if let [x0, y0, x1, y1] = bounds[..] {
            return [x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)];
        }
    }
    [0.0, 0.0, 612.0, 792.0]
}

/// Raw bytes of a stream with its filters undone, when lopdf knows them.
pub fn stream_bytes(stream: &Stream) -> Result<Vec<u8>> {
    if stream.dict.get(b"Filter").is_ok() {
        stream.decompressed_content().map_err(|e| {
            DatabankaError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
        })
    } else {
        Ok(stream.content.clone())
    }
}

/// Concatenated content of a page's `/Contents`, which may be a stream or an array of them.
pub fn content_data(document: &Document, contents: &Object) -> Result<Vec<u8>> {
    match resolve(document, contents) {
        Object::Stream(stream) => stream_bytes(stream),
        Object::Array(parts) => {
            let mut data = Vec::new();
            for part in parts {
                data.extend_from_slice(&content_data(document, part)?);
                data.push(b'\n');
            }
            Ok(data)
        }
        _ => Ok(Vec::new()),
    }
}

/// Filter names of a stream, outermost first.
pub fn filters<'a>(document: &'a Document, stream: &'a Stream) -> Vec<&'a [u8]> {
    match get(document, &stream.dict, b"Filter") {
        Some(Object::Name(name)) => vec![name.as_slice()],
        Some(Object::Array(names)) => names
            .iter()
            .filter_map(|n| match resolve(document, n) {
                Object::Name(name) => Some(name.as_slice()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}
