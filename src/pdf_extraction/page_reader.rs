// Page reader - walks page content streams in document order, collecting text runs and images
use super::images::{self, EncodedImage};
use super::lopdf_helper::{
    content_data, get, get_name, get_number, inherited, load_pdf, media_box, resolve, resolve_dict,
    resolve_stream, stream_bytes,
};
use super::text_decoding::FontDecoder;
use crate::types::{DatabankaError, Result};
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

// Form XObjects nested deeper than this are skipped.
const MAX_FORM_DEPTH: usize = 8;
// TJ adjustments beyond this many thousandths of an em read as a word gap.
const TJ_SPACE_THRESHOLD: f32 = 200.0;
// Gap between two runs on one line, in ems, above which they are separate words.
const WORD_GAP_EM: f32 = 0.15;

/// 2D affine transform `[a b c d e f]` in PDF row-vector convention.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Matrix(pub [f32; 6]);

impl Matrix {
    pub const IDENTITY: Matrix = Matrix([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    pub fn translate(tx: f32, ty: f32) -> Self {
        Matrix([1.0, 0.0, 0.0, 1.0, tx, ty])
    }

    /// `self × other`: apply `self` first, then `other`.
    pub fn then(&self, other: &Matrix) -> Matrix {
        let [a, b, c, d, e, f] = self.0;
        let [a2, b2, c2, d2, e2, f2] = other.0;
        Matrix([
            a * a2 + b * c2,
            a * b2 + b * d2,
            c * a2 + d * c2,
            c * b2 + d * d2,
            e * a2 + f * c2 + e2,
            e * b2 + f * d2 + f2,
        ])
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        let [a, b, c, d, e, f] = self.0;
        (a * x + c * y + e, b * x + d * y + f)
    }

    fn from_operands(operands: &[Object]) -> Option<Matrix> {
        if operands.len() < 6 {
            return None;
        }
        let mut values = [0.0f32; 6];
        for (slot, operand) in values.iter_mut().zip(operands) {
            *slot = get_number(operand)?;
        }
        Some(Matrix(values))
    }

    fn vertical_scale(&self) -> f32 {
        let [_, _, c, d, _, _] = self.0;
        (c * c + d * d).sqrt()
    }
}

/// Axis-aligned rectangle in page space.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Rect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl Rect {
    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    fn unit_square(ctm: &Matrix) -> Rect {
        let corners = [ctm.apply(0.0, 0.0), ctm.apply(1.0, 0.0), ctm.apply(0.0, 1.0), ctm.apply(1.0, 1.0)];
        let xs = corners.iter().map(|c| c.0);
        let ys = corners.iter().map(|c| c.1);
        Rect {
            x0: xs.clone().fold(f32::INFINITY, f32::min),
            x1: xs.fold(f32::NEG_INFINITY, f32::max),
            y0: ys.clone().fold(f32::INFINITY, f32::min),
            y1: ys.fold(f32::NEG_INFINITY, f32::max),
        }
    }
}

/// One painted text string with its origin in page space.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub text: String,
    pub x: f32,
    pub y: f32,
    /// Pen x after the string was shown.
    pub end_x: f32,
    pub font_size: f32,
    /// Paint order within the page.
    pub seq: usize,
}

/// An embedded raster image as placed on a page.
#[derive(Debug, Clone, PartialEq)]
pub struct RawImage {
    pub page: u32,
    /// 1-based position among the images of its page.
    pub page_index: u32,
    /// 1-based, document-wide paint order.
    pub extraction_order: u32,
    pub rect: Rect,
    /// Distance of the image's top edge from the top of the page.
    pub depth: f32,
    pub encoded: EncodedImage,
}

/// A visual line: runs sharing a baseline, left to right.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub page: u32,
    /// 1-based line index within the page.
    pub index: usize,
    pub text: String,
    pub x: f32,
    /// Distance of the baseline from the top of the page.
    pub depth: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub number: u32,
    pub width: f32,
    pub height: f32,
    /// y of the page's top edge.
    pub top: f32,
    pub runs: Vec<TextRun>,
    pub images: Vec<RawImage>,
}

impl Page {
    /// Group runs into visual lines, top to bottom.
    pub fn lines(&self, row_tolerance: f32) -> Vec<TextLine> {
        let mut runs: Vec<&TextRun> = self.runs.iter().filter(|r| !r.text.trim().is_empty()).collect();
        runs.sort_by(|a, b| b.y.total_cmp(&a.y).then(a.x.total_cmp(&b.x)).then(a.seq.cmp(&b.seq)));

        let mut rows: Vec<Vec<&TextRun>> = Vec::new();
        for run in runs {
            match rows.last_mut() {
                Some(row) if (row[0].y - run.y).abs() <= row_tolerance => row.push(run),
                _ => rows.push(vec![run]),
            }
        }

        rows.into_iter()
            .enumerate()
            .map(|(i, mut row)| {
                row.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.seq.cmp(&b.seq)));
                let text = join_runs(&row);
                TextLine {
                    page: self.number,
                    index: i + 1,
                    text,
                    x: row[0].x,
                    depth: self.top - row[0].y,
                }
            })
            .collect()
    }
}

// Runs split mid-word (a bold syllable, say) touch; separate words leave a gap.
fn join_runs(row: &[&TextRun]) -> String {
    let mut joined = String::new();
    let mut previous: Option<&TextRun> = None;
    for run in row {
        if let Some(previous) = previous {
            let em = previous.font_size.max(run.font_size);
            let separated = run.x - previous.end_x > WORD_GAP_EM * em;
            if separated && !joined.ends_with(char::is_whitespace) && !run.text.starts_with(char::is_whitespace) {
                joined.push(' ');
            }
        }
        joined.push_str(&run.text);
        previous = Some(run);
    }
    joined.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Read-only view over one PDF, handing out pages lazily in document order.
pub struct PdfReader {
    path: PathBuf,
    document: Document,
    page_ids: Vec<(u32, ObjectId)>,
}

impl PdfReader {
    pub fn open(path: &Path) -> Result<Self> {
        let document = load_pdf(path)?;
        let page_ids = document.get_pages().into_iter().collect();
        log::debug!("[reader] opened {}", path.display());
        Ok(Self { path: path.to_path_buf(), document, page_ids })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    /// A fresh pass over every page. Each call starts extraction order from 1 again.
    pub fn pages(&self) -> Pages<'_> {
        Pages { reader: self, next: 0, extraction_order: 0 }
    }

    fn read_page(&self, number: u32, page_id: ObjectId, extraction_order: &mut u32) -> Result<Page> {
        let page_dict = self
            .document
            .get_object(page_id)
            .and_then(|o| o.as_dict())
            .map_err(|e| self.unreadable(format!("page {number}: {e}")))?;
        let [x0, y0, x1, y1] = media_box(&self.document, page_dict);

        let mut interpreter = Interpreter::new(&self.document, number, extraction_order);
        if let Some(contents) = page_dict.get(b"Contents").ok() {
            let data = content_data(&self.document, contents)
                .map_err(|e| self.unreadable(format!("page {number}: {e}")))?;
            let content = Content::decode(&data)
                .map_err(|e| self.unreadable(format!("page {number} content stream: {e}")))?;
            let resources = inherited(&self.document, page_dict, b"Resources")
                .and_then(|r| resolve_dict(&self.document, r));
            interpreter.run(&content, resources, Matrix::IDENTITY, 0);
        }
        let (runs, raw_images) = interpreter.finish();

        let images = raw_images
            .into_iter()
            .map(|placed| RawImage {
                page: number,
                page_index: placed.page_index,
                extraction_order: placed.extraction_order,
                depth: y1 - placed.rect.y1,
                rect: placed.rect,
                encoded: placed.encoded,
            })
            .collect::<Vec<_>>();

        log::debug!("[reader] page {}: {} runs, {} images", number, runs.len(), images.len());
        Ok(Page { number, width: x1 - x0, height: y1 - y0, top: y1, runs, images })
    }

    fn unreadable(&self, reason: String) -> DatabankaError {
        DatabankaError::UnreadablePdf { path: self.path.clone(), reason }
    }
}

/// Lazy, single-pass page sequence.
pub struct Pages<'a> {
    reader: &'a PdfReader,
    next: usize,
    extraction_order: u32,
}

impl Iterator for Pages<'_> {
    type Item = Result<Page>;

    fn next(&mut self) -> Option<Self::Item> {
        let (number, page_id) = *self.reader.page_ids.get(self.next)?;
        self.next += 1;
        Some(self.reader.read_page(number, page_id, &mut self.extraction_order))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.reader.page_ids.len().saturating_sub(self.next);
        (left, Some(left))
    }
}

struct PlacedImage {
    page_index: u32,
    extraction_order: u32,
    rect: Rect,
    encoded: EncodedImage,
}

#[derive(Clone)]
struct TextState {
    font: Vec<u8>,
    font_size: f32,
    leading: f32,
    char_spacing: f32,
    word_spacing: f32,
    /// `Tz` as a fraction.
    horizontal_scaling: f32,
    matrix: Matrix,
    line_matrix: Matrix,
}

impl Default for TextState {
    fn default() -> Self {
        Self {
            font: Vec::new(),
            font_size: 12.0,
            leading: 0.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            horizontal_scaling: 1.0,
            matrix: Matrix::IDENTITY,
            line_matrix: Matrix::IDENTITY,
        }
    }
}

impl TextState {
    /// Move the pen along the baseline by `tx` unscaled text space units.
    fn advance(&mut self, tx: f32) {
        self.matrix = Matrix::translate(tx * self.horizontal_scaling, 0.0).then(&self.matrix);
    }
}

// Content stream interpreter for a single page, recursing into form XObjects.
struct Interpreter<'a> {
    document: &'a Document,
    page: u32,
    extraction_order: &'a mut u32,
    runs: Vec<TextRun>,
    images: Vec<PlacedImage>,
    seen_images: HashSet<ObjectId>,
    fonts: BTreeMap<(usize, Vec<u8>), FontDecoder>,
    fallback_font: FontDecoder,
}

impl<'a> Interpreter<'a> {
    fn new(document: &'a Document, page: u32, extraction_order: &'a mut u32) -> Self {
        Self {
            document,
            page,
            extraction_order,
            runs: Vec::new(),
            images: Vec::new(),
            seen_images: HashSet::new(),
            fonts: BTreeMap::new(),
            fallback_font: FontDecoder::default(),
        }
    }

    fn finish(self) -> (Vec<TextRun>, Vec<PlacedImage>) {
        (self.runs, self.images)
    }

    fn run(&mut self, content: &Content, resources: Option<&'a Dictionary>, base: Matrix, depth: usize) {
        let mut ctm = base;
        let mut stack: Vec<(Matrix, TextState)> = Vec::new();
        let mut text = TextState::default();

        for op in &content.operations {
            let operands = op.operands.as_slice();
            match op.operator.as_str() {
                "q" => stack.push((ctm, text.clone())),
                "Q" => {
                    if let Some((saved_ctm, saved_text)) = stack.pop() {
                        ctm = saved_ctm;
                        text = saved_text;
                    }
                }
                "cm" => {
                    if let Some(m) = Matrix::from_operands(operands) {
                        ctm = m.then(&ctm);
                    }
                }
                "BT" => {
                    text.matrix = Matrix::IDENTITY;
                    text.line_matrix = Matrix::IDENTITY;
                }
                "Tf" => {
                    if let [Object::Name(name), size, ..] = operands {
                        text.font = name.clone();
                        text.font_size = get_number(size).unwrap_or(text.font_size);
                    }
                }
                "TL" => {
                    if let Some(leading) = operands.first().and_then(get_number) {
                        text.leading = leading;
                    }
                }
                "Td" | "TD" => {
                    if let [tx, ty, ..] = operands {
                        let (tx, ty) = (get_number(tx).unwrap_or(0.0), get_number(ty).unwrap_or(0.0));
                        if op.operator == "TD" {
                            text.leading = -ty;
                        }
                        text.line_matrix = Matrix::translate(tx, ty).then(&text.line_matrix);
                        text.matrix = text.line_matrix;
                    }
                }
                "Tm" => {
                    if let Some(m) = Matrix::from_operands(operands) {
                        text.line_matrix = m;
                        text.matrix = m;
                    }
                }
                "Tc" => {
                    if let Some(spacing) = operands.first().and_then(get_number) {
                        text.char_spacing = spacing;
                    }
                }
                "Tw" => {
                    if let Some(spacing) = operands.first().and_then(get_number) {
                        text.word_spacing = spacing;
                    }
                }
                "Tz" => {
                    if let Some(scale) = operands.first().and_then(get_number) {
                        text.horizontal_scaling = scale / 100.0;
                    }
                }
                "T*" => next_line(&mut text),
                "Tj" => {
                    if let Some(s) = operands.first() {
                        self.show(resources, &mut text, &ctm, std::slice::from_ref(s));
                    }
                }
                "'" => {
                    next_line(&mut text);
                    if let Some(s) = operands.first() {
                        self.show(resources, &mut text, &ctm, std::slice::from_ref(s));
                    }
                }
                "\"" => {
                    if let [aw, ac, s, ..] = operands {
                        text.word_spacing = get_number(aw).unwrap_or(text.word_spacing);
                        text.char_spacing = get_number(ac).unwrap_or(text.char_spacing);
                        next_line(&mut text);
                        self.show(resources, &mut text, &ctm, std::slice::from_ref(s));
                    }
                }
                "TJ" => {
                    if let Some(Object::Array(parts)) = operands.first() {
                        self.show(resources, &mut text, &ctm, parts);
                    }
                }
                "Do" => {
                    if let Some(Object::Name(name)) = operands.first() {
                        self.draw_xobject(resources, name, &ctm, depth);
                    }
                }
                _ => {}
            }
        }
    }

    // Paint strings and TJ adjustments as one run, advancing the pen past each glyph.
    fn show(&mut self, resources: Option<&'a Dictionary>, text: &mut TextState, ctm: &Matrix, parts: &[Object]) {
        let start = text.matrix.then(ctm);
        let (x, y) = start.apply(0.0, 0.0);
        let font_size = text.font_size * start.vertical_scale();

        let mut shown = String::new();
        for part in parts {
            match part {
                Object::String(bytes, _) => {
                    let font = self.font(resources, &text.font);
                    shown.push_str(&font.decode(bytes));
                    let tx: f32 = font
                        .glyphs(bytes)
                        .iter()
                        .map(|glyph| {
                            let word = if glyph.word_space { text.word_spacing } else { 0.0 };
                            glyph.width / 1000.0 * text.font_size + text.char_spacing + word
                        })
                        .sum();
                    text.advance(tx);
                }
                other => {
                    let adjustment = get_number(other).unwrap_or(0.0);
                    if adjustment < -TJ_SPACE_THRESHOLD && !shown.ends_with(' ') {
                        shown.push(' ');
                    }
                    text.advance(-adjustment / 1000.0 * text.font_size);
                }
            }
        }

        if shown.trim().is_empty() {
            return;
        }
        let (end_x, _) = text.matrix.then(ctm).apply(0.0, 0.0);
        let seq = self.runs.len();
        self.runs.push(TextRun { text: shown, x, y, end_x, font_size, seq });
    }

    fn font(&mut self, resources: Option<&'a Dictionary>, font: &[u8]) -> &FontDecoder {
        let Some(resources) = resources else {
            return &self.fallback_font;
        };
        let document = self.document;
        // fonts are keyed per resource dictionary since forms may rebind names
        let key = (resources as *const Dictionary as usize, font.to_vec());
        self.fonts.entry(key).or_insert_with(|| {
            get(document, resources, b"Font")
                .and_then(|fonts| match fonts {
                    Object::Dictionary(dict) => dict.get(font).ok(),
                    _ => None,
                })
                .and_then(|f| resolve_dict(document, f))
                .map(|f| FontDecoder::from_font(document, f))
                .unwrap_or_default()
        })
    }

    fn draw_xobject(&mut self, resources: Option<&'a Dictionary>, name: &[u8], ctm: &Matrix, depth: usize) {
        let document = self.document;
        let Some(entry) = resources
            .and_then(|r| get(document, r, b"XObject"))
            .and_then(|x| match x {
                Object::Dictionary(dict) => dict.get(name).ok(),
                _ => None,
            })
        else {
            log::debug!("[reader] page {}: XObject /{} not found", self.page, String::from_utf8_lossy(name));
            return;
        };
        let object_id = match entry {
            Object::Reference(id) => Some(*id),
            _ => None,
        };
        let Some(stream) = resolve_stream(document, entry) else {
            return;
        };

        match get_name(document, &stream.dict, b"Subtype") {
            Some(b"Image") => {
                if let Some(id) = object_id {
                    if !self.seen_images.insert(id) {
                        return;
                    }
                }
                *self.extraction_order += 1;
                let encoded = images::encode(document, stream).unwrap_or_else(|e| {
                    log::warn!("[reader] page {}: image could not be encoded ({}), keeping raw bytes", self.page, e);
                    let width = lopdf_dimension(document, &stream.dict, b"Width");
                    let height = lopdf_dimension(document, &stream.dict, b"Height");
                    EncodedImage::raw(stream, width, height)
                });
                self.images.push(PlacedImage {
                    page_index: self.images.len() as u32 + 1,
                    extraction_order: *self.extraction_order,
                    rect: Rect::unit_square(ctm),
                    encoded,
                });
            }
            Some(b"Form") => {
                if depth >= MAX_FORM_DEPTH {
                    log::warn!("[reader] page {}: form XObjects nested too deep, skipping", self.page);
                    return;
                }
                let form_matrix = match get(document, &stream.dict, b"Matrix") {
                    Some(Object::Array(values)) => Matrix::from_operands(
                        &values.iter().map(|v| resolve(document, v).clone()).collect::<Vec<_>>(),
                    )
                    .unwrap_or(Matrix::IDENTITY),
                    _ => Matrix::IDENTITY,
                };
                let form_resources = get(document, &stream.dict, b"Resources")
                    .and_then(|r| resolve_dict(document, r))
                    .or(resources);
                let content = stream_bytes(stream).ok().and_then(|data| Content::decode(&data).ok());
                match content {
                    Some(content) => self.run(&content, form_resources, form_matrix.then(ctm), depth + 1),
                    None => log::warn!("[reader] page {}: unreadable form XObject skipped", self.page),
                }
            }
            _ => {}
        }
    }
}

fn next_line(text: &mut TextState) {
    text.line_matrix = Matrix::translate(0.0, -text.leading).then(&text.line_matrix);
    text.matrix = text.line_matrix;
}

fn lopdf_dimension(document: &Document, dict: &Dictionary, key: &[u8]) -> u32 {
    super::lopdf_helper::get_u32(document, dict, key).unwrap_or(0)
}
