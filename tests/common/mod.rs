// Synthetic question bank PDFs for integration tests
#![allow(dead_code)]

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use std::path::{Path, PathBuf};

pub const CATEGORIES: u8 = 30;
pub const PAGE_HEIGHT: i64 = 800;
const LINE: i64 = 14;
const LABELS: [char; 4] = ['A', 'B', 'C', 'D'];

/// Knobs for breaking the generated bank in specific ways.
#[derive(Debug, Clone, Default)]
pub struct BankOptions {
    /// Leave out this category's heading line.
    pub skip_heading: Option<u8>,
    /// Add an eleventh question to this category.
    pub extra_question: Option<u8>,
}

pub fn correct_label(category: u8, sequence: u8) -> char {
    LABELS[(category as usize + sequence as usize) % 4]
}

fn text(value: &str) -> Object {
    let mut bytes = vec![0xFE, 0xFF];
    bytes.extend(value.encode_utf16().flat_map(|u| u.to_be_bytes()));
    Object::String(bytes, StringFormat::Hexadecimal)
}

struct PageBuilder {
    ops: Vec<Operation>,
    images: Vec<(String, ObjectId)>,
    y: i64,
}

impl PageBuilder {
    fn new(number: usize) -> Self {
        let mut page = Self { ops: Vec::new(), images: Vec::new(), y: 760 };
        page.line_at(72, 780, "TESTOVÉ ÚLOHY");
        page.line_at(300, 30, &number.to_string());
        page
    }

    fn line_at(&mut self, x: i64, y: i64, value: &str) {
        self.ops.extend([
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![Object::Name(b"F1".to_vec()), Object::Integer(10)]),
            Operation::new("Td", vec![Object::Integer(x), Object::Integer(y)]),
            Operation::new("Tj", vec![text(value)]),
            Operation::new("ET", vec![]),
        ]);
    }

    fn line(&mut self, value: &str) {
        let y = self.y;
        self.line_at(72, y, value);
        self.y -= LINE;
    }

    fn question(&mut self, category: u8, sequence: u8) {
        let text = match (category, sequence) {
            (5, 10) => "Které město je vyznačeno na mapě?".to_string(),
            (20, 5) => "Která z budov na obrázku je Pražský hrad?".to_string(),
            (22, 5) => "Který panovník je na obrázku?".to_string(),
            _ => format!("Jaká je správná odpověď na otázku {sequence} v okruhu {category}?"),
        };
        self.line(&format!("{sequence}. {text}"));
        for label in LABELS {
            self.line(&format!("{label}) Možnost {label}"));
        }
        self.line("Datum aktualizace testové úlohy: 1. 9. 2023");
        self.y -= 2 * LINE;
    }

    fn image(&mut self, id: ObjectId, x: i64, y: i64, w: i64, h: i64) {
        let name = format!("Im{}", self.images.len() + 1);
        self.ops.extend([
            Operation::new("q", vec![]),
            Operation::new("cm", [w, 0, 0, h, x, y].into_iter().map(Object::Integer).collect()),
            Operation::new("Do", vec![Object::Name(name.as_bytes().to_vec())]),
            Operation::new("Q", vec![]),
        ]);
        self.images.push((name, id));
    }
}

fn jpeg(doc: &mut Document, seed: u8, len: usize) -> ObjectId {
    let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0];
    data.extend((0..len).map(|i| seed.wrapping_add(i as u8)));
    doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => 40i64,
            "Height" => 30i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8i64,
            "Filter" => "DCTDecode",
        },
        data,
    ))
}

/// A 61-page bank: a cover page, then two pages per category.
///
/// Pictures sit under questions 5.10, 20.5 (one per option) and 22.5; the cover
/// carries one decorative picture and one artifact below the size threshold.
pub fn bank_pdf(options: &BankOptions) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let mut pages: Vec<PageBuilder> = Vec::new();

    let mut cover = PageBuilder::new(1);
    cover.line("BANKA TESTOVÝCH ÚLOH");
    let cover_picture = jpeg(&mut doc, 1, 600);
    cover.image(cover_picture, 100, 300, 400, 300);
    let artifact = jpeg(&mut doc, 2, 20);
    cover.image(artifact, 10, 10, 2, 2);
    pages.push(cover);

    for category in 1..=CATEGORIES {
        let mut first = PageBuilder::new(pages.len() + 1);
        if options.skip_heading != Some(category) {
            first.line(&format!("{category}. TÉMATICKÝ OKRUH {category}"));
        }
        first.y -= LINE;
        for sequence in 1..=5 {
            first.question(category, sequence);
        }
        match category {
            20 => {
                for (i, (x, y)) in [(72, 150), (200, 150), (72, 100), (200, 100)].into_iter().enumerate() {
                    let picture = jpeg(&mut doc, 20 + i as u8, 400 + i);
                    first.image(picture, x, y, 100, 40);
                }
            }
            22 => {
                let picture = jpeg(&mut doc, 22, 500);
                first.image(picture, 72, 100, 120, 90);
            }
            _ => {}
        }
        pages.push(first);

        let mut second = PageBuilder::new(pages.len() + 1);
        let last = if options.extra_question == Some(category) { 11 } else { 10 };
        for sequence in 6..=last {
            second.question(category, sequence);
        }
        let key = (1..=10)
            .map(|sequence| format!("{sequence}{}", correct_label(category, sequence)))
            .collect::<Vec<_>>()
            .join(", ");
        second.line(&format!("SPRÁVNÉ ŘEŠENÍ: {key}"));
        if category == 5 {
            let picture = jpeg(&mut doc, 5, 450);
            second.image(picture, 72, 60, 80, 40);
        }
        pages.push(second);
    }

    let mut kids = Vec::new();
    for page in pages {
        let content = Content { operations: page.ops }.encode().unwrap_or_default();
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));
        let mut xobjects = Dictionary::new();
        for (name, id) in page.images {
            xobjects.set(name.into_bytes(), id);
        }
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
                "XObject" => xobjects,
            },
        });
        kids.push(Object::from(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "MediaBox" => vec![Object::Integer(0), Object::Integer(0), Object::Integer(600), Object::Integer(PAGE_HEIGHT)],
        }),
    );
    let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).expect("serialize synthetic bank");
    buf
}

pub fn write_bank(dir: &Path, options: &BankOptions) -> PathBuf {
    let path = dir.join("banka.pdf");
    std::fs::write(&path, bank_pdf(options)).expect("write synthetic bank");
    path
}

/// The default bank with a standard security handler entry in its trailer.
pub fn write_encrypted_bank(dir: &Path) -> PathBuf {
    let mut doc = Document::load_mem(&bank_pdf(&BankOptions::default())).expect("reload synthetic bank");
    let encrypt_id = doc.add_object(dictionary! {
        "Filter" => "Standard",
        "V" => 2i64,
        "R" => 3i64,
        "Length" => 128i64,
        "O" => Object::string_literal(vec![0x11u8; 32]),
        "U" => Object::string_literal(vec![0x22u8; 32]),
        "P" => -3904i64,
    });
    doc.trailer.set("Encrypt", encrypt_id);
    let path = dir.join("zamceno.pdf");
    doc.save(&path).expect("write encrypted bank");
    path
}
