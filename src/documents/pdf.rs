//! A4 protocol PDF built directly from lopdf objects.
//!
//! Text uses the standard Helvetica faces with WinAnsi encoding, so no font
//! files are embedded. Characters outside WinAnsi are transliterated.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use rust_decimal::Decimal;

use super::{DocumentContext, DocumentError};
use crate::config::CONFIG;
use crate::database::models::protocol::decode_signature;

const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 842.0;
const MARGIN: f32 = 50.0;
const CONTENT_WIDTH: f32 = PAGE_WIDTH - 2.0 * MARGIN;
const BOTTOM_LIMIT: f32 = 70.0;

const BODY_SIZE: f32 = 10.0;
const SMALL_SIZE: f32 = 8.0;
const LINE_GAP: f32 = 1.35;
const CELL_PADDING: f32 = 4.0;

// No. | Description | Qty | Unit
const COLUMN_WIDTHS: [f32; 4] = [32.0, CONTENT_WIDTH - 32.0 - 70.0 - 60.0, 70.0, 60.0];

const SIGNATURE_BOX_WIDTH: f32 = 200.0;
const SIGNATURE_BOX_HEIGHT: f32 = 80.0;

#[derive(Clone, Copy)]
enum Font {
    Regular,
    Bold,
}

impl Font {
    fn resource(self) -> &'static str {
        match self {
            Font::Regular => "F1",
            Font::Bold => "F2",
        }
    }
}

/// Encodes text for a WinAnsi (cp1252) font
pub fn win_ansi(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for c in text.chars() {
        let byte = match c {
            '\u{20}'..='\u{7e}' => c as u8,
            '\u{a0}'..='\u{ff}' => c as u32 as u8,
            '€' => 0x80,
            '‚' => 0x82,
            '„' => 0x84,
            '…' => 0x85,
            '‘' => 0x91,
            '’' => 0x92,
            '“' => 0x93,
            '”' => 0x94,
            '•' => 0x95,
            '–' => 0x96,
            '—' => 0x97,
            '™' => 0x99,
            'Š' => 0x8a,
            'š' => 0x9a,
            'Ž' => 0x8e,
            'ž' => 0x9e,
            '\t' => b' ',
            other => match transliterate(other) {
                Some(ascii) => ascii,
                None => b'?',
            },
        };
        out.push(byte);
    }
    out
}

fn transliterate(c: char) -> Option<u8> {
    let ascii = match c {
        'ą' | 'ă' | 'ā' => 'a',
        'Ą' | 'Ă' | 'Ā' => 'A',
        'ć' | 'č' => 'c',
        'Ć' | 'Č' => 'C',
        'ę' | 'ě' | 'ē' => 'e',
        'Ę' | 'Ě' | 'Ē' => 'E',
        'ł' => 'l',
        'Ł' => 'L',
        'ń' | 'ň' => 'n',
        'Ń' | 'Ň' => 'N',
        'ś' | 'ş' => 's',
        'Ś' | 'Ş' => 'S',
        'ź' | 'ż' => 'z',
        'Ź' | 'Ż' => 'Z',
        'ř' => 'r',
        'Ř' => 'R',
        'ť' => 't',
        'Ť' => 'T',
        'ů' | 'ű' => 'u',
        'Ů' | 'Ű' => 'U',
        'ő' => 'o',
        'Ő' => 'O',
        'ď' => 'd',
        'Ď' => 'D',
        _ => return None,
    };
    Some(ascii as u8)
}

/// Approximate Helvetica advance width
fn text_width(text: &str, font: Font, size: f32) -> f32 {
    let factor = match font {
        Font::Regular => 0.5,
        Font::Bold => 0.55,
    };
    text.chars().count() as f32 * size * factor
}

/// Greedy word wrap; words longer than a line are split
fn wrap(text: &str, max_width: f32, font: Font, size: f32) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut line = String::new();
        for word in paragraph.split_whitespace() {
            let candidate = if line.is_empty() { word.to_string() } else { format!("{} {}", line, word) };
            if text_width(&candidate, font, size) <= max_width {
                line = candidate;
                continue;
            }
            if !line.is_empty() {
                lines.push(std::mem::take(&mut line));
            }
            let mut chunk = String::new();
            for c in word.chars() {
                chunk.push(c);
                if text_width(&chunk, font, size) > max_width {
                    chunk.pop();
                    lines.push(std::mem::take(&mut chunk));
                    chunk.push(c);
                }
            }
            line = chunk;
        }
        lines.push(line);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

struct SignatureImage {
    name: String,
    label: &'static str,
    width: u32,
    height: u32,
    rgb: Vec<u8>,
}

fn load_signature(data_url: &str, label: &'static str, name: &str) -> Result<SignatureImage, DocumentError> {
    let (_, bytes) = decode_signature(data_url, CONFIG.documents.max_signature_bytes)
        .map_err(|e| DocumentError::InvalidImage(e.to_string()))?;
    let image = image::load_from_memory(&bytes).map_err(|e| DocumentError::InvalidImage(e.to_string()))?;
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();

    // flatten transparency onto white
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for pixel in rgba.pixels() {
        let alpha = pixel[3] as u32;
        for channel in 0..3 {
            rgb.push(((pixel[channel] as u32 * alpha + 255 * (255 - alpha)) / 255) as u8);
        }
    }
    Ok(SignatureImage { name: name.to_string(), label, width, height, rgb })
}

/// Accumulates drawing operations page by page
struct PageWriter {
    pages: Vec<Vec<Operation>>,
    y: f32,
}

impl PageWriter {
    fn new() -> Self {
        Self { pages: vec![Vec::new()], y: PAGE_HEIGHT - MARGIN }
    }

    fn ops(&mut self) -> &mut Vec<Operation> {
        let last = self.pages.len() - 1;
        &mut self.pages[last]
    }

    fn new_page(&mut self) {
        self.pages.push(Vec::new());
        self.y = PAGE_HEIGHT - MARGIN;
    }

    /// Starts a new page unless `height` still fits
    fn ensure_space(&mut self, height: f32) -> bool {
        if self.y - height < BOTTOM_LIMIT {
            self.new_page();
            return true;
        }
        false
    }

    fn text(&mut self, x: f32, y: f32, font: Font, size: f32, text: &str) {
        let ops = self.ops();
        ops.push(Operation::new("BT", vec![]));
        ops.push(Operation::new("Tf", vec![font.resource().into(), size.into()]));
        ops.push(Operation::new("Td", vec![x.into(), y.into()]));
        ops.push(Operation::new("Tj", vec![Object::string_literal(win_ansi(text))]));
        ops.push(Operation::new("ET", vec![]));
    }

    fn line(&mut self, x1: f32, y1: f32, x2: f32, y2: f32) {
        let ops = self.ops();
        ops.push(Operation::new("m", vec![x1.into(), y1.into()]));
        ops.push(Operation::new("l", vec![x2.into(), y2.into()]));
        ops.push(Operation::new("S", vec![]));
    }

    /// Filled grey rectangle with a stroked border
    fn shaded_rect(&mut self, x: f32, y: f32, w: f32, h: f32, grey: f32) {
        let ops = self.ops();
        ops.push(Operation::new("q", vec![]));
        ops.push(Operation::new("g", vec![grey.into()]));
        ops.push(Operation::new("re", vec![x.into(), y.into(), w.into(), h.into()]));
        ops.push(Operation::new("B", vec![]));
        ops.push(Operation::new("Q", vec![]));
    }

    fn image(&mut self, name: &str, x: f32, y: f32, w: f32, h: f32) {
        let ops = self.ops();
        ops.push(Operation::new("q", vec![]));
        ops.push(Operation::new("cm", vec![w.into(), 0.into(), 0.into(), h.into(), x.into(), y.into()]));
        ops.push(Operation::new("Do", vec![Object::Name(name.as_bytes().to_vec())]));
        ops.push(Operation::new("Q", vec![]));
    }

    /// Writes wrapped lines from the current position downwards
    fn paragraph(&mut self, text: &str, font: Font, size: f32) {
        for line in wrap(text, CONTENT_WIDTH, font, size) {
            self.ensure_space(size * LINE_GAP);
            self.y -= size * LINE_GAP;
            self.text(MARGIN, self.y, font, size, &line);
        }
    }

    fn gap(&mut self, height: f32) {
        self.y -= height;
    }
}

fn format_quantity(quantity: &Decimal) -> String {
    quantity.normalize().to_string()
}

fn table_header(writer: &mut PageWriter) {
    let height = BODY_SIZE * LINE_GAP + 2.0 * CELL_PADDING;
    writer.shaded_rect(MARGIN, writer.y - height, CONTENT_WIDTH, height, 0.9);
    let baseline = writer.y - CELL_PADDING - BODY_SIZE;
    let mut x = MARGIN;
    for (title, width) in ["No.", "Description", "Qty", "Unit"].iter().zip(COLUMN_WIDTHS) {
        writer.text(x + CELL_PADDING, baseline, Font::Bold, BODY_SIZE, title);
        x += width;
    }
    writer.y -= height;
}

fn items_table(writer: &mut PageWriter, ctx: &DocumentContext<'_>) {
    let items = &ctx.protocol.content.0.items;
    let header_height = BODY_SIZE * LINE_GAP + 2.0 * CELL_PADDING;
    writer.ensure_space(header_height * 2.0);
    table_header(writer);

    if items.is_empty() {
        writer.y -= BODY_SIZE * LINE_GAP + CELL_PADDING;
        writer.text(MARGIN + CELL_PADDING, writer.y, Font::Regular, BODY_SIZE, "No items.");
        writer.gap(CELL_PADDING);
        return;
    }

    let line_height = BODY_SIZE * LINE_GAP;
    let lines_fitting = |y: f32| ((y - BOTTOM_LIMIT - 2.0 * CELL_PADDING) / line_height).floor().max(0.0) as usize;
    let fresh_page_lines = lines_fitting(PAGE_HEIGHT - MARGIN - header_height);

    for (index, item) in items.iter().enumerate() {
        let description = wrap(&item.description, COLUMN_WIDTHS[1] - 2.0 * CELL_PADDING, Font::Regular, BODY_SIZE);
        let number = (index + 1).to_string();
        let quantity = format_quantity(&item.quantity);
        let mut rest: &[String] = &description;
        let mut cells = [number.as_str(), quantity.as_str(), item.unit.as_str()];

        // Rows that fit on one page are never split; taller ones continue
        // under a repeated header on the following pages.
        loop {
            let available = lines_fitting(writer.y);
            if available == 0 || (rest.len() > available && rest.len() <= fresh_page_lines) {
                writer.new_page();
                table_header(writer);
            }
            let take = rest.len().min(lines_fitting(writer.y)).max(1);
            let (chunk, tail) = rest.split_at(take);
            item_row(writer, cells, chunk);
            rest = tail;
            if rest.is_empty() {
                break;
            }
            cells = ["", "", ""];
            writer.new_page();
            table_header(writer);
        }
    }
}

/// One table row: number, description lines, quantity and unit
fn item_row(writer: &mut PageWriter, [number, quantity, unit]: [&str; 3], description: &[String]) {
    let line_height = BODY_SIZE * LINE_GAP;
    let row_height = description.len() as f32 * line_height + 2.0 * CELL_PADDING;
    let top = writer.y;
    let baseline = top - CELL_PADDING - BODY_SIZE;

    let mut x = MARGIN;
    for (col, width) in COLUMN_WIDTHS.iter().enumerate() {
        match col {
            1 => {
                for (i, line) in description.iter().enumerate() {
                    writer.text(x + CELL_PADDING, baseline - i as f32 * line_height, Font::Regular, BODY_SIZE, line);
                }
            }
            0 => writer.text(x + CELL_PADDING, baseline, Font::Regular, BODY_SIZE, number),
            2 => writer.text(x + CELL_PADDING, baseline, Font::Regular, BODY_SIZE, quantity),
            _ => writer.text(x + CELL_PADDING, baseline, Font::Regular, BODY_SIZE, unit),
        }
        x += width;
    }
    writer.line(MARGIN, top - row_height, MARGIN + CONTENT_WIDTH, top - row_height);
    writer.y -= row_height;
}

fn signatures(writer: &mut PageWriter, images: &[SignatureImage]) {
    if images.is_empty() {
        return;
    }
    let block_height = SIGNATURE_BOX_HEIGHT + SMALL_SIZE * LINE_GAP + 20.0;
    writer.ensure_space(block_height);
    writer.gap(20.0);

    let top = writer.y;
    for (slot, image) in images.iter().enumerate() {
        let x = MARGIN + slot as f32 * (CONTENT_WIDTH - SIGNATURE_BOX_WIDTH);
        // scale to fit the box, keeping aspect ratio
        let scale = (SIGNATURE_BOX_WIDTH / image.width.max(1) as f32).min(SIGNATURE_BOX_HEIGHT / image.height.max(1) as f32);
        let (w, h) = (image.width as f32 * scale, image.height as f32 * scale);
        writer.image(&image.name, x, top - h, w, h);
        writer.line(x, top - SIGNATURE_BOX_HEIGHT - 4.0, x + SIGNATURE_BOX_WIDTH, top - SIGNATURE_BOX_HEIGHT - 4.0);
        writer.text(x, top - SIGNATURE_BOX_HEIGHT - 4.0 - SMALL_SIZE * LINE_GAP, Font::Regular, SMALL_SIZE, image.label);
    }
    writer.y = top - block_height + 20.0;
}

/// Renders the protocol as a paginated A4 PDF
pub fn render_pdf(ctx: &DocumentContext<'_>) -> Result<Vec<u8>, DocumentError> {
    let content = &ctx.protocol.content.0;
    let layout = &ctx.settings.document_layout.0;

    let mut images = Vec::new();
    if let Some(url) = ctx.protocol.manager_signature.as_deref().filter(|s| !s.is_empty()) {
        images.push(load_signature(url, "Manager signature", "Sig1")?);
    }
    if let Some(url) = ctx.protocol.client_signature.as_deref().filter(|s| !s.is_empty()) {
        images.push(load_signature(url, "Client signature", "Sig2")?);
    }

    let mut writer = PageWriter::new();

    // issuer block
    for line in ctx.settings.issuer_lines() {
        writer.y -= SMALL_SIZE * LINE_GAP;
        writer.text(MARGIN, writer.y, Font::Regular, SMALL_SIZE, &line);
    }
    if let Some(header) = layout.header.as_deref() {
        let width = text_width(header, Font::Regular, SMALL_SIZE);
        writer.text(PAGE_WIDTH - MARGIN - width, PAGE_HEIGHT - MARGIN - SMALL_SIZE * LINE_GAP, Font::Regular, SMALL_SIZE, header);
    }
    writer.gap(24.0);

    let title = format!("Handover protocol {}", ctx.protocol.number);
    writer.paragraph(&title, Font::Bold, 16.0);
    writer.paragraph(&format!("Date: {}", ctx.date()), Font::Regular, BODY_SIZE);
    writer.gap(10.0);

    let client_name = content.client_name.clone().unwrap_or_else(|| ctx.client.name.clone());
    let company_name = content.company_name.clone().or_else(|| ctx.client.company_name.clone());
    let details = [
        ("Client", Some(client_name)),
        ("Company", company_name),
        ("Address", ctx.client.address.clone()),
        ("Project", content.project_name.clone()),
    ];
    for (label, value) in details {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            writer.paragraph(&format!("{}: {}", label, value), Font::Regular, BODY_SIZE);
        }
    }
    if let Some(body) = layout.body.as_deref() {
        writer.gap(6.0);
        writer.paragraph(body, Font::Regular, BODY_SIZE);
    }
    writer.gap(14.0);

    items_table(&mut writer, ctx);

    if let Some(notes) = content.notes.as_deref().filter(|n| !n.trim().is_empty()) {
        writer.gap(14.0);
        writer.paragraph("Notes", Font::Bold, BODY_SIZE);
        writer.paragraph(notes, Font::Regular, BODY_SIZE);
    }

    signatures(&mut writer, &images);

    // footers need the final page count
    let total = writer.pages.len();
    for index in 0..total {
        writer.pages[index].extend(footer_ops(index + 1, total, layout.footer.as_deref()));
    }

    build_document(writer.pages, &images)
}

fn footer_ops(page: usize, total: usize, footer: Option<&str>) -> Vec<Operation> {
    let mut footer_writer = PageWriter::new();
    let label = format!("Page {} / {}", page, total);
    let width = text_width(&label, Font::Regular, SMALL_SIZE);
    footer_writer.line(MARGIN, 45.0, PAGE_WIDTH - MARGIN, 45.0);
    footer_writer.text(PAGE_WIDTH - MARGIN - width, 32.0, Font::Regular, SMALL_SIZE, &label);
    if let Some(footer) = footer {
        footer_writer.text(MARGIN, 32.0, Font::Regular, SMALL_SIZE, footer);
    }
    footer_writer.pages.pop().unwrap_or_default()
}

fn build_document(pages: Vec<Vec<Operation>>, images: &[SignatureImage]) -> Result<Vec<u8>, DocumentError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let regular_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let bold_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => "WinAnsiEncoding",
    });

    let mut xobjects = lopdf::Dictionary::new();
    for image in images {
        let stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => image.width as i64,
                "Height" => image.height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            image.rgb.clone(),
        );
        let image_id = doc.add_object(stream);
        xobjects.set(image.name.as_bytes().to_vec(), image_id);
    }

    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => regular_id,
            "F2" => bold_id,
        },
        "XObject" => xobjects,
    });

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for operations in pages {
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id: ObjectId = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;
    Ok(bytes)
}
